use crate::error::{Result, StoreError};

/// Directory the local backend keeps in-flight writes in. Never a valid key.
pub(crate) const TMP_DIR: &str = ".rpmrepo-tmp";

/// Rejects keys that could escape the store or alias another key.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason| {
        Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("empty key");
    }
    if key.starts_with('/') {
        return invalid("keys are relative");
    }
    if key.contains('\0') || key.contains('\\') {
        return invalid("contains a forbidden character");
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return invalid("contains an empty, `.` or `..` segment");
    }
    if key == TMP_DIR || key.starts_with(&format!("{TMP_DIR}/")) {
        return invalid("reserved prefix");
    }

    Ok(())
}

/// Joins a `/`-terminated (or empty) prefix and a name.
pub fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        format!("{prefix}{name}")
    } else {
        format!("{prefix}/{name}")
    }
}

/// Last segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Prefix of the "directory" holding `key`, including the trailing `/`.
/// Empty for keys at the root.
pub fn parent_prefix(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[..=idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("el/8/demo-1.0.0-1.el8.x86_64.rpm").is_ok());
        assert!(validate_key("demo.rpm").is_ok());
        assert!(validate_key(".staging/el/8/repodata/repomd.xml").is_ok());

        for bad in ["", "/abs", "a//b", "a/./b", "../x", "a/", "a\\b", ".rpmrepo-tmp/x"] {
            assert!(
                matches!(validate_key(bad), Err(StoreError::InvalidKey { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_key_helpers() {
        assert_eq!(join_key("", "a.rpm"), "a.rpm");
        assert_eq!(join_key("el/8/", "a.rpm"), "el/8/a.rpm");
        assert_eq!(join_key("el/8", "a.rpm"), "el/8/a.rpm");
        assert_eq!(file_name("el/8/a.rpm"), "a.rpm");
        assert_eq!(file_name("a.rpm"), "a.rpm");
        assert_eq!(parent_prefix("el/8/a.rpm"), "el/8/");
        assert_eq!(parent_prefix("a.rpm"), "");
    }
}
