use std::path::Path;

use crate::error::{HashError, HashResult};

/// Calculates the blake3 checksum of a file as a hex string.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be read.
///
/// # Example
///
/// ```no_run
/// use rpmrepo_utils::error::HashResult;
/// use rpmrepo_utils::hash::calculate_checksum;
///
/// fn main() -> HashResult<()> {
///     let checksum = calculate_checksum("/srv/upload/demo-1.0.0-1.el8.x86_64.rpm")?;
///     println!("Checksum is {}", checksum);
///     Ok(())
/// }
/// ```
pub fn calculate_checksum<P: AsRef<Path>>(file_path: P) -> HashResult<String> {
    let file_path = file_path.as_ref();
    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap(file_path).map_err(|err| {
        HashError::ReadFailed {
            path: file_path.to_path_buf(),
            source: err,
        }
    })?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Calculates the blake3 checksum of an in-memory buffer as a hex string.
///
/// Produces the same digest as [`calculate_checksum`] for a file holding the
/// same bytes, so blob etags and on-disk checksums can be compared directly.
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Returns the first `len` characters of a hex digest.
pub fn short_hash(digest: &str, len: usize) -> &str {
    &digest[..len.min(digest.len())]
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const HELLO_DIGEST: &str = "dc5a4edb8240b018124052c330270696f96771a63b45250a5c17d3000e823355";

    #[test]
    fn test_calculate_checksum() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();

        assert_eq!(calculate_checksum(file.path()).unwrap(), HELLO_DIGEST);
    }

    #[test]
    fn test_hash_bytes_matches_file_checksum() {
        assert_eq!(hash_bytes(b"hello world\n"), HELLO_DIGEST);
    }

    #[test]
    fn test_calculate_checksum_file_not_found() {
        assert!(calculate_checksum("/path/to/nonexistent/file").is_err());
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash(HELLO_DIGEST, 8), "dc5a4edb");
        assert_eq!(short_hash("abc", 8), "abc");
    }
}
