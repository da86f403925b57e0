//! Where everything lives in the store.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rpmrepo_config::{config::Config, policy::LayoutKind};
use rpmrepo_package::{Distribution, ReleaseError, RpmPackage};
use rpmrepo_store::{file_name, join_key, parent_prefix};

use crate::error::Result;

pub const PACKAGE_SUFFIX: &str = ".rpm";
pub const ARTIFACT_SUFFIX: &str = ".package";
pub const REPODATA_DIR: &str = "repodata";
pub const REPOMD_FILE: &str = "repomd.xml";
pub const STAGING_PREFIX: &str = ".staging/";
/// Markers of uploads held back by a name conflict.
pub const HELD_PREFIX: &str = ".held/";

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A name no other invocation will pick, for staged writes.
pub fn unique_token() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let count = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos:x}-{count}", std::process::id())
}

/// Maps packages, artifacts and repository indexes to store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    kind: LayoutKind,
    upload_prefix: String,
    rejected_prefix: String,
}

impl RepoLayout {
    pub fn new(kind: LayoutKind, upload_dir: &str, rejected_dir: &str) -> Self {
        Self {
            kind,
            upload_prefix: format!("{}/", upload_dir.trim_end_matches('/')),
            rejected_prefix: format!("{}/", rejected_dir.trim_end_matches('/')),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.layout()?,
            &config.upload_directory()?,
            &config.rejected_directory()?,
        ))
    }

    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    pub fn upload_prefix(&self) -> &str {
        &self.upload_prefix
    }

    pub fn rejected_prefix(&self) -> &str {
        &self.rejected_prefix
    }

    /// Whether `key` is an RPM inside the upload directory.
    pub fn is_upload_key(&self, key: &str) -> bool {
        key.len() > self.upload_prefix.len()
            && key.starts_with(&self.upload_prefix)
            && key.ends_with(PACKAGE_SUFFIX)
    }

    /// Destination in the rejected directory, keeping the upload's file name.
    pub fn rejected_key(&self, key: &str) -> String {
        join_key(&self.rejected_prefix, file_name(key))
    }

    /// Repository prefix a package belongs to (`el/8/`, or empty for flat
    /// layouts).
    pub fn repository_prefix(
        &self,
        package: &RpmPackage,
    ) -> std::result::Result<String, ReleaseError> {
        match self.kind {
            LayoutKind::Distribution => Ok(distribution_prefix(&package.distribution()?)),
            LayoutKind::Flat => Ok(String::new()),
        }
    }

    pub fn package_key(&self, package: &RpmPackage) -> std::result::Result<String, ReleaseError> {
        Ok(join_key(
            &self.repository_prefix(package)?,
            &package.canonical_filename(),
        ))
    }

    /// Repository prefix for a user-supplied target: `el8`, `el/8` or `.` for
    /// the flat root.
    pub fn parse_target(&self, target: &str) -> std::result::Result<String, ReleaseError> {
        match self.kind {
            LayoutKind::Flat => Ok(String::new()),
            LayoutKind::Distribution => {
                Ok(distribution_prefix(&target.parse::<Distribution>()?))
            }
        }
    }

    /// Whether `key` is a package in a repository this layout manages.
    pub fn is_managed_package(&self, key: &str) -> bool {
        key.ends_with(PACKAGE_SUFFIX) && self.is_repository_prefix(parent_prefix(key))
    }

    pub fn is_managed_artifact(&self, key: &str) -> bool {
        key.ends_with(ARTIFACT_SUFFIX) && self.is_repository_prefix(parent_prefix(key))
    }

    /// Whether packages directly under `prefix` form a repository.
    pub fn is_repository_prefix(&self, prefix: &str) -> bool {
        match self.kind {
            LayoutKind::Flat => prefix.is_empty(),
            LayoutKind::Distribution => {
                let Some(inner) = prefix.strip_suffix('/') else {
                    return false;
                };
                inner.parse::<Distribution>().is_ok()
                    && inner.contains('/')
                    && !self.is_reserved_prefix(prefix)
            }
        }
    }

    fn is_reserved_prefix(&self, prefix: &str) -> bool {
        prefix.starts_with(&self.upload_prefix)
            || prefix.starts_with(&self.rejected_prefix)
            || prefix.starts_with(STAGING_PREFIX)
            || prefix.starts_with(HELD_PREFIX)
    }

    /// `foo.rpm` -> `foo.package`, next to the package.
    pub fn artifact_key(&self, package_key: &str) -> String {
        let stem = package_key
            .strip_suffix(PACKAGE_SUFFIX)
            .unwrap_or(package_key);
        format!("{stem}{ARTIFACT_SUFFIX}")
    }

    /// `foo.package` -> `foo.rpm`.
    pub fn package_key_for_artifact(&self, artifact_key: &str) -> String {
        let stem = artifact_key
            .strip_suffix(ARTIFACT_SUFFIX)
            .unwrap_or(artifact_key);
        format!("{stem}{PACKAGE_SUFFIX}")
    }

    pub fn repodata_prefix(&self, repository: &str) -> String {
        format!("{repository}{REPODATA_DIR}/")
    }

    pub fn repomd_key(&self, repository: &str) -> String {
        format!("{repository}{REPODATA_DIR}/{REPOMD_FILE}")
    }

    pub fn held_marker_key(&self, upload_key: &str) -> String {
        format!("{HELD_PREFIX}{upload_key}")
    }

    /// Upload a held marker stands for, `None` for anything else.
    pub fn held_upload_key<'k>(&self, marker_key: &'k str) -> Option<&'k str> {
        marker_key
            .strip_prefix(HELD_PREFIX)
            .filter(|key| self.is_upload_key(key))
    }

    /// Private location for a write that is renamed onto `key` afterwards.
    pub fn staging_key(&self, key: &str, token: &str) -> String {
        format!("{STAGING_PREFIX}{key}.{token}")
    }
}

fn distribution_prefix(distribution: &Distribution) -> String {
    format!("{}/", distribution.path())
}

#[cfg(test)]
mod tests {
    use rpmrepo_package::fixtures::RpmBuilder;

    use super::*;

    fn distribution_layout() -> RepoLayout {
        RepoLayout::new(LayoutKind::Distribution, "upload", "rejected/")
    }

    fn package(release: &str) -> RpmPackage {
        RpmPackage::from_bytes(&RpmBuilder::new("demo", "1.0.0", release).build()).unwrap()
    }

    #[test]
    fn test_distribution_keys() {
        let layout = distribution_layout();
        let key = layout.package_key(&package("1.el8")).unwrap();
        assert_eq!(key, "el/8/demo-1.0.0-1.el8.x86_64.rpm");
        assert_eq!(layout.artifact_key(&key), "el/8/demo-1.0.0-1.el8.x86_64.package");
        assert_eq!(layout.package_key_for_artifact(&layout.artifact_key(&key)), key);
        assert_eq!(layout.repodata_prefix("el/8/"), "el/8/repodata/");
        assert_eq!(layout.repomd_key("el/8/"), "el/8/repodata/repomd.xml");
        assert_eq!(
            layout.rejected_key("upload/nested/demo.rpm"),
            "rejected/demo.rpm"
        );
        assert!(layout.package_key(&package("1.noreleaseinfo")).is_err());
    }

    #[test]
    fn test_flat_keys() {
        let layout = RepoLayout::new(LayoutKind::Flat, "upload", "rejected");
        let key = layout.package_key(&package("1.noreleaseinfo")).unwrap();
        assert_eq!(key, "demo-1.0.0-1.noreleaseinfo.x86_64.rpm");
        assert_eq!(layout.repomd_key(""), "repodata/repomd.xml");
        assert_eq!(layout.parse_target(".").unwrap(), "");
        assert!(layout.is_managed_package(&key));
        assert!(!layout.is_managed_package("el/8/demo.rpm"));
    }

    #[test]
    fn test_upload_keys() {
        let layout = distribution_layout();
        assert!(layout.is_upload_key("upload/demo.rpm"));
        assert!(layout.is_upload_key("upload/team/demo.rpm"));
        assert!(!layout.is_upload_key("upload/demo.txt"));
        assert!(!layout.is_upload_key("uploads/demo.rpm"));
        assert!(!layout.is_upload_key("el/8/demo.rpm"));
    }

    #[test]
    fn test_held_markers() {
        let layout = distribution_layout();
        let marker = layout.held_marker_key("upload/demo.rpm");
        assert_eq!(marker, ".held/upload/demo.rpm");
        assert_eq!(layout.held_upload_key(&marker), Some("upload/demo.rpm"));
        assert_eq!(layout.held_upload_key(".held/el/8/demo.rpm"), None);
        assert_eq!(layout.held_upload_key("upload/demo.rpm"), None);
        assert!(!layout.is_managed_package(&marker));
        assert!(!RepoLayout::new(LayoutKind::Flat, "upload", "rejected").is_managed_package(&marker));
    }

    #[test]
    fn test_managed_keys() {
        let layout = distribution_layout();
        assert!(layout.is_managed_package("el/8/demo-1.0.0-1.el8.x86_64.rpm"));
        assert!(layout.is_managed_artifact("fc/39/demo.package"));
        assert!(!layout.is_managed_package("demo.rpm"));
        assert!(!layout.is_managed_package("el/8/repodata/demo.rpm"));
        assert!(!layout.is_managed_package("upload/demo.rpm"));
        assert!(!layout.is_managed_package("rejected/demo.rpm"));
        assert!(!layout.is_managed_package("el8/demo.rpm"));
    }

    #[test]
    fn test_parse_target() {
        let layout = distribution_layout();
        assert_eq!(layout.parse_target("el8").unwrap(), "el/8/");
        assert_eq!(layout.parse_target("el/8").unwrap(), "el/8/");
        assert!(layout.parse_target(".").is_err());
    }

    #[test]
    fn test_staging_keys_are_unique() {
        let layout = distribution_layout();
        let a = layout.staging_key("el/8/repodata/repomd.xml", &unique_token());
        let b = layout.staging_key("el/8/repodata/repomd.xml", &unique_token());
        assert_ne!(a, b);
        assert!(a.starts_with(".staging/el/8/repodata/repomd.xml."));
    }
}
