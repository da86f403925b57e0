use std::{fs::File, io::BufReader, path::Path};

use rpmrepo_utils::{
    error::HashError,
    hash::{calculate_checksum, hash_bytes},
};
use serde::Serialize;

use crate::{
    error::{ErrorContext, PackageError, ReleaseError, Result},
    header::{read_header, RpmHeader},
    release::{parse_release, Distribution},
};

/// An RPM package identified by its header and content checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpmPackage {
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub epoch: Option<u32>,
    /// blake3 digest of the whole file.
    pub checksum: String,
    pub size: u64,
}

impl RpmPackage {
    fn from_header(header: RpmHeader, checksum: String, size: u64) -> Self {
        Self {
            name: header.name,
            version: header.version,
            release: header.release,
            arch: header.arch,
            epoch: header.epoch,
            checksum,
            size,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = read_header(&mut &bytes[..])?;
        Ok(Self::from_header(
            header,
            hash_bytes(bytes),
            bytes.len() as u64,
        ))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("reading metadata of {}", path.display()))?
            .len();
        let header = read_header(&mut BufReader::new(file))?;
        let checksum =
            calculate_checksum(path).map_err(|HashError::ReadFailed { path, source }| {
                PackageError::IoError {
                    action: format!("hashing {}", path.display()),
                    source,
                }
            })?;
        Ok(Self::from_header(header, checksum, size))
    }

    /// `{name}-{version}-{release}.{arch}.rpm`
    pub fn canonical_filename(&self) -> String {
        format!(
            "{}-{}-{}.{}.rpm",
            self.name, self.version, self.release, self.arch
        )
    }

    /// `name-[epoch:]version-release.arch`
    pub fn nevra(&self) -> String {
        match self.epoch {
            Some(epoch) if epoch > 0 => {
                format!(
                    "{}-{epoch}:{}-{}.{}",
                    self.name, self.version, self.release, self.arch
                )
            }
            _ => {
                format!(
                    "{}-{}-{}.{}",
                    self.name, self.version, self.release, self.arch
                )
            }
        }
    }

    pub fn is_source(&self) -> bool {
        self.arch == "src"
    }

    pub fn distribution(&self) -> std::result::Result<Distribution, ReleaseError> {
        parse_release(&self.release)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::fixtures::RpmBuilder;

    #[test]
    fn test_from_bytes() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8").build();
        let package = RpmPackage::from_bytes(&bytes).unwrap();

        assert_eq!(package.canonical_filename(), "demo-1.0.0-1.el8.x86_64.rpm");
        assert_eq!(package.nevra(), "demo-1.0.0-1.el8.x86_64");
        assert_eq!(package.checksum, hash_bytes(&bytes));
        assert_eq!(package.size, bytes.len() as u64);
        assert_eq!(package.distribution().unwrap().path(), "el/8");
        assert!(!package.is_source());
    }

    #[test]
    fn test_from_path_matches_from_bytes() {
        let dir = tempdir().unwrap();
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8").epoch(1).build();
        let path = dir.path().join("demo.rpm");
        fs::write(&path, &bytes).unwrap();

        let from_path = RpmPackage::from_path(&path).unwrap();
        assert_eq!(from_path, RpmPackage::from_bytes(&bytes).unwrap());
        assert_eq!(from_path.nevra(), "demo-1:1.0.0-1.el8.x86_64");
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            RpmPackage::from_path(dir.path().join("missing.rpm")),
            Err(PackageError::IoError { .. })
        ));
    }

    #[test]
    fn test_source_package_filename() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.el8").source().build();
        let package = RpmPackage::from_bytes(&bytes).unwrap();
        assert!(package.is_source());
        assert_eq!(package.canonical_filename(), "demo-1.0.0-1.el8.src.rpm");
    }

    #[test]
    fn test_unparseable_release() {
        let bytes = RpmBuilder::new("demo", "1.0.0", "1.noreleaseinfo").build();
        let package = RpmPackage::from_bytes(&bytes).unwrap();
        assert!(matches!(
            package.distribution(),
            Err(ReleaseError::UnparseableRelease(_))
        ));
    }
}
