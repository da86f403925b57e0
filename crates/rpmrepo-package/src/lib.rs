//! RPM package handling for the repository indexer.
//!
//! Reads the identifying tags from an RPM header without any external
//! tooling and derives the distribution a package belongs to from its
//! release string.
//!
//! # Example
//!
//! ```no_run
//! use rpmrepo_package::{RpmPackage, PackageError};
//!
//! fn route(path: &str) -> Result<String, PackageError> {
//!     let package = RpmPackage::from_path(path)?;
//!     Ok(match package.distribution() {
//!         Ok(dist) => format!("{}/{}", dist.path(), package.canonical_filename()),
//!         Err(_) => format!("rejected/{}", package.canonical_filename()),
//!     })
//! }
//! ```

pub mod error;
pub mod header;
pub mod package;
pub mod release;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use error::{ErrorContext, PackageError, ReleaseError, Result};
pub use header::{read_header, RpmHeader, HEADER_MAGIC, LEAD_MAGIC};
pub use package::RpmPackage;
pub use release::{parse_release, Distribution};
