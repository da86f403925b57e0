//! Error types for the package crate.

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while reading an RPM file.
#[derive(Error, Diagnostic, Debug)]
pub enum PackageError {
    #[error("Error while {action}: {source}")]
    #[diagnostic(code(rpmrepo_package::io))]
    IoError {
        action: String,
        source: std::io::Error,
    },

    #[error("Invalid RPM header: {0}")]
    #[diagnostic(
        code(rpmrepo_package::invalid_header),
        help("The file is truncated or not an RPM package")
    )]
    InvalidHeader(String),

    #[error("RPM header has no {0} tag")]
    #[diagnostic(code(rpmrepo_package::missing_tag))]
    MissingTag(&'static str),
}

/// Raised when no distribution can be derived from a release string.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    #[error("Release `{0}` carries no distribution tag")]
    #[diagnostic(
        code(rpmrepo_package::unparseable_release),
        help("Releases look like `1.el8` or `3.fc39.1`: a dot-separated field of letters followed by digits")
    )]
    UnparseableRelease(String),
}

/// A specialized Result type for package operations.
pub type Result<T> = std::result::Result<T, PackageError>;

/// Extension trait for adding context to I/O errors.
pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            PackageError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}
