//! Error types for the indexing pipeline.

use miette::Diagnostic;
use rpmrepo_config::error::ConfigError;
use rpmrepo_store::StoreError;
use rpmrepo_utils::error::FileSystemError;
use thiserror::Error;

use crate::{artifact::ArtifactError, tools::ToolError};

/// How the delivery layer should treat a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient; redelivering the trigger may succeed.
    Retryable,
    /// Repeating the same input fails the same way.
    Terminal,
    /// The store is in a state correct operation never produces.
    Fatal,
}

#[derive(Error, Diagnostic, Debug)]
pub enum RepoError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(
        code(rpmrepo::filesystem),
        help("Check free space and permissions of the temporary directory")
    )]
    FileSystem(#[from] FileSystemError),

    #[error("Error while {action}")]
    #[diagnostic(
        code(rpmrepo::io),
        help("Check free space and permissions of the temporary directory")
    )]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact `{key}` is unreadable")]
    #[diagnostic(
        code(rpmrepo::corrupt_artifact),
        help("Delete the artifact; it is regenerated on the next reconcile")
    )]
    CorruptArtifact {
        key: String,
        #[source]
        source: ArtifactError,
    },

    #[error("Invariant violated: {0}")]
    #[diagnostic(
        code(rpmrepo::invariant),
        help("The store was modified outside the indexer or a bug was hit; please report it")
    )]
    InvariantViolation(String),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(err) if err.is_retryable() => ErrorKind::Retryable,
            Self::Store(_) => ErrorKind::Terminal,
            Self::Tool(err) if err.is_retryable() => ErrorKind::Retryable,
            Self::Tool(_) => ErrorKind::Terminal,
            Self::Config(_) => ErrorKind::Terminal,
            Self::FileSystem(_) | Self::IoError { .. } => ErrorKind::Retryable,
            Self::CorruptArtifact { .. } | Self::InvariantViolation(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;

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
            RepoError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_error_kinds() {
        let unavailable = RepoError::from(StoreError::Unavailable("down".into()));
        assert_eq!(unavailable.kind(), ErrorKind::Retryable);
        assert!(unavailable.is_retryable());

        let missing = RepoError::from(StoreError::NotFound("a".into()));
        assert_eq!(missing.kind(), ErrorKind::Terminal);

        let timeout = RepoError::from(ToolError::Timeout {
            tool: "createrepo_c".into(),
            after: Duration::from_secs(1),
        });
        assert_eq!(timeout.kind(), ErrorKind::Retryable);

        let rejected = RepoError::from(ToolError::Rejected {
            tool: "mergerepo_c".into(),
            status: Some(1),
            stderr: String::new(),
        });
        assert_eq!(rejected.kind(), ErrorKind::Terminal);

        assert_eq!(
            RepoError::InvariantViolation("artifact without package".into()).kind(),
            ErrorKind::Fatal
        );
    }
}
