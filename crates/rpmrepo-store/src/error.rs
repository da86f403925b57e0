use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum StoreError {
    #[error("Blob `{0}` not found")]
    #[diagnostic(code(rpmrepo_store::not_found))]
    NotFound(String),

    #[error("Invalid blob key `{key}`: {reason}")]
    #[diagnostic(
        code(rpmrepo_store::invalid_key),
        help("Keys are relative `/`-separated paths without empty, `.` or `..` segments")
    )]
    InvalidKey { key: String, reason: &'static str },

    #[error("Error while {action}")]
    #[diagnostic(
        code(rpmrepo_store::io),
        help("Check permissions and free space of the store")
    )]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store unavailable: {0}")]
    #[diagnostic(
        code(rpmrepo_store::unavailable),
        help("The operation can be retried once the store is reachable again")
    )]
    Unavailable(String),
}

impl StoreError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

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
            StoreError::Io {
                action: context(),
                source: err,
            }
        })
    }
}
