use std::path::PathBuf;

use miette::Diagnostic;
use rpmrepo_utils::error::{DurationError, PathError, UtilsError};
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML serialization error: {0}")]
    #[diagnostic(
        code(rpmrepo_config::toml_serialize),
        help("Check your configuration structure for invalid values")
    )]
    TomlSerError(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(rpmrepo_config::toml_deserialize),
        help("Check your config.toml syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Failed to {action} configuration file `{}`", .path.display())]
    #[diagnostic(code(rpmrepo_config::io))]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {field} `{value}`: {reason}")]
    #[diagnostic(
        code(rpmrepo_config::invalid_directory),
        help("Use a relative directory name such as `upload`, without `.` or `..` segments")
    )]
    InvalidDirectory {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Upload and rejected directories must differ, both are `{0}`")]
    #[diagnostic(
        code(rpmrepo_config::same_directories),
        help("Set `rejected_directory` to a different name than `upload_directory`")
    )]
    SameDirectories(String),

    #[error("Invalid repository layout `{0}`")]
    #[diagnostic(
        code(rpmrepo_config::invalid_layout),
        help("Valid layouts are `distribution` and `flat`")
    )]
    InvalidLayout(String),

    #[error("parallel_limit must be at least 1")]
    #[diagnostic(code(rpmrepo_config::parallel_limit))]
    InvalidParallelLimit,

    #[error("Invalid duration for {field}")]
    #[diagnostic(
        code(rpmrepo_config::invalid_duration),
        help("Durations combine units like `1d`, `2h`, `30m` and `10s`")
    )]
    InvalidDuration {
        field: &'static str,
        #[source]
        source: DurationError,
    },

    #[error("Invalid base URL `{url}`: {source}")]
    #[diagnostic(
        code(rpmrepo_config::invalid_base_url),
        help("Provide an absolute URL such as `https://packages.example.com/rpm`")
    )]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    #[diagnostic(code(rpmrepo_config::utils))]
    Utils(#[from] UtilsError),

    #[error("Failed to parse TOML: {0}")]
    #[diagnostic(code(rpmrepo_config::toml))]
    Toml(#[from] toml_edit::TomlError),

    #[error("Encountered unexpected TOML item: {0}")]
    #[diagnostic(code(rpmrepo_config::unexpected_toml_item))]
    UnexpectedTomlItem(String),
}

impl From<PathError> for ConfigError {
    fn from(err: PathError) -> Self {
        Self::Utils(UtilsError::Path(err))
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
