use std::time::Duration;

use documented::{Documented, DocumentedFields};
use rpmrepo_utils::time::parse_duration;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const DEFAULT_CREATEREPO: &str = "createrepo_c";
pub const DEFAULT_MERGEREPO: &str = "mergerepo_c";
pub const DEFAULT_TOOL_TIMEOUT: &str = "5m";

/// External repository tools
#[derive(Clone, Debug, Default, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct ToolSettings {
    /// Indexing tool invoked once per package.
    /// Default: createrepo_c
    pub createrepo: Option<String>,

    /// Merge tool combining per-package metadata into one repository.
    /// Default: mergerepo_c
    pub mergerepo: Option<String>,

    /// Wall-clock limit for a single tool run. Exceeding it is retryable.
    /// Default: 5m
    pub timeout: Option<String>,

    /// Pass `--compatibility` to the indexing tool.
    /// Default: true
    pub compatibility: Option<bool>,
}

impl ToolSettings {
    pub fn defaults() -> Self {
        Self {
            createrepo: Some(DEFAULT_CREATEREPO.to_string()),
            mergerepo: Some(DEFAULT_MERGEREPO.to_string()),
            timeout: Some(DEFAULT_TOOL_TIMEOUT.to_string()),
            compatibility: Some(true),
        }
    }

    pub fn createrepo(&self) -> &str {
        self.createrepo.as_deref().unwrap_or(DEFAULT_CREATEREPO)
    }

    pub fn mergerepo(&self) -> &str {
        self.mergerepo.as_deref().unwrap_or(DEFAULT_MERGEREPO)
    }

    pub fn timeout(&self) -> Result<Duration> {
        let value = self.timeout.as_deref().unwrap_or(DEFAULT_TOOL_TIMEOUT);
        parse_duration(value).map_err(|err| {
            ConfigError::InvalidDuration {
                field: "tools.timeout",
                source: err,
            }
        })
    }

    pub fn compatibility(&self) -> bool {
        self.compatibility.unwrap_or(true)
    }
}
