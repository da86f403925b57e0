use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How packages are partitioned inside the store.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    /// One repository per distribution, under `{letters}/{digits}/`
    #[default]
    Distribution,
    /// A single repository at the store root
    Flat,
}

impl FromStr for LayoutKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "distribution" => Ok(Self::Distribution),
            "flat" => Ok(Self::Flat),
            _ => Err(ConfigError::InvalidLayout(s.to_string())),
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distribution => write!(f, "distribution"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// What happens to an upload whose name is already taken by a different package.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Leave the upload in place; it is re-evaluated on every later run and
    /// proceeds once the existing package is removed.
    #[default]
    Hold,
    /// Move the upload to the rejected directory for manual handling.
    Reject,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hold => write!(f, "hold"),
            Self::Reject => write!(f, "reject"),
        }
    }
}
