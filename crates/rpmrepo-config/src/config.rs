use std::{fs, path::Path, path::PathBuf, time::Duration};

use documented::{Documented, DocumentedFields};
use rpmrepo_utils::{
    path::{resolve_path, xdg_config_home, xdg_data_home},
    time::parse_duration,
};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;
use tracing::{debug, info};
use url::Url;

use crate::{
    annotations::annotate_toml_table,
    error::{ConfigError, Result},
    policy::{ConflictPolicy, LayoutKind},
    tools::ToolSettings,
};

pub const DEFAULT_UPLOAD_DIRECTORY: &str = "upload";
pub const DEFAULT_REJECTED_DIRECTORY: &str = "rejected";
pub const DEFAULT_PARALLEL_LIMIT: u32 = 4;
pub const DEFAULT_REPODATA_RETENTION: &str = "1h";
pub const DEFAULT_STAGING_RETENTION: &str = "1d";

/// rpmrepo configuration
#[derive(Clone, Debug, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct Config {
    /// Root of the object store holding uploads, packages and repodata.
    /// Default: $XDG_DATA_HOME/rpmrepo/store
    pub store_path: Option<String>,

    /// Directory that receives new uploads. Only `.rpm` blobs created here
    /// trigger processing.
    /// Default: upload
    pub upload_directory: Option<String>,

    /// Directory unclassifiable or invalid packages are moved to.
    /// Default: rejected
    pub rejected_directory: Option<String>,

    /// Repository layout: "distribution" keeps one repository per
    /// distribution under `{letters}/{digits}/`, "flat" keeps a single
    /// repository at the store root.
    /// Default: distribution
    pub layout: Option<LayoutKind>,

    /// Handling of uploads whose name is taken by a different package:
    /// "hold" leaves them in the upload directory and retries on every run,
    /// "reject" moves them to the rejected directory.
    /// Default: hold
    pub conflict_policy: Option<ConflictPolicy>,

    /// Public URL the store is served from, used when reporting where
    /// clients find each repository.
    pub base_url: Option<String>,

    /// Maximum number of uploads processed concurrently.
    /// Default: 4
    pub parallel_limit: Option<u32>,

    /// Minimum age before an unreferenced repodata file is deleted after a
    /// merge. Clients that fetched the previous repomd.xml keep working for
    /// at least this long.
    /// Default: 1h
    pub repodata_retention: Option<String>,

    /// Age after which abandoned staging blobs are garbage collected.
    /// Default: 1d
    pub staging_retention: Option<String>,

    /// External indexing and merge tools.
    pub tools: Option<ToolSettings>,
}

/// Location of the configuration file: `$RPMREPO_CONFIG` or
/// `$XDG_CONFIG_HOME/rpmrepo/config.toml`.
pub fn default_config_path() -> PathBuf {
    match std::env::var("RPMREPO_CONFIG") {
        Ok(path) => PathBuf::from(path),
        Err(_) => xdg_config_home().join("rpmrepo").join("config.toml"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            store_path: Some(format!("{}/rpmrepo/store", xdg_data_home().display())),
            upload_directory: Some(DEFAULT_UPLOAD_DIRECTORY.to_string()),
            rejected_directory: Some(DEFAULT_REJECTED_DIRECTORY.to_string()),
            layout: Some(LayoutKind::Distribution),
            conflict_policy: Some(ConflictPolicy::Hold),
            base_url: None,
            parallel_limit: Some(DEFAULT_PARALLEL_LIMIT),
            repodata_retention: Some(DEFAULT_REPODATA_RETENTION.to_string()),
            staging_retention: Some(DEFAULT_STAGING_RETENTION.to_string()),
            tools: Some(ToolSettings::defaults()),
        }
    }

    /// Loads the configuration at `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(content) => {
                debug!("loading configuration from {}", path.display());
                toml::from_str(&content)?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, using defaults", path.display());
                Self::default_config()
            }
            Err(err) => {
                return Err(ConfigError::Io {
                    action: "read",
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        };

        config.resolve()?;
        Ok(config)
    }

    /// Fills unset fields with defaults and validates the result, including
    /// the environment overrides.
    pub fn resolve(&mut self) -> Result<()> {
        self.upload_directory
            .get_or_insert_with(|| DEFAULT_UPLOAD_DIRECTORY.to_string());
        self.rejected_directory
            .get_or_insert_with(|| DEFAULT_REJECTED_DIRECTORY.to_string());
        self.layout.get_or_insert_with(LayoutKind::default);
        self.conflict_policy.get_or_insert_with(ConflictPolicy::default);
        self.parallel_limit.get_or_insert(DEFAULT_PARALLEL_LIMIT);
        self.repodata_retention
            .get_or_insert_with(|| DEFAULT_REPODATA_RETENTION.to_string());
        self.staging_retention
            .get_or_insert_with(|| DEFAULT_STAGING_RETENTION.to_string());
        self.tools.get_or_insert_with(ToolSettings::defaults);

        let upload = self.upload_directory()?;
        let rejected = self.rejected_directory()?;
        if upload == rejected {
            return Err(ConfigError::SameDirectories(upload));
        }

        if self.parallel_limit == Some(0) {
            return Err(ConfigError::InvalidParallelLimit);
        }

        self.layout()?;
        self.repodata_retention()?;
        self.staging_retention()?;
        self.tools().timeout()?;
        self.base_url()?;

        Ok(())
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("RPMREPO_STORE") {
            return Ok(resolve_path(&env_path)?);
        }
        match &self.store_path {
            Some(path) => Ok(resolve_path(path)?),
            None => Ok(xdg_data_home().join("rpmrepo").join("store")),
        }
    }

    pub fn upload_directory(&self) -> Result<String> {
        let value = std::env::var("UPLOAD_DIRECTORY").ok().or_else(|| {
            self.upload_directory.clone()
        });
        validate_directory(
            "upload_directory",
            value.as_deref().unwrap_or(DEFAULT_UPLOAD_DIRECTORY),
        )
    }

    pub fn rejected_directory(&self) -> Result<String> {
        validate_directory(
            "rejected_directory",
            self.rejected_directory
                .as_deref()
                .unwrap_or(DEFAULT_REJECTED_DIRECTORY),
        )
    }

    pub fn layout(&self) -> Result<LayoutKind> {
        if let Ok(repo_type) = std::env::var("REPO_TYPE") {
            return repo_type.parse();
        }
        Ok(self.layout.unwrap_or_default())
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict_policy.unwrap_or_default()
    }

    pub fn parallel_limit(&self) -> usize {
        self.parallel_limit.unwrap_or(DEFAULT_PARALLEL_LIMIT).max(1) as usize
    }

    pub fn base_url(&self) -> Result<Option<Url>> {
        let Some(raw) = self.base_url.as_deref() else {
            return Ok(None);
        };
        // Without a trailing slash `Url::join` would drop the last segment.
        let normalized = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{raw}/")
        };
        Url::parse(&normalized).map(Some).map_err(|err| {
            ConfigError::InvalidBaseUrl {
                url: raw.to_string(),
                source: err,
            }
        })
    }

    pub fn repodata_retention(&self) -> Result<Duration> {
        duration_field(
            "repodata_retention",
            self.repodata_retention
                .as_deref()
                .unwrap_or(DEFAULT_REPODATA_RETENTION),
        )
    }

    pub fn staging_retention(&self) -> Result<Duration> {
        duration_field(
            "staging_retention",
            self.staging_retention
                .as_deref()
                .unwrap_or(DEFAULT_STAGING_RETENTION),
        )
    }

    pub fn tools(&self) -> ToolSettings {
        self.tools.clone().unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                ConfigError::Io {
                    action: "create directory for",
                    path: parent.to_path_buf(),
                    source: err,
                }
            })?;
        }
        fs::write(path, serialized).map_err(|err| {
            ConfigError::Io {
                action: "write",
                path: path.to_path_buf(),
                source: err,
            }
        })?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Serializes the configuration with every documented field preceded by
    /// its doc comment.
    pub fn to_annotated_document(&self) -> Result<DocumentMut> {
        let mut doc = toml::to_string_pretty(self)?.parse::<DocumentMut>()?;

        annotate_toml_table::<Config>(doc.as_table_mut(), true)?;

        if let Some(tools) = doc.get_mut("tools").and_then(|item| item.as_table_mut()) {
            annotate_toml_table::<ToolSettings>(tools, true)?;
        }

        Ok(doc)
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|err| {
        ConfigError::InvalidDuration {
            field,
            source: err,
        }
    })
}

/// Normalizes a store-relative directory name, rejecting anything that could
/// escape the store or collide with internal prefixes.
fn validate_directory(field: &'static str, value: &str) -> Result<String> {
    let invalid = |reason| {
        ConfigError::InvalidDirectory {
            field,
            value: value.to_string(),
            reason,
        }
    };

    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if trimmed.starts_with('/') {
        return Err(invalid("must be relative to the store root"));
    }
    if trimmed
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid("contains an empty, `.` or `..` segment"));
    }
    if trimmed.starts_with('.') {
        return Err(invalid("hidden directories are reserved"));
    }

    Ok(trimmed.to_string())
}
