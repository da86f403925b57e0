//! External repository tools behind narrow interfaces.

mod createrepo;
#[cfg(any(test, feature = "fixtures"))]
pub mod fake;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub use createrepo::Createrepo;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ToolError {
    #[error("{tool} failed with status {}: {stderr}", .status.map_or_else(|| "unknown".to_string(), |code| code.to_string()))]
    #[diagnostic(
        code(rpmrepo::tool::rejected),
        help("The input was refused; retrying will not help")
    )]
    Rejected {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{tool} did not finish within {after:?}")]
    #[diagnostic(
        code(rpmrepo::tool::timeout),
        help("Raise `tools.timeout` if the repository is large")
    )]
    Timeout { tool: String, after: Duration },

    #[error("Failed to run {tool}")]
    #[diagnostic(
        code(rpmrepo::tool::spawn),
        help("Make sure the tool is installed and on PATH")
    )]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} produced no `{}`", .path.display())]
    #[diagnostic(code(rpmrepo::tool::missing_output))]
    MissingOutput { tool: String, path: PathBuf },
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Spawn { .. })
    }
}

/// Computes repository metadata for a single package.
pub trait IndexTool: Send + Sync {
    /// Indexes the one package inside `repo_dir`, leaving the result in
    /// `repo_dir/repodata/`.
    fn index(&self, repo_dir: &Path) -> Result<(), ToolError>;
}

/// Combines per-package metadata into one repository index.
pub trait MergeTool: Send + Sync {
    /// Merges the `repodata/` of every directory in `repos` into
    /// `output_dir/repodata/`.
    fn merge(&self, repos: &[PathBuf], output_dir: &Path) -> Result<(), ToolError>;
}
