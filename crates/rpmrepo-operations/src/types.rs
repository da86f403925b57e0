use std::fmt;

use rpmrepo_core::{ErrorKind, MergeOutcome, RepoError};
use rpmrepo_events::OperationId;
use url::Url;

// ---- Pipeline ----

/// Non-terminal stages an upload passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Classified,
    MetadataGenerated,
    Merged,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Classified => write!(f, "classified"),
            Self::MetadataGenerated => write!(f, "metadata-generated"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// Terminal state of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Package placed, indexed and its repository merged.
    Complete {
        package: String,
        repository: String,
        /// `None` when the published index already covered the package.
        merge: Option<MergeOutcome>,
    },
    Rejected {
        destination: String,
        reason: String,
    },
    /// Left in the upload directory; a different package holds the name.
    UploadConflict { existing: String },
    /// Not an upload this pipeline handles.
    Ignored { reason: String },
    /// The upload was already gone; a recovery sweep ran instead.
    Recovered { repositories: usize },
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete { package, .. } => write!(f, "complete: {package}"),
            Self::Rejected { destination, reason } => {
                write!(f, "rejected to {destination}: {reason}")
            }
            Self::UploadConflict { existing } => write!(f, "upload-conflict with {existing}"),
            Self::Ignored { reason } => write!(f, "ignored: {reason}"),
            Self::Recovered { repositories } => {
                write!(f, "recovered, {repositories} repositories merged")
            }
        }
    }
}

#[derive(Debug)]
pub struct ProcessReport {
    pub op_id: OperationId,
    pub key: String,
    pub outcome: PipelineOutcome,
}

/// A failure tied to the upload, package or repository it happened on.
#[derive(Debug)]
pub struct Failure {
    pub subject: String,
    pub error: RepoError,
}

impl Failure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

// ---- Batch ----

#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: Vec<ProcessReport>,
    pub failed: Vec<Failure>,
}

impl BatchReport {
    pub fn count(&self, matches: impl Fn(&PipelineOutcome) -> bool) -> usize {
        self.processed
            .iter()
            .filter(|report| matches(&report.outcome))
            .count()
    }

    pub fn failures_of(&self, kind: ErrorKind) -> impl Iterator<Item = &Failure> {
        self.failed.iter().filter(move |failure| failure.kind() == kind)
    }

    /// Whether redelivering the triggers may help.
    pub fn has_retryable(&self) -> bool {
        self.failures_of(ErrorKind::Retryable).next().is_some()
    }
}

// ---- Reconcile ----

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileOptions {
    /// Merge every repository, not only those whose index lags behind.
    pub force: bool,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub placed: Vec<String>,
    pub rejected: Vec<String>,
    pub conflicts: Vec<String>,
    pub artifacts_created: Vec<String>,
    pub merged: Vec<String>,
    pub failed: Vec<Failure>,
}

impl ReconcileReport {
    pub fn has_retryable(&self) -> bool {
        self.failed
            .iter()
            .any(|failure| failure.kind() == ErrorKind::Retryable)
    }

    /// Removes the failure a caller should surface: a retryable one if any,
    /// so redelivery gets a chance, otherwise the first.
    pub fn take_failure(&mut self) -> Option<Failure> {
        if self.failed.is_empty() {
            return None;
        }
        let idx = self
            .failed
            .iter()
            .position(|failure| failure.kind() == ErrorKind::Retryable)
            .unwrap_or(0);
        Some(self.failed.remove(idx))
    }
}

// ---- Status ----

/// Where a package stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageState {
    /// In the upload directory, not yet classified.
    PendingUpload,
    /// In the upload directory, held because the name is taken.
    UploadConflict { existing: String },
    Rejected,
    /// In a repository without an artifact.
    PendingMetadata,
    MetadataReady,
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingUpload => write!(f, "pending-upload"),
            Self::UploadConflict { .. } => write!(f, "upload-conflict"),
            Self::Rejected => write!(f, "rejected"),
            Self::PendingMetadata => write!(f, "pending-metadata"),
            Self::MetadataReady => write!(f, "metadata-ready"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageStatus {
    pub key: String,
    pub state: PackageState,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct RepositoryStatus {
    pub prefix: String,
    pub packages: usize,
    pub artifacts: usize,
    pub published: bool,
    /// An artifact is newer than the published index.
    pub stale: bool,
    /// Where clients fetch the repository from, when a base URL is configured.
    pub url: Option<Url>,
}

#[derive(Debug, Default)]
pub struct StatusReport {
    pub packages: Vec<PackageStatus>,
    pub repositories: Vec<RepositoryStatus>,
    /// Artifacts whose package is gone.
    pub orphan_artifacts: Vec<String>,
    /// Abandoned staged writes.
    pub staging_blobs: usize,
}

impl StatusReport {
    pub fn count(&self, matches: impl Fn(&PackageState) -> bool) -> usize {
        self.packages
            .iter()
            .filter(|package| matches(&package.state))
            .count()
    }
}

// ---- Garbage collection ----

#[derive(Debug, Default)]
pub struct GcReport {
    pub removed: Vec<String>,
    /// Staged blobs younger than the cutoff, possibly still in use.
    pub kept: usize,
}
