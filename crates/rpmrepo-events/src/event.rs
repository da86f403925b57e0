use crate::OperationId;

/// Everything the pipeline reports while it works.
#[derive(Debug, Clone)]
pub enum RepoEvent {
    /// A trigger for an upload entered the pipeline.
    Received { op_id: OperationId, key: String },
    /// Classification of an upload finished.
    Classified {
        op_id: OperationId,
        key: String,
        stage: ClassifyStage,
    },
    /// Per-package metadata generation progress.
    Metadata {
        op_id: OperationId,
        package: String,
        stage: MetadataStage,
    },
    /// Repository merge progress.
    Merge {
        op_id: OperationId,
        repository: String,
        stage: MergeStage,
    },
    /// The upload was already gone; a recovery sweep ran instead.
    Recovery {
        op_id: OperationId,
        key: String,
        repositories: usize,
    },
    /// An abandoned staging blob was removed.
    StagingCollected { key: String },
    /// Operation reached a terminal state.
    OperationComplete {
        op_id: OperationId,
        key: String,
        outcome: String,
    },
    /// Operation failed and may be redelivered.
    OperationFailed {
        op_id: OperationId,
        key: String,
        error: String,
        retryable: bool,
    },
    /// Batch processing overall progress.
    BatchProgress {
        completed: usize,
        total: usize,
        failed: usize,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
}

impl RepoEvent {
    /// Operation the event belongs to, if any.
    pub fn op_id(&self) -> Option<OperationId> {
        match self {
            Self::Received { op_id, .. }
            | Self::Classified { op_id, .. }
            | Self::Metadata { op_id, .. }
            | Self::Merge { op_id, .. }
            | Self::Recovery { op_id, .. }
            | Self::OperationComplete { op_id, .. }
            | Self::OperationFailed { op_id, .. } => Some(*op_id),
            Self::StagingCollected { .. } | Self::BatchProgress { .. } | Self::Log { .. } => None,
        }
    }
}

/// Where classification routed an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyStage {
    /// Moved to the rejected directory.
    Rejected { destination: String, reason: String },
    /// A different package already occupies the target name.
    Conflict { existing: String },
    /// Moved into its repository.
    Placed { destination: String },
    /// An identical package was already in place; the duplicate upload was dropped.
    AlreadyPlaced { destination: String },
}

/// Per-package metadata stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataStage {
    /// Running the indexing tool.
    Indexing,
    /// Artifact exists and matches the package.
    AlreadyPresent,
    /// New artifact published.
    Created,
    /// Stale artifact replaced after a re-upload.
    Refreshed,
    /// The indexing tool refused the package; it was moved to rejected.
    Rejected { reason: String },
}

/// Repository merge stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStage {
    /// Downloading per-package artifacts.
    Collecting { artifacts: usize },
    /// Running the merge tool.
    Merging,
    /// New index published.
    Published { packages: usize },
    /// Unreferenced repodata files removed after publishing.
    Pruned { removed: usize },
    /// No artifacts, nothing published.
    Empty,
}

/// Log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
