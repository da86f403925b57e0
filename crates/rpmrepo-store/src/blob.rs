use chrono::{DateTime, Utc};

/// Metadata of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub key: String,
    pub size: u64,
    /// blake3 digest of the content, hex encoded.
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl BlobInfo {
    /// Last path segment of the key.
    pub fn name(&self) -> &str {
        crate::key::file_name(&self.key)
    }
}

/// Result of a conditional create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Created(BlobInfo),
    AlreadyExists,
}

/// Result of a conditional move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    TargetExists,
}
