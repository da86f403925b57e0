//! Blob storage used by the indexer.
//!
//! Keys are `/`-separated relative paths. Every backend offers the two
//! conditional primitives the pipeline coordinates through: create-if-absent
//! ([`ObjectStore::put_if_absent`], [`ObjectStore::move_if_absent`]) and
//! atomic replace ([`ObjectStore::rename`]).

mod blob;
pub mod error;
mod key;
mod local;
mod memory;

use std::{path::Path, sync::Arc};

pub use blob::{BlobInfo, MoveOutcome, PutOutcome};
pub use error::{ErrorContext, Result, StoreError};
pub use key::{file_name, join_key, parent_prefix, validate_key};
pub use local::LocalStore;
pub use memory::{MemoryStore, StoreOp};

/// Shared handle to an object store.
pub type StoreHandle = Arc<dyn ObjectStore>;

pub trait ObjectStore: Send + Sync {
    /// Metadata of `key`, `None` when absent.
    fn head(&self, key: &str) -> Result<Option<BlobInfo>>;

    /// Every blob whose key starts with `prefix`, sorted by key.
    fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>>;

    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// At most the first `len` bytes of `key`.
    fn get_prefix(&self, key: &str, len: usize) -> Result<Vec<u8>> {
        let mut data = self.get(key)?;
        data.truncate(len);
        Ok(data)
    }

    /// Writes `data` to `key`, replacing any existing blob atomically.
    fn put(&self, key: &str, data: &[u8]) -> Result<BlobInfo>;

    /// Creates `key` only if nothing exists there yet.
    fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<PutOutcome>;

    /// Moves `from` over `to`, replacing `to` atomically.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Moves `from` to `to` only if `to` does not exist. The source is left
    /// untouched when the target is taken.
    fn move_if_absent(&self, from: &str, to: &str) -> Result<MoveOutcome>;

    /// Removes `key`, returning whether anything was deleted.
    fn delete(&self, key: &str) -> Result<bool>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key)?.is_some())
    }

    /// Blobs directly inside `prefix`, not in nested "directories".
    fn list_children(&self, prefix: &str) -> Result<Vec<BlobInfo>> {
        Ok(self
            .list(prefix)?
            .into_iter()
            .filter(|blob| !blob.key[prefix.len()..].contains('/'))
            .collect())
    }

    /// Copies `key` into a local file.
    fn download_to(&self, key: &str, destination: &Path) -> Result<()> {
        let data = self.get(key)?;
        std::fs::write(destination, data)
            .with_context(|| format!("writing {key} to {}", destination.display()))
    }
}
