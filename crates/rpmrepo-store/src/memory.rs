use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use rpmrepo_utils::hash::hash_bytes;

use crate::{
    blob::{BlobInfo, MoveOutcome, PutOutcome},
    error::{Result, StoreError},
    key::validate_key,
    ObjectStore,
};

/// Store operations a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Head,
    List,
    Get,
    Put,
    PutIfAbsent,
    Rename,
    MoveIfAbsent,
    Delete,
}

#[derive(Clone)]
struct Blob {
    data: Arc<Vec<u8>>,
    etag: String,
    last_modified: DateTime<Utc>,
}

impl Blob {
    fn new(data: &[u8]) -> Self {
        Self {
            etag: hash_bytes(data),
            data: Arc::new(data.to_vec()),
            last_modified: Utc::now(),
        }
    }

    fn info(&self, key: &str) -> BlobInfo {
        BlobInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            etag: self.etag.clone(),
            last_modified: self.last_modified,
        }
    }
}

struct Fault {
    op: StoreOp,
    key_fragment: String,
}

#[derive(Default)]
struct State {
    blobs: BTreeMap<String, Blob>,
    faults: Vec<Fault>,
    unavailable: bool,
}

/// In-process store backed by an ordered map.
///
/// All operations happen under one lock, so the conditional primitives are
/// trivially atomic. Faults can be injected to simulate an unreachable store
/// or an invocation dying half way.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `op` on a key containing `key_fragment` fail with
    /// [`StoreError::Unavailable`].
    pub fn fail_next(&self, op: StoreOp, key_fragment: &str) {
        self.lock().faults.push(Fault {
            op,
            key_fragment: key_fragment.to_string(),
        });
    }

    /// Makes every operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Overrides the modification time of an existing blob.
    pub fn set_last_modified(&self, key: &str, time: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock();
        let blob = state
            .blobs
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        blob.last_modified = time;
        Ok(())
    }

    /// Every key currently stored.
    pub fn keys(&self) -> Vec<String> {
        self.lock().blobs.keys().cloned().collect()
    }

    fn check(state: &mut State, op: StoreOp, key: &str) -> Result<()> {
        if state.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        if let Some(pos) = state
            .faults
            .iter()
            .position(|fault| fault.op == op && key.contains(&fault.key_fragment))
        {
            state.faults.remove(pos);
            return Err(StoreError::Unavailable(format!(
                "injected {op:?} failure on {key}"
            )));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn head(&self, key: &str) -> Result<Option<BlobInfo>> {
        validate_key(key)?;
        let mut state = self.lock();
        Self::check(&mut state, StoreOp::Head, key)?;
        Ok(state.blobs.get(key).map(|blob| blob.info(key)))
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>> {
        let mut state = self.lock();
        Self::check(&mut state, StoreOp::List, prefix)?;
        Ok(state
            .blobs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, blob)| blob.info(key))
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        let mut state = self.lock();
        Self::check(&mut state, StoreOp::Get, key)?;
        state
            .blobs
            .get(key)
            .map(|blob| blob.data.as_ref().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn get_prefix(&self, key: &str, len: usize) -> Result<Vec<u8>> {
        validate_key(key)?;
        let mut state = self.lock();
        Self::check(&mut state, StoreOp::Get, key)?;
        state
            .blobs
            .get(key)
            .map(|blob| blob.data[..len.min(blob.data.len())].to_vec())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<BlobInfo> {
        validate_key(key)?;
        let mut state = self.lock();
        Self::check(&mut state, StoreOp::Put, key)?;
        let blob = Blob::new(data);
        let info = blob.info(key);
        state.blobs.insert(key.to_string(), blob);
        Ok(info)
    }

    fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<PutOutcome> {
        validate_key(key)?;
        let mut state = self.lock();
        Self::check(&mut state, StoreOp::PutIfAbsent, key)?;
        if state.blobs.contains_key(key) {
            return Ok(PutOutcome::AlreadyExists);
        }
        let blob = Blob::new(data);
        let info = blob.info(key);
        state.blobs.insert(key.to_string(), blob);
        Ok(PutOutcome::Created(info))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        validate_key(from)?;
        validate_key(to)?;
        let mut state = self.lock();
        Self::check(&mut state, StoreOp::Rename, from)?;
        let blob = state
            .blobs
            .remove(from)
            .ok_or_else(|| StoreError::NotFound(from.to_string()))?;
        state.blobs.insert(to.to_string(), blob);
        Ok(())
    }

    fn move_if_absent(&self, from: &str, to: &str) -> Result<MoveOutcome> {
        validate_key(from)?;
        validate_key(to)?;
        let mut state = self.lock();
        Self::check(&mut state, StoreOp::MoveIfAbsent, from)?;
        if !state.blobs.contains_key(from) {
            return Err(StoreError::NotFound(from.to_string()));
        }
        if state.blobs.contains_key(to) {
            return Ok(MoveOutcome::TargetExists);
        }
        if let Some(blob) = state.blobs.remove(from) {
            state.blobs.insert(to.to_string(), blob);
        }
        Ok(MoveOutcome::Moved)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut state = self.lock();
        Self::check(&mut state, StoreOp::Delete, key)?;
        Ok(state.blobs.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_put_get_head() {
        let store = MemoryStore::new();
        let info = store.put("el/8/a.rpm", b"rpm").unwrap();
        assert_eq!(info.size, 3);
        assert_eq!(info.etag, hash_bytes(b"rpm"));
        assert_eq!(store.get("el/8/a.rpm").unwrap(), b"rpm");
        assert_eq!(store.head("el/8/a.rpm").unwrap().unwrap(), info);
        assert!(store.head("el/8/b.rpm").unwrap().is_none());
        assert!(matches!(
            store.get("el/8/b.rpm"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_get_prefix() {
        let store = MemoryStore::new();
        store.put("el/8/a.package", b"manifest and more").unwrap();
        assert_eq!(store.get_prefix("el/8/a.package", 8).unwrap(), b"manifest");
        assert_eq!(store.get_prefix("el/8/a.package", 100).unwrap().len(), 17);
        assert!(matches!(
            store.get_prefix("el/8/b.package", 8),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_is_prefix_scoped_and_sorted() {
        let store = MemoryStore::new();
        store.put("el/8/b.rpm", b"b").unwrap();
        store.put("el/8/a.rpm", b"a").unwrap();
        store.put("el/8/repodata/repomd.xml", b"x").unwrap();
        store.put("el/9/a.rpm", b"a").unwrap();
        store.put("el/80/a.rpm", b"a").unwrap();

        let keys: Vec<_> = store
            .list("el/8/")
            .unwrap()
            .into_iter()
            .map(|b| b.key)
            .collect();
        assert_eq!(
            keys,
            vec!["el/8/a.rpm", "el/8/b.rpm", "el/8/repodata/repomd.xml"]
        );

        let children: Vec<_> = store
            .list_children("el/8/")
            .unwrap()
            .into_iter()
            .map(|b| b.key)
            .collect();
        assert_eq!(children, vec!["el/8/a.rpm", "el/8/b.rpm"]);
        assert_eq!(store.list("").unwrap().len(), 5);
    }

    #[test]
    fn test_put_if_absent() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.put_if_absent("a.package", b"one").unwrap(),
            PutOutcome::Created(_)
        ));
        assert_eq!(
            store.put_if_absent("a.package", b"two").unwrap(),
            PutOutcome::AlreadyExists
        );
        assert_eq!(store.get("a.package").unwrap(), b"one");
    }

    #[test]
    fn test_move_if_absent() {
        let store = MemoryStore::new();
        store.put("upload/a.rpm", b"new").unwrap();
        store.put("el/8/a.rpm", b"old").unwrap();

        assert_eq!(
            store.move_if_absent("upload/a.rpm", "el/8/a.rpm").unwrap(),
            MoveOutcome::TargetExists
        );
        assert_eq!(store.get("upload/a.rpm").unwrap(), b"new");
        assert_eq!(store.get("el/8/a.rpm").unwrap(), b"old");

        assert_eq!(
            store.move_if_absent("upload/a.rpm", "el/9/a.rpm").unwrap(),
            MoveOutcome::Moved
        );
        assert!(!store.exists("upload/a.rpm").unwrap());
        assert!(matches!(
            store.move_if_absent("upload/a.rpm", "el/7/a.rpm"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_rename_replaces_target() {
        let store = MemoryStore::new();
        store.put(".staging/repomd.xml", b"new").unwrap();
        store.put("repodata/repomd.xml", b"old").unwrap();
        store
            .rename(".staging/repomd.xml", "repodata/repomd.xml")
            .unwrap();
        assert_eq!(store.get("repodata/repomd.xml").unwrap(), b"new");
        assert!(!store.exists(".staging/repomd.xml").unwrap());
    }

    #[test]
    fn test_delete() {
        let store = MemoryStore::new();
        store.put("a.rpm", b"a").unwrap();
        assert!(store.delete("a.rpm").unwrap());
        assert!(!store.delete("a.rpm").unwrap());
    }

    #[test]
    fn test_fault_injection() {
        let store = MemoryStore::new();
        store.put("el/8/a.rpm", b"a").unwrap();

        store.fail_next(StoreOp::Get, "a.rpm");
        assert!(matches!(
            store.get("el/8/a.rpm"),
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.get("el/8/a.rpm").unwrap(), b"a");

        store.set_unavailable(true);
        assert!(store.list("").unwrap_err().is_retryable());
        store.set_unavailable(false);
        assert_eq!(store.keys(), vec!["el/8/a.rpm"]);
    }

    #[test]
    fn test_set_last_modified() {
        let store = MemoryStore::new();
        store.put("a", b"a").unwrap();
        let past = Utc::now() - Duration::hours(2);
        store.set_last_modified("a", past).unwrap();
        assert_eq!(store.head("a").unwrap().unwrap().last_modified, past);
        assert!(store.set_last_modified("b", past).is_err());
    }
}
