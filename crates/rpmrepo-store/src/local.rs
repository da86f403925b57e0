use std::{
    fs::{self, Permissions},
    io::{ErrorKind, Read, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use rpmrepo_utils::{
    error::{FileSystemError, HashError},
    fs::{ensure_dir_exists, prune_empty_parents, walk_files},
    hash::calculate_checksum,
};
use tempfile::NamedTempFile;
use tracing::trace;

use crate::{
    blob::{BlobInfo, MoveOutcome, PutOutcome},
    error::{ErrorContext, Result, StoreError},
    key::{validate_key, TMP_DIR},
    ObjectStore,
};

/// Store backed by a directory tree.
///
/// Writes go to a private temporary file first. Unconditional writes are
/// published with `rename(2)`, conditional ones with `link(2)`, which fails
/// with `EEXIST` instead of replacing the target. Readers therefore never
/// see a partially written blob.
pub struct LocalStore {
    root: PathBuf,
    tmp: PathBuf,
}

impl LocalStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let tmp = root.join(TMP_DIR);
        ensure_dir_exists(&tmp).map_err(fs_error)?;
        Ok(Self { root, tmp })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    fn info(&self, key: &str, path: &Path) -> Result<Option<BlobInfo>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::Io {
                    action: format!("reading metadata of {key}"),
                    source: err,
                })
            }
        };

        let etag = match calculate_checksum(path) {
            Ok(etag) => etag,
            // Deleted between stat and hash.
            Err(HashError::ReadFailed { source, .. }) if source.kind() == ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(HashError::ReadFailed { source, .. }) => {
                return Err(StoreError::Io {
                    action: format!("hashing {key}"),
                    source,
                })
            }
        };

        let last_modified: DateTime<Utc> = metadata
            .modified()
            .with_context(|| format!("reading modification time of {key}"))?
            .into();

        Ok(Some(BlobInfo {
            key: key.to_string(),
            size: metadata.len(),
            etag,
            last_modified,
        }))
    }

    fn stage(&self, key: &str, data: &[u8]) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("blob-")
            .tempfile_in(&self.tmp)
            .with_context(|| format!("creating temporary file for {key}"))?;
        file.write_all(data)
            .with_context(|| format!("writing temporary file for {key}"))?;
        // Temporary files are created 0600; published blobs are served to others.
        file.as_file()
            .set_permissions(Permissions::from_mode(0o644))
            .with_context(|| format!("setting permissions for {key}"))?;
        file.as_file()
            .sync_all()
            .with_context(|| format!("syncing temporary file for {key}"))?;
        Ok(file)
    }

    fn ensure_parent(&self, key: &str, path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating parent directory of {key}"))
            }
            None => Ok(()),
        }
    }
}

fn fs_error(err: FileSystemError) -> StoreError {
    match err {
        FileSystemError::File {
            path,
            action,
            source,
        }
        | FileSystemError::Directory {
            path,
            action,
            source,
        } => {
            StoreError::Io {
                action: format!("trying to {action} {}", path.display()),
                source,
            }
        }
        FileSystemError::NotADirectory { path } => {
            StoreError::Io {
                action: format!("opening store at {}", path.display()),
                source: std::io::Error::other("not a directory"),
            }
        }
    }
}

impl ObjectStore for LocalStore {
    fn head(&self, key: &str) -> Result<Option<BlobInfo>> {
        let path = self.path_of(key)?;
        self.info(key, &path)
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>> {
        // Only walk the deepest directory the prefix pins down.
        let base = match prefix.rfind('/') {
            Some(idx) => self.root.join(&prefix[..idx]),
            None => self.root.clone(),
        };

        let mut blobs = Vec::new();
        for path in walk_files(&base).map_err(fs_error)? {
            let Some(key) = self.key_of(&path) else {
                continue;
            };
            if !key.starts_with(prefix) || validate_key(&key).is_err() {
                continue;
            }
            if let Some(info) = self.info(&key, &path)? {
                blobs.push(info);
            }
        }

        blobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(blobs)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_of(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => {
                Err(StoreError::Io {
                    action: format!("reading {key}"),
                    source: err,
                })
            }
        }
    }

    fn get_prefix(&self, key: &str, len: usize) -> Result<Vec<u8>> {
        let path = self.path_of(key)?;
        let io_error = |err: std::io::Error| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io {
                    action: format!("reading {key}"),
                    source: err,
                }
            }
        };
        let file = fs::File::open(&path).map_err(io_error)?;
        let mut data = Vec::new();
        file.take(len as u64)
            .read_to_end(&mut data)
            .map_err(io_error)?;
        Ok(data)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<BlobInfo> {
        let path = self.path_of(key)?;
        self.ensure_parent(key, &path)?;
        let staged = self.stage(key, data)?;
        staged.persist(&path).map_err(|err| {
            StoreError::Io {
                action: format!("publishing {key}"),
                source: err.error,
            }
        })?;
        trace!(key, "stored blob");
        self.info(key, &path)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<PutOutcome> {
        let path = self.path_of(key)?;
        if path.exists() {
            return Ok(PutOutcome::AlreadyExists);
        }
        self.ensure_parent(key, &path)?;
        let staged = self.stage(key, data)?;
        match fs::hard_link(staged.path(), &path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Ok(PutOutcome::AlreadyExists)
            }
            Err(err) => {
                return Err(StoreError::Io {
                    action: format!("publishing {key}"),
                    source: err,
                })
            }
        }
        // Dropping the temporary file unlinks the staging name only.
        drop(staged);
        trace!(key, "created blob");
        match self.info(key, &path)? {
            Some(info) => Ok(PutOutcome::Created(info)),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.path_of(from)?;
        let target = self.path_of(to)?;
        self.ensure_parent(to, &target)?;
        match fs::rename(&source, &target) {
            Ok(()) => {
                prune_empty_parents(&source, &self.root);
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(from.to_string()))
            }
            Err(err) => {
                Err(StoreError::Io {
                    action: format!("renaming {from} to {to}"),
                    source: err,
                })
            }
        }
    }

    fn move_if_absent(&self, from: &str, to: &str) -> Result<MoveOutcome> {
        let source = self.path_of(from)?;
        let target = self.path_of(to)?;
        if !source.is_file() {
            return Err(StoreError::NotFound(from.to_string()));
        }
        self.ensure_parent(to, &target)?;

        match fs::hard_link(&source, &target) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Ok(MoveOutcome::TargetExists)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(from.to_string()))
            }
            Err(err) => {
                return Err(StoreError::Io {
                    action: format!("linking {from} to {to}"),
                    source: err,
                })
            }
        }

        match fs::remove_file(&source) {
            Ok(()) => {}
            // Another invocation already finished the same move.
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StoreError::Io {
                    action: format!("removing {from} after move"),
                    source: err,
                })
            }
        }
        prune_empty_parents(&source, &self.root);
        Ok(MoveOutcome::Moved)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_of(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                prune_empty_parents(&path, &self.root);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(StoreError::Io {
                    action: format!("deleting {key}"),
                    source: err,
                })
            }
        }
    }

    fn download_to(&self, key: &str, destination: &Path) -> Result<()> {
        let path = self.path_of(key)?;
        match fs::copy(&path, destination) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound && !path.exists() => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => {
                Err(StoreError::Io {
                    action: format!("copying {key} to {}", destination.display()),
                    source: err,
                })
            }
        }
    }
}
