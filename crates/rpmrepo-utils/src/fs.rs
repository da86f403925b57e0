use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::{FileSystemError, FileSystemResult};

/// Creates a directory structure if it doesn't exist.
///
/// # Errors
///
/// * [`FileSystemError::Directory`] if the directory could not be created.
/// * [`FileSystemError::NotADirectory`] if the path exists but is not a directory.
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path).map_err(|err| FileSystemError::Directory {
            path: path.to_path_buf(),
            action: "create",
            source: err,
        })?;
    } else if !path.is_dir() {
        return Err(FileSystemError::NotADirectory {
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

/// Recursively collects every regular file below `root`, sorted by path.
///
/// Symlinks are not followed. A missing `root` yields an empty list.
pub fn walk_files<P: AsRef<Path>>(root: P) -> FileSystemResult<Vec<PathBuf>> {
    let root = root.as_ref();
    let mut files = Vec::new();

    if !root.exists() {
        return Ok(files);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| FileSystemError::Directory {
            path: dir.clone(),
            action: "read",
            source: err,
        })?;

        for entry in entries {
            let entry = entry.map_err(|err| FileSystemError::Directory {
                path: dir.clone(),
                action: "read",
                source: err,
            })?;
            let file_type = entry.file_type().map_err(|err| FileSystemError::File {
                path: entry.path(),
                action: "stat",
                source: err,
            })?;

            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Removes empty parent directories of `path`, stopping at `stop_at`.
pub fn prune_empty_parents<P: AsRef<Path>, Q: AsRef<Path>>(path: P, stop_at: Q) {
    let stop_at = stop_at.as_ref();
    let mut current = path.as_ref().parent();

    while let Some(dir) = current {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        // Fails on non-empty directories, which is where we stop.
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
