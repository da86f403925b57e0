//! Routing of freshly uploaded packages.

use rpmrepo_config::policy::ConflictPolicy;
use rpmrepo_package::RpmPackage;
use rpmrepo_store::{file_name, join_key, MoveOutcome, ObjectStore, StoreError};
use rpmrepo_utils::hash::{hash_bytes, short_hash};
use tracing::{debug, info, warn};

use crate::{
    error::{RepoError, Result},
    layout::RepoLayout,
};

// A target that vanishes between the failed move and the lookup is retried.
const MAX_PLACEMENT_ATTEMPTS: usize = 3;

/// Where an upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Moved to the rejected directory.
    Rejected { destination: String, reason: String },
    /// A different package already holds the name; the upload stays put.
    UploadConflict { existing: String },
    /// Moved into its repository.
    Placed { package: RpmPackage, key: String },
    /// The same content was already in place (an earlier move completed);
    /// the duplicate upload was removed.
    AlreadyPlaced { package: RpmPackage, key: String },
    /// The upload no longer exists.
    Missing,
}

impl Classification {
    /// Store key of the package when it is (now) in a repository.
    pub fn package_key(&self) -> Option<&str> {
        match self {
            Self::Placed { key, .. } | Self::AlreadyPlaced { key, .. } => Some(key),
            _ => None,
        }
    }
}

pub struct Classifier<'a> {
    store: &'a dyn ObjectStore,
    layout: &'a RepoLayout,
    policy: ConflictPolicy,
}

impl<'a> Classifier<'a> {
    pub fn new(store: &'a dyn ObjectStore, layout: &'a RepoLayout, policy: ConflictPolicy) -> Self {
        Self {
            store,
            layout,
            policy,
        }
    }

    /// Decides the fate of one upload.
    ///
    /// Placement is a single conditional move, so two uploads racing for the
    /// same name cannot both land there. Only store failures are returned as
    /// errors; unreadable packages and unparseable releases end up rejected.
    pub fn classify(&self, upload_key: &str) -> Result<Classification> {
        let bytes = match self.store.get(upload_key) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                debug!(key = upload_key, "upload already gone");
                return Ok(Classification::Missing);
            }
            Err(err) => return Err(err.into()),
        };
        let checksum = hash_bytes(&bytes);

        let package = match RpmPackage::from_bytes(&bytes) {
            Ok(package) => package,
            Err(err) => return self.reject(upload_key, &checksum, err.to_string()),
        };
        let target = match self.layout.package_key(&package) {
            Ok(target) => target,
            Err(err) => return self.reject(upload_key, &checksum, err.to_string()),
        };

        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            match self.store.move_if_absent(upload_key, &target) {
                Ok(MoveOutcome::Moved) => {
                    info!(key = upload_key, destination = %target, "placed package");
                    return Ok(Classification::Placed {
                        package,
                        key: target,
                    });
                }
                Ok(MoveOutcome::TargetExists) => {}
                Err(StoreError::NotFound(_)) => return Ok(Classification::Missing),
                Err(err) => return Err(err.into()),
            }

            let Some(existing) = self.store.head(&target)? else {
                continue;
            };

            if existing.etag == checksum {
                debug!(key = upload_key, destination = %target, "identical package already placed");
                self.store.delete(upload_key)?;
                return Ok(Classification::AlreadyPlaced {
                    package,
                    key: target,
                });
            }

            return match self.policy {
                ConflictPolicy::Hold => {
                    warn!(
                        key = upload_key,
                        existing = %target,
                        "a different package already uses this name, holding upload"
                    );
                    Ok(Classification::UploadConflict { existing: target })
                }
                ConflictPolicy::Reject => {
                    self.reject(
                        upload_key,
                        &checksum,
                        format!("`{target}` already holds a different package"),
                    )
                }
            };
        }

        Err(StoreError::Unavailable(format!(
            "`{target}` kept changing while placing `{upload_key}`"
        ))
        .into())
    }

    fn reject(&self, key: &str, checksum: &str, reason: String) -> Result<Classification> {
        match move_to_rejected(self.store, self.layout, key, checksum)? {
            Some(destination) => {
                warn!(key, %destination, %reason, "rejected upload");
                Ok(Classification::Rejected {
                    destination,
                    reason,
                })
            }
            None => Ok(Classification::Missing),
        }
    }
}

/// Moves `key` into the rejected directory without overwriting anything.
///
/// A name already taken by different content gets a checksum prefix. Returns
/// the destination, or `None` when `key` disappeared in the meantime.
pub fn move_to_rejected(
    store: &dyn ObjectStore,
    layout: &RepoLayout,
    key: &str,
    checksum: &str,
) -> Result<Option<String>> {
    let plain = layout.rejected_key(key);
    let prefixed = join_key(
        layout.rejected_prefix(),
        &format!("{}-{}", short_hash(checksum, 12), file_name(key)),
    );

    for destination in [&plain, &prefixed] {
        match store.move_if_absent(key, destination) {
            Ok(MoveOutcome::Moved) => return Ok(Some(destination.clone())),
            Ok(MoveOutcome::TargetExists) => {}
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        if store
            .head(destination)?
            .is_some_and(|existing| existing.etag == checksum)
        {
            store.delete(key)?;
            return Ok(Some(destination.clone()));
        }
    }

    Err(RepoError::InvariantViolation(format!(
        "`{plain}` and `{prefixed}` both hold content different from `{key}`"
    )))
}
