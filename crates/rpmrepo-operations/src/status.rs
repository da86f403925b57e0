use std::collections::{BTreeMap, HashMap};

use rpmrepo_core::{
    layout::{RepoLayout, STAGING_PREFIX},
    Result,
};
use rpmrepo_package::RpmPackage;
use rpmrepo_store::{parent_prefix, BlobInfo, ObjectStore};
use url::Url;
use tracing::{debug, trace};

use crate::{
    context::RepoContext,
    types::{PackageState, PackageStatus, RepositoryStatus, StatusReport},
};

/// Reads the state of every package and repository from the store without
/// changing anything.
pub fn repository_status(ctx: &RepoContext) -> Result<StatusReport> {
    let layout = ctx.layout();
    let store = ctx.store();
    let blobs: HashMap<String, BlobInfo> = store
        .list("")?
        .into_iter()
        .map(|blob| (blob.key.clone(), blob))
        .collect();
    debug!(blobs = blobs.len(), "collecting repository status");

    let mut report = StatusReport::default();
    let mut repositories: BTreeMap<String, RepositoryStatus> = BTreeMap::new();
    let base_url = ctx.config().base_url()?;

    let mut keys: Vec<&String> = blobs.keys().collect();
    keys.sort();
    for key in keys {
        let blob = &blobs[key];
        if key.starts_with(STAGING_PREFIX) {
            report.staging_blobs += 1;
        } else if layout.is_upload_key(key) {
            let state = upload_state(store, layout, blob, &blobs);
            report.packages.push(PackageStatus {
                key: key.clone(),
                state,
                size: blob.size,
            });
        } else if key.starts_with(layout.rejected_prefix()) {
            report.packages.push(PackageStatus {
                key: key.clone(),
                state: PackageState::Rejected,
                size: blob.size,
            });
        } else if layout.is_managed_package(key) {
            let state = if blobs.contains_key(&layout.artifact_key(key)) {
                PackageState::MetadataReady
            } else {
                PackageState::PendingMetadata
            };
            entry(&mut repositories, parent_prefix(key), base_url.as_ref()).packages += 1;
            report.packages.push(PackageStatus {
                key: key.clone(),
                state,
                size: blob.size,
            });
        } else if layout.is_managed_artifact(key) {
            let prefix = parent_prefix(key);
            if !blobs.contains_key(&layout.package_key_for_artifact(key)) {
                report.orphan_artifacts.push(key.clone());
            }
            let repomd = blobs.get(&layout.repomd_key(prefix));
            let status = entry(&mut repositories, prefix, base_url.as_ref());
            status.artifacts += 1;
            if repomd.map_or(true, |repomd| blob.last_modified > repomd.last_modified) {
                status.stale = true;
            }
        } else if key.ends_with(&layout.repomd_key("")) {
            let prefix = &key[..key.len() - layout.repomd_key("").len()];
            if layout.is_repository_prefix(prefix) {
                entry(&mut repositories, prefix, base_url.as_ref()).published = true;
            }
        } else {
            trace!(key = %key, "unmanaged blob");
        }
    }

    report.repositories = repositories.into_values().collect();
    Ok(report)
}

fn entry<'a>(
    repositories: &'a mut BTreeMap<String, RepositoryStatus>,
    prefix: &str,
    base_url: Option<&Url>,
) -> &'a mut RepositoryStatus {
    repositories
        .entry(prefix.to_string())
        .or_insert_with(|| {
            RepositoryStatus {
                prefix: prefix.to_string(),
                packages: 0,
                artifacts: 0,
                published: false,
                stale: false,
                url: base_url.and_then(|base| base.join(prefix).ok()),
            }
        })
}

/// Whether an upload would be placed or is held by a different package
/// already occupying its name. Unreadable uploads count as pending; the
/// pipeline rejects them when it gets to them.
fn upload_state(
    store: &dyn ObjectStore,
    layout: &RepoLayout,
    upload: &BlobInfo,
    blobs: &HashMap<String, BlobInfo>,
) -> PackageState {
    let target = store
        .get(&upload.key)
        .ok()
        .and_then(|bytes| RpmPackage::from_bytes(&bytes).ok())
        .and_then(|package| layout.package_key(&package).ok());
    match target.and_then(|target| blobs.get(&target)) {
        Some(existing) if existing.etag != upload.etag => {
            PackageState::UploadConflict {
                existing: existing.key.clone(),
            }
        }
        _ => PackageState::PendingUpload,
    }
}
