use std::time::Duration;

use chrono::Utc;
use rpmrepo_core::{layout::STAGING_PREFIX, Result};
use rpmrepo_events::RepoEvent;
use tracing::{debug, info};

use crate::{context::RepoContext, types::GcReport};

/// Deletes staged writes older than `older_than`.
///
/// Staging blobs only outlive their invocation when it was interrupted
/// between writing and renaming. Younger blobs may still be in flight and
/// are kept.
pub fn collect_garbage(ctx: &RepoContext, older_than: Duration) -> Result<GcReport> {
    let cutoff = chrono::Duration::from_std(older_than)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age));
    let mut report = GcReport::default();

    for blob in ctx.store().list(STAGING_PREFIX)? {
        if !cutoff.is_some_and(|cutoff| blob.last_modified < cutoff) {
            report.kept += 1;
            continue;
        }
        if ctx.store().delete(&blob.key)? {
            debug!(key = %blob.key, "removed staging blob");
            ctx.emit(RepoEvent::StagingCollected {
                key: blob.key.clone(),
            });
            report.removed.push(blob.key);
        }
    }

    info!(
        removed = report.removed.len(),
        kept = report.kept,
        "staging area collected"
    );
    Ok(report)
}
