//! Uploads held back by a name conflict.
//!
//! A held upload stays in the upload directory and leaves a marker under
//! `.held/`. Every later invocation classifies the marked uploads again, so
//! removing the package that holds the name lets them through without a new
//! trigger.

use std::collections::BTreeSet;

use rpmrepo_core::{
    layout::HELD_PREFIX, needs_merge, Classification, Classifier, MetadataOutcome, Result,
};
use rpmrepo_events::{OperationId, RepoEvent};
use rpmrepo_store::parent_prefix;
use tracing::{debug, info, warn};

use crate::{
    context::RepoContext,
    process::{classify_stage, ensure_metadata, merge_repository},
};

/// Upload keys with a held marker, sorted.
pub(crate) fn held_uploads(ctx: &RepoContext) -> Result<BTreeSet<String>> {
    let layout = ctx.layout();
    Ok(ctx
        .store()
        .list(HELD_PREFIX)?
        .into_iter()
        .filter_map(|blob| layout.held_upload_key(&blob.key).map(str::to_string))
        .collect())
}

/// Makes the markers match `held`, the uploads currently held back.
pub(crate) fn sync_markers(
    ctx: &RepoContext,
    marked: &BTreeSet<String>,
    held: &BTreeSet<String>,
) -> Result<()> {
    let layout = ctx.layout();
    for upload in held.difference(marked) {
        ctx.store().put(&layout.held_marker_key(upload), b"")?;
        debug!(upload = %upload, "marked upload as held");
    }
    for upload in marked.difference(held) {
        ctx.store().delete(&layout.held_marker_key(upload))?;
    }
    Ok(())
}

/// Records whether `own_key` is held, then classifies every other held
/// upload again. Returns how many were released.
///
/// Retryable failures are returned so the trigger gets redelivered; other
/// failures only keep the upload marked for the next invocation.
pub(crate) fn reevaluate_held(
    ctx: &RepoContext,
    op_id: OperationId,
    own_key: &str,
    own_held: bool,
) -> Result<usize> {
    let marked = held_uploads(ctx)?;
    let own_marker = ctx.layout().held_marker_key(own_key);
    if own_held && !marked.contains(own_key) {
        ctx.store().put(&own_marker, b"")?;
        debug!(op_id, upload = own_key, "marked upload as held");
    } else if !own_held && marked.contains(own_key) {
        ctx.store().delete(&own_marker)?;
    }

    let classifier = Classifier::new(ctx.store(), ctx.layout(), ctx.config().conflict_policy());
    let mut released = 0;
    for upload in marked.iter().filter(|upload| *upload != own_key) {
        match release(ctx, op_id, &classifier, upload) {
            Ok(true) => released += 1,
            Ok(false) => {}
            Err(err) if err.is_retryable() => return Err(err),
            Err(err) => warn!(op_id, upload = %upload, "held upload not re-evaluated: {err}"),
        }
    }
    Ok(released)
}

/// Classifies one held upload and, once it is no longer held, finishes its
/// pipeline and drops the marker.
fn release(
    ctx: &RepoContext,
    op_id: OperationId,
    classifier: &Classifier<'_>,
    upload: &str,
) -> Result<bool> {
    let classification = classifier.classify(upload)?;
    if let Some(stage) = classify_stage(&classification) {
        ctx.emit(RepoEvent::Classified {
            op_id,
            key: upload.to_string(),
            stage,
        });
    }

    match classification {
        Classification::UploadConflict {
            ..
        } => return Ok(false),
        Classification::Placed {
            key: package_key, ..
        }
        | Classification::AlreadyPlaced {
            key: package_key, ..
        } => {
            let repository = parent_prefix(&package_key).to_string();
            match ensure_metadata(ctx, op_id, &package_key)? {
                MetadataOutcome::Created | MetadataOutcome::Refreshed => {
                    merge_repository(ctx, op_id, &repository)?;
                }
                MetadataOutcome::AlreadyPresent => {
                    if needs_merge(ctx.store(), ctx.layout(), &repository)? {
                        merge_repository(ctx, op_id, &repository)?;
                    }
                }
                MetadataOutcome::Rejected {
                    ..
                }
                | MetadataOutcome::PackageMissing => {}
            }
        }
        Classification::Rejected {
            ..
        }
        | Classification::Missing => {}
    }

    ctx.store().delete(&ctx.layout().held_marker_key(upload))?;
    info!(op_id, upload, "held upload released");
    Ok(true)
}
