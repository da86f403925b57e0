use std::collections::BTreeSet;

use rpmrepo_core::{
    layout::HELD_PREFIX, list_repositories, needs_merge, Classification, Classifier,
    MergeOutcome, MetadataOutcome, Result,
};
use rpmrepo_events::{next_op_id, OperationId, RepoEvent};
use tracing::{debug, info, warn};

use crate::{
    context::RepoContext,
    held::{held_uploads, sync_markers},
    process::{classify_stage, ensure_metadata, merge_repository},
    types::{Failure, ReconcileOptions, ReconcileReport},
};

/// Brings the whole store up to date: classifies every upload, makes sure
/// every managed package has a current artifact and merges every repository
/// whose index lags behind (every repository with `force`).
///
/// Failures on individual uploads, packages or repositories are collected in
/// the report and do not stop the sweep. Only a failure to list the store is
/// returned as an error.
pub fn reconcile(ctx: &RepoContext, options: ReconcileOptions) -> Result<ReconcileReport> {
    let op_id = next_op_id();
    let layout = ctx.layout();
    let mut report = ReconcileReport::default();

    let uploads: Vec<String> = ctx
        .store()
        .list(layout.upload_prefix())?
        .into_iter()
        .map(|blob| blob.key)
        .filter(|key| layout.is_upload_key(key))
        .collect();
    info!(op_id, uploads = uploads.len(), "reconciling store");

    let marked = held_uploads(ctx)?;
    let mut held = BTreeSet::new();
    let classifier = Classifier::new(ctx.store(), layout, ctx.config().conflict_policy());
    for key in uploads {
        let classification = match classifier.classify(&key) {
            Ok(classification) => classification,
            Err(error) => {
                warn!(op_id, key = %key, "classification failed: {error}");
                if marked.contains(&key) {
                    held.insert(key.clone());
                }
                report.failed.push(Failure {
                    subject: key,
                    error,
                });
                continue;
            }
        };
        if let Some(stage) = classify_stage(&classification) {
            ctx.emit(RepoEvent::Classified {
                op_id,
                key: key.clone(),
                stage,
            });
        }
        match classification {
            Classification::Rejected {
                destination, ..
            } => report.rejected.push(destination),
            Classification::UploadConflict {
                ..
            } => {
                held.insert(key.clone());
                report.conflicts.push(key);
            }
            Classification::Placed {
                key: package_key, ..
            } => report.placed.push(package_key),
            Classification::AlreadyPlaced {
                ..
            }
            | Classification::Missing => {}
        }
    }

    if let Err(error) = sync_markers(ctx, &marked, &held) {
        warn!(op_id, "updating held upload markers failed: {error}");
        report.failed.push(Failure {
            subject: HELD_PREFIX.to_string(),
            error,
        });
    }

    sweep(ctx, op_id, options.force, &mut report)?;
    Ok(report)
}

/// Regenerates the index of one repository regardless of whether it lags
/// behind.
pub fn rebuild_index(ctx: &RepoContext, repository: &str) -> Result<MergeOutcome> {
    let op_id = next_op_id();
    info!(op_id, repository, "rebuilding repository index");
    merge_repository(ctx, op_id, repository)
}

/// Ensures metadata for every managed package, then merges repositories
/// that need it. Uploads are left alone.
pub(crate) fn sweep(
    ctx: &RepoContext,
    op_id: OperationId,
    force: bool,
    report: &mut ReconcileReport,
) -> Result<()> {
    let layout = ctx.layout();
    let packages: Vec<String> = ctx
        .store()
        .list("")?
        .into_iter()
        .map(|blob| blob.key)
        .filter(|key| layout.is_managed_package(key))
        .collect();
    debug!(op_id, packages = packages.len(), "checking package metadata");

    for package in packages {
        match ensure_metadata(ctx, op_id, &package) {
            Ok(MetadataOutcome::Created | MetadataOutcome::Refreshed) => {
                report.artifacts_created.push(package)
            }
            Ok(MetadataOutcome::Rejected {
                destination, ..
            }) => report.rejected.push(destination),
            Ok(MetadataOutcome::AlreadyPresent | MetadataOutcome::PackageMissing) => {}
            Err(error) => {
                warn!(op_id, package = %package, "metadata generation failed: {error}");
                report.failed.push(Failure {
                    subject: package,
                    error,
                });
            }
        }
    }

    for repository in list_repositories(ctx.store(), layout)? {
        let stale = force || {
            match needs_merge(ctx.store(), layout, &repository) {
                Ok(stale) => stale,
                Err(error) => {
                    report.failed.push(Failure {
                        subject: repository,
                        error,
                    });
                    continue;
                }
            }
        };
        if !stale {
            debug!(op_id, repository = %repository, "index current");
            continue;
        }

        match merge_repository(ctx, op_id, &repository) {
            Ok(MergeOutcome::Published {
                ..
            }) => report.merged.push(repository),
            Ok(MergeOutcome::Empty) => {}
            Err(error) => {
                warn!(op_id, repository = %repository, "merge failed: {error}");
                report.failed.push(Failure {
                    subject: repository,
                    error,
                });
            }
        }
    }

    Ok(())
}
