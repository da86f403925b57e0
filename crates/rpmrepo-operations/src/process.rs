use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use rpmrepo_core::{
    needs_merge, Classification, Classifier, MergeOutcome, MergeProgress, MetadataGenerator,
    MetadataMerger, MetadataOutcome, RepoError, Result,
};
use rpmrepo_events::{
    next_op_id, ClassifyStage, MergeStage, MetadataStage, OperationId, RepoEvent,
};
use rpmrepo_store::parent_prefix;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{
    context::RepoContext,
    held::reevaluate_held,
    reconcile::sweep,
    types::{BatchReport, Failure, PipelineOutcome, PipelineState, ProcessReport, ReconcileReport},
};

/// Runs the whole pipeline for one upload key.
///
/// Safe to call any number of times for the same key, concurrently or not.
/// Per-package outcomes (rejection, upload conflict) are reported as
/// [`PipelineOutcome`]s; only store, tool and invariant failures are errors,
/// and their [`rpmrepo_core::ErrorKind`] tells the caller whether redelivery
/// may help.
pub fn process_upload(ctx: &RepoContext, key: &str) -> Result<ProcessReport> {
    let op_id = next_op_id();
    debug!(op_id, key, state = %PipelineState::Received, "processing upload");
    ctx.emit(RepoEvent::Received {
        op_id,
        key: key.to_string(),
    });

    match run_pipeline(ctx, op_id, key) {
        Ok(outcome) => {
            info!(op_id, key, "{outcome}");
            ctx.emit(RepoEvent::OperationComplete {
                op_id,
                key: key.to_string(),
                outcome: outcome.to_string(),
            });
            Ok(ProcessReport {
                op_id,
                key: key.to_string(),
                outcome,
            })
        }
        Err(err) => {
            ctx.emit(RepoEvent::OperationFailed {
                op_id,
                key: key.to_string(),
                error: err.to_string(),
                retryable: err.is_retryable(),
            });
            Err(err)
        }
    }
}

fn run_pipeline(ctx: &RepoContext, op_id: OperationId, key: &str) -> Result<PipelineOutcome> {
    let layout = ctx.layout();
    if !layout.is_upload_key(key) {
        return Ok(PipelineOutcome::Ignored {
            reason: format!("not an RPM in `{}`", layout.upload_prefix()),
        });
    }

    let outcome = handle_upload(ctx, op_id, key)?;
    let held = matches!(outcome, PipelineOutcome::UploadConflict { .. });
    let released = reevaluate_held(ctx, op_id, key, held)?;
    if released > 0 {
        debug!(op_id, released, "released held uploads");
    }
    Ok(outcome)
}

fn handle_upload(ctx: &RepoContext, op_id: OperationId, key: &str) -> Result<PipelineOutcome> {
    let layout = ctx.layout();
    let classifier = Classifier::new(ctx.store(), layout, ctx.config().conflict_policy());
    let classification = classifier.classify(key)?;
    if let Some(stage) = classify_stage(&classification) {
        ctx.emit(RepoEvent::Classified {
            op_id,
            key: key.to_string(),
            stage,
        });
    }
    let package_key = match classification {
        Classification::Rejected {
            destination,
            reason,
        } => {
            return Ok(PipelineOutcome::Rejected {
                destination,
                reason,
            });
        }
        Classification::UploadConflict {
            existing,
        } => {
            return Ok(PipelineOutcome::UploadConflict {
                existing,
            });
        }
        Classification::Missing => return recover(ctx, op_id, key),
        Classification::Placed {
            key: package_key, ..
        }
        | Classification::AlreadyPlaced {
            key: package_key, ..
        } => package_key,
    };
    debug!(op_id, key, package = %package_key, state = %PipelineState::Classified);

    let generated = ensure_metadata(ctx, op_id, &package_key)?;
    let repository = parent_prefix(&package_key).to_string();
    let merge = match generated {
        MetadataOutcome::Rejected {
            destination,
            reason,
        } => {
            return Ok(PipelineOutcome::Rejected {
                destination,
                reason,
            });
        }
        MetadataOutcome::PackageMissing => return recover(ctx, op_id, key),
        MetadataOutcome::AlreadyPresent => {
            if needs_merge(ctx.store(), layout, &repository)? {
                Some(merge_repository(ctx, op_id, &repository)?)
            } else {
                debug!(op_id, repository = %repository, "index already current");
                None
            }
        }
        MetadataOutcome::Created | MetadataOutcome::Refreshed => {
            Some(merge_repository(ctx, op_id, &repository)?)
        }
    };
    debug!(op_id, key, repository = %repository, state = %PipelineState::Merged);

    Ok(PipelineOutcome::Complete {
        package: package_key,
        repository,
        merge,
    })
}

/// The upload is gone, either handled by an earlier delivery or moved by a
/// run that crashed before finishing. Bring every repository up to date so
/// whatever that run left undone is completed.
fn recover(ctx: &RepoContext, op_id: OperationId, key: &str) -> Result<PipelineOutcome> {
    info!(op_id, key, "upload no longer present, running recovery sweep");
    let mut report = ReconcileReport::default();
    sweep(ctx, op_id, false, &mut report)?;
    if let Some(failure) = report.take_failure() {
        warn!(
            op_id,
            subject = %failure.subject,
            failed = report.failed.len() + 1,
            "recovery sweep incomplete"
        );
        return Err(failure.error);
    }

    let repositories = report.merged.len();
    ctx.emit(RepoEvent::Recovery {
        op_id,
        key: key.to_string(),
        repositories,
    });
    Ok(PipelineOutcome::Recovered {
        repositories,
    })
}

/// Event stage for a classification, `None` when the upload was already gone.
pub(crate) fn classify_stage(classification: &Classification) -> Option<ClassifyStage> {
    Some(match classification {
        Classification::Rejected {
            destination,
            reason,
        } => {
            ClassifyStage::Rejected {
                destination: destination.clone(),
                reason: reason.clone(),
            }
        }
        Classification::UploadConflict {
            existing,
        } => {
            ClassifyStage::Conflict {
                existing: existing.clone(),
            }
        }
        Classification::Placed {
            key, ..
        } => {
            ClassifyStage::Placed {
                destination: key.clone(),
            }
        }
        Classification::AlreadyPlaced {
            key, ..
        } => {
            ClassifyStage::AlreadyPlaced {
                destination: key.clone(),
            }
        }
        Classification::Missing => return None,
    })
}

/// Makes sure `package_key` has an up-to-date artifact, emitting metadata
/// events along the way.
pub(crate) fn ensure_metadata(
    ctx: &RepoContext,
    op_id: OperationId,
    package_key: &str,
) -> Result<MetadataOutcome> {
    let emit = |stage| {
        ctx.emit(RepoEvent::Metadata {
            op_id,
            package: package_key.to_string(),
            stage,
        })
    };

    emit(MetadataStage::Indexing);
    let generator = MetadataGenerator::new(ctx.store(), ctx.layout(), ctx.indexer());
    let outcome = generator.ensure_metadata(package_key)?;
    match &outcome {
        MetadataOutcome::AlreadyPresent => emit(MetadataStage::AlreadyPresent),
        MetadataOutcome::Created => emit(MetadataStage::Created),
        MetadataOutcome::Refreshed => emit(MetadataStage::Refreshed),
        MetadataOutcome::Rejected {
            reason, ..
        } => {
            emit(MetadataStage::Rejected {
                reason: reason.clone(),
            })
        }
        MetadataOutcome::PackageMissing => {}
    }
    if !matches!(outcome, MetadataOutcome::PackageMissing) {
        debug!(op_id, package = package_key, state = %PipelineState::MetadataGenerated);
    }
    Ok(outcome)
}

/// Regenerates the index of `repository`, emitting merge events along the way.
pub(crate) fn merge_repository(
    ctx: &RepoContext,
    op_id: OperationId,
    repository: &str,
) -> Result<MergeOutcome> {
    let emit = |stage| {
        ctx.emit(RepoEvent::Merge {
            op_id,
            repository: repository.to_string(),
            stage,
        })
    };
    let progress = |progress: MergeProgress| {
        emit(match progress {
            MergeProgress::Collecting {
                artifacts,
            } => {
                MergeStage::Collecting {
                    artifacts,
                }
            }
            MergeProgress::Merging => MergeStage::Merging,
        })
    };

    let retention = ctx.config().repodata_retention()?;
    let outcome = MetadataMerger::new(ctx.store(), ctx.layout(), ctx.merger(), retention)
        .on_progress(&progress)
        .merge(repository)?;
    match &outcome {
        MergeOutcome::Published {
            packages,
            pruned,
        } => {
            emit(MergeStage::Published {
                packages: *packages,
            });
            if !pruned.is_empty() {
                emit(MergeStage::Pruned {
                    removed: pruned.len(),
                });
            }
        }
        MergeOutcome::Empty => emit(MergeStage::Empty),
    }
    Ok(outcome)
}

/// Processes `keys` concurrently, at most `parallel_limit` at a time.
///
/// Every key is attempted; failures are collected rather than stopping the
/// batch.
pub async fn process_uploads(ctx: &RepoContext, keys: Vec<String>) -> BatchReport {
    debug!(count = keys.len(), "processing uploads");
    let semaphore = Arc::new(Semaphore::new(ctx.config().parallel_limit()));

    let total = keys.len();
    let completed = Arc::new(AtomicUsize::new(0));
    let failed_count = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(keys.len());
    for key in keys {
        // The semaphore is never closed, so this is always `Some`.
        let permit = semaphore.clone().acquire_owned().await.ok();
        let ctx = ctx.clone();
        let completed = completed.clone();
        let failed_count = failed_count.clone();
        let task_key = key.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let result = process_upload(&ctx, &task_key);
            if result.is_err() {
                failed_count.fetch_add(1, Ordering::Relaxed);
            }

            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            ctx.emit(RepoEvent::BatchProgress {
                completed: done,
                total,
                failed: failed_count.load(Ordering::Relaxed),
            });
            drop(permit);
            result
        });
        handles.push((key, handle));
    }

    let mut report = BatchReport::default();
    for (key, handle) in handles {
        match handle.await {
            Ok(Ok(processed)) => report.processed.push(processed),
            Ok(Err(error)) => {
                report.failed.push(Failure {
                    subject: key,
                    error,
                })
            }
            Err(err) => {
                warn!(key = %key, "processing task failed: {err}");
                report.failed.push(Failure {
                    subject: key,
                    error: RepoError::InvariantViolation(format!("processing task failed: {err}")),
                });
            }
        }
    }
    report
}
