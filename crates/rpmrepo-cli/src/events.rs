use std::{sync::mpsc::Receiver, thread::JoinHandle};

use nu_ansi_term::Color::{Cyan, Green, Red, Yellow};
use rpmrepo_events::{ClassifyStage, LogLevel, MergeStage, MetadataStage, RepoEvent};
use tracing::{debug, error, info, trace, warn};

use crate::utils::{display_prefix, Colored};

/// Joins the event logging thread.
///
/// The context holding the sending half must be dropped before calling
/// [`finish`](EventGuard::finish), otherwise the thread never sees the
/// channel close.
pub struct EventGuard {
    handle: Option<JoinHandle<()>>,
}

impl EventGuard {
    pub fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

/// Logs pipeline events as they arrive.
pub fn spawn_event_logger(receiver: Receiver<RepoEvent>) -> EventGuard {
    let handle = std::thread::spawn(move || {
        while let Ok(event) = receiver.recv() {
            log_event(&event);
        }
    });
    EventGuard {
        handle: Some(handle),
    }
}

fn log_event(event: &RepoEvent) {
    match event {
        RepoEvent::Received {
            op_id,
            key,
        } => debug!(op_id, "[{op_id}] received {key}"),
        RepoEvent::Classified {
            op_id,
            key,
            stage,
        } => {
            match stage {
                ClassifyStage::Placed {
                    destination,
                } => info!(op_id, "[{op_id}] {key} {} {destination}", Colored(Green, "→")),
                ClassifyStage::AlreadyPlaced {
                    destination,
                } => info!(op_id, "[{op_id}] {key} already at {destination}"),
                ClassifyStage::Conflict {
                    existing,
                } => {
                    warn!(
                        op_id,
                        "[{op_id}] {key} held: {} already holds a different package",
                        existing
                    )
                }
                ClassifyStage::Rejected {
                    destination,
                    reason,
                } => {
                    warn!(
                        op_id,
                        "[{op_id}] {key} {} {destination}: {reason}",
                        Colored(Red, "rejected to")
                    )
                }
            }
        }
        RepoEvent::Metadata {
            op_id,
            package,
            stage,
        } => {
            match stage {
                MetadataStage::Indexing => trace!(op_id, "[{op_id}] checking metadata of {package}"),
                MetadataStage::AlreadyPresent => debug!(op_id, "[{op_id}] {package} already indexed"),
                MetadataStage::Created => info!(op_id, "[{op_id}] indexed {package}"),
                MetadataStage::Refreshed => info!(op_id, "[{op_id}] re-indexed {package}"),
                MetadataStage::Rejected {
                    reason,
                } => {
                    warn!(
                        op_id,
                        "[{op_id}] {package} {}: {reason}",
                        Colored(Red, "rejected by the indexing tool")
                    )
                }
            }
        }
        RepoEvent::Merge {
            op_id,
            repository,
            stage,
        } => {
            let repository = display_prefix(repository);
            match stage {
                MergeStage::Collecting {
                    artifacts,
                } => debug!(op_id, "[{op_id}] collecting {artifacts} artifacts of {repository}"),
                MergeStage::Merging => debug!(op_id, "[{op_id}] merging {repository}"),
                MergeStage::Published {
                    packages,
                } => {
                    info!(
                        op_id,
                        "[{op_id}] {} {repository} ({packages} packages)",
                        Colored(Cyan, "published")
                    )
                }
                MergeStage::Pruned {
                    removed,
                } => debug!(op_id, "[{op_id}] pruned {removed} stale files from {repository}"),
                MergeStage::Empty => debug!(op_id, "[{op_id}] {repository} has nothing to merge"),
            }
        }
        RepoEvent::Recovery {
            op_id,
            key,
            repositories,
        } => {
            info!(
                op_id,
                "[{op_id}] {key} was already handled; recovery merged {repositories} repositories"
            )
        }
        RepoEvent::StagingCollected {
            key,
        } => debug!("collected {key}"),
        RepoEvent::OperationComplete {
            op_id,
            key,
            outcome,
        } => debug!(op_id, "[{op_id}] {key}: {outcome}"),
        RepoEvent::OperationFailed {
            op_id,
            key,
            error,
            retryable,
        } => {
            if *retryable {
                warn!(
                    op_id,
                    "[{op_id}] {key} {}: {error}",
                    Colored(Yellow, "failed, will be retried")
                )
            } else {
                error!(op_id, "[{op_id}] {key} failed: {error}")
            }
        }
        RepoEvent::BatchProgress {
            completed,
            total,
            failed,
        } => debug!("{completed}/{total} done, {failed} failed"),
        RepoEvent::Log {
            level,
            message,
        } => {
            match level {
                LogLevel::Debug => debug!("{message}"),
                LogLevel::Info => info!("{message}"),
                LogLevel::Warning => warn!("{message}"),
                LogLevel::Error => error!("{message}"),
            }
        }
    }
}
