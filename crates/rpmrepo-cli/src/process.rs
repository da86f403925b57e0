use std::{collections::HashSet, io::Read};

use miette::{IntoDiagnostic, WrapErr};
use nu_ansi_term::Color::{Cyan, Green, Red, Yellow};
use rpmrepo_core::MergeOutcome;
use rpmrepo_operations::{
    decode_triggers, process_uploads, BatchReport, Failure, PipelineOutcome, ReconcileReport,
    RepoContext, Trigger,
};
use tracing::{debug, error, info};

use crate::utils::{display_prefix, exit_code, Colored, EXIT_OK};

/// Reads notification JSON from `input` (`-` for stdin).
fn read_input(input: &str) -> miette::Result<String> {
    if input == "-" {
        let mut payload = String::new();
        std::io::stdin()
            .read_to_string(&mut payload)
            .into_diagnostic()
            .wrap_err("reading notifications from stdin")?;
        Ok(payload)
    } else {
        std::fs::read_to_string(input)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading notifications from {input}"))
    }
}

pub async fn handle_notifications(ctx: &RepoContext, input: &str) -> miette::Result<i32> {
    let payload = read_input(input)?;
    let mut keys = Vec::new();
    for trigger in decode_triggers(&payload, ctx.layout())? {
        match trigger {
            Trigger::Upload {
                id,
                key,
            } => {
                debug!("event {} names {key}", id.as_deref().unwrap_or("-"));
                keys.push(key);
            }
            Trigger::Ignored {
                id,
                reason,
            } => debug!("ignoring event {}: {reason}", id.as_deref().unwrap_or("-")),
        }
    }

    if keys.is_empty() {
        info!("No uploads to process");
        return Ok(EXIT_OK);
    }
    process_keys(ctx, keys).await
}

pub async fn process_keys(ctx: &RepoContext, mut keys: Vec<String>) -> miette::Result<i32> {
    let mut seen = HashSet::new();
    keys.retain(|key| seen.insert(key.clone()));

    let report = process_uploads(ctx, keys).await;
    print_batch(&report);
    Ok(exit_code(report.failed.iter().map(Failure::kind)))
}

fn print_batch(report: &BatchReport) {
    for processed in &report.processed {
        match &processed.outcome {
            PipelineOutcome::Complete {
                package,
                repository,
                merge,
            } => {
                let index = match merge {
                    Some(MergeOutcome::Published {
                        packages, ..
                    }) => format!("{packages} packages indexed"),
                    Some(MergeOutcome::Empty) | None => "index current".to_string(),
                };
                info!(
                    "{} {} in {} ({index})",
                    Colored(Green, "✓"),
                    package,
                    Colored(Cyan, display_prefix(repository))
                );
            }
            PipelineOutcome::Rejected {
                destination,
                reason,
            } => {
                info!(
                    "{} {} moved to {destination}: {reason}",
                    Colored(Red, "✗"),
                    processed.key
                );
            }
            PipelineOutcome::UploadConflict {
                existing,
            } => {
                info!(
                    "{} {} held, {existing} already holds a different package",
                    Colored(Yellow, "⚠"),
                    processed.key
                );
            }
            PipelineOutcome::Ignored {
                reason,
            } => debug!("{} ignored: {reason}", processed.key),
            PipelineOutcome::Recovered {
                repositories,
            } => {
                info!(
                    "{} {} already handled, {repositories} repositories brought up to date",
                    Colored(Green, "✓"),
                    processed.key
                );
            }
        }
    }
    print_failures(&report.failed);
}

pub fn print_failures(failed: &[Failure]) {
    for failure in failed {
        error!(
            "{}: {} ({:?})",
            failure.subject,
            failure.error,
            failure.kind()
        );
    }
}

pub fn print_reconcile(report: &ReconcileReport) {
    for key in &report.placed {
        info!("{} placed {key}", Colored(Green, "✓"));
    }
    for key in &report.rejected {
        info!("{} rejected {key}", Colored(Red, "✗"));
    }
    for key in &report.conflicts {
        info!("{} {key} held by a name conflict", Colored(Yellow, "⚠"));
    }
    for key in &report.artifacts_created {
        info!("{} indexed {key}", Colored(Green, "✓"));
    }
    for repository in &report.merged {
        info!(
            "{} published {}",
            Colored(Green, "✓"),
            Colored(Cyan, display_prefix(repository))
        );
    }
    print_failures(&report.failed);
    info!(
        "{} placed, {} rejected, {} held, {} indexed, {} merged, {} failed",
        report.placed.len(),
        report.rejected.len(),
        report.conflicts.len(),
        report.artifacts_created.len(),
        report.merged.len(),
        report.failed.len()
    );
}
