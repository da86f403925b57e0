use nu_ansi_term::Color::{Blue, Cyan, Green, Red, Yellow};
use rpmrepo_operations::{repository_status, PackageState, RepoContext};
use rpmrepo_utils::bytes::format_bytes;
use tracing::{info, warn};

use crate::utils::{display_prefix, Colored};

pub fn display_status(ctx: &RepoContext) -> miette::Result<()> {
    let report = repository_status(ctx)?;

    for repository in &report.repositories {
        let state = if !repository.published {
            Colored(Yellow, "unpublished")
        } else if repository.stale {
            Colored(Yellow, "stale")
        } else {
            Colored(Green, "current")
        };
        let url = repository
            .url
            .as_ref()
            .map(|url| format!(" {url}"))
            .unwrap_or_default();
        info!(
            "{} {state}: {} packages, {} artifacts{url}",
            Colored(Cyan, display_prefix(&repository.prefix)),
            repository.packages,
            repository.artifacts
        );
    }

    for package in &report.packages {
        let state = match &package.state {
            PackageState::MetadataReady => continue,
            PackageState::PendingMetadata | PackageState::PendingUpload => {
                Colored(Blue, package.state.to_string())
            }
            PackageState::UploadConflict {
                existing,
            } => Colored(Yellow, format!("{} with {existing}", package.state)),
            PackageState::Rejected => Colored(Red, package.state.to_string()),
        };
        info!(
            "  {} {state} ({})",
            package.key,
            format_bytes(package.size, 1)
        );
    }

    for artifact in &report.orphan_artifacts {
        warn!("{artifact} has no package");
    }
    if report.staging_blobs > 0 {
        info!(
            "{} staging blobs (see `rpmrepo gc`)",
            report.staging_blobs
        );
    }

    info!(
        "{} ready, {} pending metadata, {} pending upload, {} held, {} rejected",
        report.count(|state| *state == PackageState::MetadataReady),
        report.count(|state| *state == PackageState::PendingMetadata),
        report.count(|state| *state == PackageState::PendingUpload),
        report.count(|state| matches!(state, PackageState::UploadConflict { .. })),
        report.count(|state| *state == PackageState::Rejected),
    );
    Ok(())
}
