use std::path::Path;

use miette::IntoDiagnostic;
use nu_ansi_term::Color::{Cyan, Red};
use rpmrepo_core::RepoLayout;
use rpmrepo_package::RpmPackage;
use rpmrepo_utils::bytes::format_bytes;
use tracing::info;

use crate::utils::Colored;

/// Prints what the pipeline would read from `file` and where it would go.
pub fn inspect_package(layout: &RepoLayout, file: &Path, json: bool) -> miette::Result<()> {
    let package = RpmPackage::from_path(file)?;

    if json {
        let output = serde_json::to_string_pretty(&package).into_diagnostic()?;
        println!("{output}");
        return Ok(());
    }

    let epoch = package
        .epoch
        .map(|epoch| epoch.to_string())
        .unwrap_or_else(|| "(none)".to_string());
    info!("{:<14}{}", "Name:", package.name);
    info!("{:<14}{}", "Epoch:", epoch);
    info!("{:<14}{}", "Version:", package.version);
    info!("{:<14}{}", "Release:", package.release);
    info!("{:<14}{}", "Architecture:", package.arch);
    info!("{:<14}{}", "Size:", format_bytes(package.size, 2));
    info!("{:<14}{}", "SHA-256:", package.checksum);

    match package.distribution() {
        Ok(distribution) => info!("{:<14}{}", "Distribution:", distribution),
        Err(_) => info!("{:<14}(none)", "Distribution:"),
    }

    match layout.package_key(&package) {
        Ok(key) => info!("{:<14}{}", "Destination:", Colored(Cyan, key)),
        Err(err) => {
            info!(
                "{:<14}{} ({err})",
                "Destination:",
                Colored(Red, "would be rejected")
            )
        }
    }
    Ok(())
}
