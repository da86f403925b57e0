use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use cli::{Args, Commands};
use events::spawn_event_logger;
use inspect::inspect_package;
use logging::setup_logging;
use miette::IntoDiagnostic;
use nu_ansi_term::Color::Cyan;
use process::{handle_notifications, print_reconcile, process_keys};
use rpmrepo_config::config::{default_config_path, Config};
use rpmrepo_core::{MergeOutcome, RepoError, RepoLayout};
use rpmrepo_events::{ChannelSink, EventSinkHandle};
use rpmrepo_operations::{
    collect_garbage, rebuild_index, reconcile, ReconcileOptions, RepoContext,
};
use rpmrepo_utils::{
    path::resolve_path,
    time::{format_duration, parse_duration},
};
use status::display_status;
use tracing::info;
use utils::{display_prefix, exit_code, set_color, Colored, EXIT_FAILURE, EXIT_OK, EXIT_TEMPFAIL};

mod cli;
mod events;
mod inspect;
mod logging;
mod process;
mod status;
mod utils;

fn config_path(args: &Args) -> miette::Result<PathBuf> {
    match args.config {
        Some(ref path) => resolve_path(path).into_diagnostic(),
        None => Ok(default_config_path()),
    }
}

async fn handle_cli(args: Args) -> miette::Result<i32> {
    if let Commands::DefConfig = args.command {
        let document = Config::default_config().to_annotated_document()?;
        print!("{document}");
        return Ok(EXIT_OK);
    }

    let config = Config::load(&config_path(&args)?)?;

    match args.command {
        Commands::Config => {
            let output = toml::to_string_pretty(&config).into_diagnostic()?;
            print!("{output}");
            return Ok(EXIT_OK);
        }
        Commands::Inspect {
            ref file,
        } => {
            let layout = RepoLayout::from_config(&config)?;
            inspect_package(&layout, file, args.json)?;
            return Ok(EXIT_OK);
        }
        _ => {}
    }

    let (sink, receiver) = ChannelSink::new();
    let events: EventSinkHandle = Arc::new(sink);
    let guard = spawn_event_logger(receiver);
    let ctx = RepoContext::from_config(config, events)?;

    let result = run_command(&ctx, args.command).await;

    drop(ctx);
    guard.finish();
    result
}

async fn run_command(ctx: &RepoContext, command: Commands) -> miette::Result<i32> {
    match command {
        Commands::Handle {
            input,
        } => handle_notifications(ctx, &input).await,
        Commands::Process {
            keys,
        } => process_keys(ctx, keys).await,
        Commands::Reconcile {
            force,
        } => {
            let report = reconcile(ctx, ReconcileOptions {
                force,
            })?;
            print_reconcile(&report);
            Ok(exit_code(report.failed.iter().map(|failure| failure.kind())))
        }
        Commands::Merge {
            target,
        } => {
            let repository = ctx.layout().parse_target(&target)?;
            match rebuild_index(ctx, &repository)? {
                MergeOutcome::Published {
                    packages,
                    pruned,
                } => {
                    info!(
                        "Published {} with {packages} packages, pruned {} stale files",
                        Colored(Cyan, display_prefix(&repository)),
                        pruned.len()
                    );
                }
                MergeOutcome::Empty => {
                    info!("{} has no packages", display_prefix(&repository));
                }
            }
            Ok(EXIT_OK)
        }
        Commands::Status => {
            display_status(ctx)?;
            Ok(EXIT_OK)
        }
        Commands::Gc {
            older_than,
        } => {
            let older_than: Duration = match older_than {
                Some(ref value) => parse_duration(value).into_diagnostic()?,
                None => ctx.config().staging_retention()?,
            };
            let report = collect_garbage(ctx, older_than)?;
            info!(
                "Removed {} staging blobs older than {}, kept {}",
                report.removed.len(),
                format_duration(older_than),
                report.kept
            );
            Ok(EXIT_OK)
        }
        Commands::Inspect {
            ..
        }
        | Commands::Config
        | Commands::DefConfig => Ok(EXIT_OK),
    }
}

/// Retryable store or tool errors ask the delivery layer to redeliver.
fn error_code(report: &miette::Report) -> i32 {
    match report.downcast_ref::<RepoError>() {
        Some(err) if err.is_retryable() => EXIT_TEMPFAIL,
        _ => EXIT_FAILURE,
    }
}

#[tokio::main]
async fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    let args = Args::parse();
    setup_logging(&args);
    set_color(!args.no_color);

    let code = match handle_cli(args).await {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            error_code(&report)
        }
    };
    std::process::exit(code);
}
