use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "rpmrepo",
    about = "Keeps RPM repositories in object storage indexed as packages arrive",
    version,
    arg_required_else_help = true
)]
pub struct Args {
    /// Unimportant details (-vv for everything)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Configuration file to use instead of the default
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Process the uploads named by blob-created notifications
    Handle {
        /// File with the notification JSON, `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Process upload keys directly
    #[command(arg_required_else_help = true)]
    Process {
        /// Keys of uploaded blobs, e.g. upload/demo-1.0.0-1.el8.x86_64.rpm
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Classify every upload and bring every repository up to date
    Reconcile {
        /// Merge every repository, not only those lagging behind
        #[arg(long)]
        force: bool,
    },

    /// Regenerate one repository index
    #[command(arg_required_else_help = true)]
    Merge {
        /// Distribution such as `el8` or `el/8`; ignored for flat layouts
        target: String,
    },

    /// Show what the indexer would do with a local RPM
    #[command(arg_required_else_help = true)]
    Inspect {
        file: PathBuf,
    },

    /// Show the state of every package and repository
    Status,

    /// Remove staging blobs left behind by interrupted runs
    Gc {
        /// Minimum age, e.g. 12h or 2d (defaults to `staging_retention`)
        #[arg(long)]
        older_than: Option<String>,
    },

    /// Print the effective configuration
    Config,

    /// Print the default configuration with documentation
    #[command(name = "defconfig")]
    DefConfig,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_handle_reads_stdin_by_default() {
        let args = Args::parse_from(["rpmrepo", "handle"]);
        assert!(matches!(args.command, Commands::Handle { ref input } if input == "-"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["rpmrepo", "gc", "--older-than", "2d", "--json"]);
        assert!(args.json);
        assert!(matches!(
            args.command,
            Commands::Gc { older_than: Some(ref value) } if value == "2d"
        ));
    }

    #[test]
    fn test_process_requires_keys() {
        assert!(Args::try_parse_from(["rpmrepo", "process"]).is_err());
        assert!(Args::try_parse_from(["rpmrepo", "-v", "-q", "status"]).is_err());
    }
}
