//! dfb - dated file backup

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod config;
mod locks;
mod util;

/// Dated, append-only file backups with human-decodable names
#[derive(Parser)]
#[command(name = "dfb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the backup configuration
    #[arg(short, long, global = true, default_value = "dfb.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a template configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Back up the source to the destination
    Backup {
        /// Only back up below this subdirectory
        #[arg(long)]
        subdir: Option<String>,
        /// Plan and report without acting
        #[arg(long)]
        dry_run: bool,
        /// Write the planned actions as jsonl instead of executing ("-" for stdout)
        #[arg(long)]
        dump: Option<PathBuf>,
        /// Rebuild the index from the destination before planning
        #[arg(long)]
        refresh: bool,
        /// Skip sidecar enrichment during --refresh
        #[arg(long)]
        no_snapshots: bool,
    },
    /// Delete artifacts no longer needed to restore at or after a cutoff
    Prune {
        /// Cutoff time expression (e.g. "30 days", "2024-01-01", "u1700000000")
        when: Option<String>,
        /// Keep N extra versions older than each anchor (negative shifts forward)
        #[arg(short = 'N', long, default_value_t = 0)]
        keep: i64,
        /// Only prune below this subdirectory
        #[arg(long)]
        subdir: Option<String>,
        /// Prune these exact real paths instead of using a cutoff
        #[arg(long)]
        rpath: Vec<String>,
        /// With --rpath: also prune references that would otherwise break
        #[arg(long)]
        force: bool,
        /// Plan and report without acting
        #[arg(long)]
        dry_run: bool,
        /// Write the planned prunes as jsonl instead of executing ("-" for stdout)
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// List files at a point in time
    Ls {
        /// Directory to list
        path: Option<String>,
        /// Time expression; defaults to now
        #[arg(long)]
        at: Option<String>,
        /// Only consider versions at or after this time
        #[arg(long)]
        after: Option<String>,
        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// Include deleted paths
        #[arg(long)]
        deleted: bool,
    },
    /// Print the directory tree at a point in time
    Tree {
        /// Root of the tree to print
        path: Option<String>,
        /// Time expression; defaults to now
        #[arg(long)]
        at: Option<String>,
        /// Limit display depth
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// Show every stored version of one file
    Versions {
        /// Apparent path to inspect
        apath: String,
        /// Count references to each version
        #[arg(long)]
        ref_count: bool,
    },
    /// List run timestamps, optionally within a window
    Timestamps {
        /// Only consider this subdirectory
        path: Option<String>,
        /// Lower bound time expression
        #[arg(long)]
        after: Option<String>,
        /// Upper bound time expression
        #[arg(long)]
        before: Option<String>,
    },
    /// Export the state at a point in time as jsonl
    Snapshot {
        /// Only export this subdirectory
        path: Option<String>,
        /// Time expression; defaults to now
        #[arg(long)]
        at: Option<String>,
        /// Export every stored version, not just the state
        #[arg(long)]
        export: bool,
        /// Output file ("-" or omitted for stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rebuild the index from the authoritative destination listing
    Refresh {
        /// Skip sidecar enrichment
        #[arg(long)]
        no_snapshots: bool,
    },
    /// Load action-dump files into the index
    Import {
        /// jsonl files (optionally .gz) to load
        files: Vec<PathBuf>,
        /// Reset the index before loading
        #[arg(long)]
        reset: bool,
    },
    /// Materialize the state at a point in time into a local directory
    Restore {
        /// Destination directory for restored files
        dest: PathBuf,
        /// Time expression; defaults to now
        #[arg(long)]
        at: Option<String>,
        /// Only restore this subdirectory
        #[arg(long)]
        subdir: Option<String>,
    },
    /// Show aggregate information about the backup
    Summary,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            dfb_engine::exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::Init { force } => cmd::init::run(&cli.config, *force),
        Commands::Backup {
            subdir,
            dry_run,
            dump,
            refresh,
            no_snapshots,
        } => cmd::backup::run(
            &cli.config,
            subdir.as_deref().unwrap_or(""),
            *dry_run,
            dump.as_deref(),
            *refresh,
            !*no_snapshots,
        ),
        Commands::Prune {
            when,
            keep,
            subdir,
            rpath,
            force,
            dry_run,
            dump,
        } => cmd::prune::run(
            &cli.config,
            when.as_deref(),
            *keep,
            subdir.as_deref().unwrap_or(""),
            rpath,
            *force,
            *dry_run,
            dump.as_deref(),
        ),
        Commands::Ls {
            path,
            at,
            after,
            recursive,
            deleted,
        } => cmd::ls::run(
            &cli.config,
            path.as_deref().unwrap_or(""),
            at.as_deref(),
            after.as_deref(),
            *recursive,
            *deleted,
        ),
        Commands::Tree { path, at, max_depth } => cmd::tree::run(
            &cli.config,
            path.as_deref().unwrap_or(""),
            at.as_deref(),
            *max_depth,
        ),
        Commands::Versions { apath, ref_count } => {
            cmd::versions::run(&cli.config, apath, *ref_count)
        }
        Commands::Timestamps { path, after, before } => cmd::timestamps::run(
            &cli.config,
            path.as_deref().unwrap_or(""),
            after.as_deref(),
            before.as_deref(),
        ),
        Commands::Snapshot {
            path,
            at,
            export,
            output,
        } => cmd::snapshot::run(
            &cli.config,
            path.as_deref().unwrap_or(""),
            at.as_deref(),
            *export,
            output.as_deref(),
        ),
        Commands::Refresh { no_snapshots } => {
            cmd::refresh::run(&cli.config, !*no_snapshots)
        }
        Commands::Import { files, reset } => cmd::import::run(&cli.config, files, *reset),
        Commands::Restore { dest, at, subdir } => cmd::restore::run(
            &cli.config,
            dest,
            at.as_deref(),
            subdir.as_deref().unwrap_or(""),
        ),
        Commands::Summary => cmd::summary::run(&cli.config),
    }
}
