//! dirvault - Main entry point
//!
//! Without a subcommand, backs up every configured directory. `restore`
//! lists snapshots or restores one.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use dirvault::config::{Config, DEFAULT_CONFIG_PATH};
use dirvault::naming::snapshot_timestamp;
use dirvault::shutdown::ShutdownCoordinator;
use dirvault::storage::{self, BlobStore};
use dirvault::{utils, BackupExecutor, Outcome, Restorer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Report what would be uploaded without uploading anything
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore a directory from a snapshot, or list snapshots
    Restore(RestoreArgs),
}

#[derive(ClapArgs, Debug)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct RestoreArgs {
    #[command(subcommand)]
    action: Option<RestoreAction>,

    /// Configured directory to restore
    #[arg(required = true)]
    directory: Option<PathBuf>,

    /// Snapshot timestamp (e.g. 2026-02-11T03-00-00Z); latest if omitted
    #[arg(long, value_name = "TS")]
    snapshot: Option<String>,

    /// Extract only this archive entry (e.g. config/configuration.yaml)
    #[arg(long, value_name = "PATH")]
    file: Option<String>,

    /// Extract under this directory instead of the directory's parent
    #[arg(long, value_name = "DIR")]
    dest: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum RestoreAction {
    /// List snapshots, for one directory or all of this host
    List { directory: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.timestamps)?;

    tracing::info!(
        "Starting dirvault v{} (host: {})",
        env!("CARGO_PKG_VERSION"),
        config.hostname
    );

    // Credentials are checked before any work starts
    let credentials = config.credentials()?;
    let store = storage::open(&config.storage, credentials)?;

    let shutdown = ShutdownCoordinator::new();
    shutdown.listen();

    match args.command {
        None => run_backup(&config, &args.config, store, args.dry_run, shutdown.token()).await,
        Some(Command::Restore(restore)) => {
            run_restore(&config, store, restore, shutdown.token()).await
        }
    }
}

async fn run_backup(
    config: &Config,
    config_path: &Path,
    store: Arc<dyn BlobStore>,
    dry_run: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let report = BackupExecutor::new(store, &config.hostname, config.checksums_path(config_path))
        .dry_run(dry_run)
        .with_cancel(cancel)
        .with_spool_dir(config.state.spool_dir.clone())
        .execute(&config.directories, Utc::now())
        .await?;

    if dry_run {
        for entry in &report.outcomes {
            match &entry.outcome {
                Outcome::Planned { key } => println!("{} -> {}", entry.directory.display(), key),
                Outcome::Skipped => println!("{} unchanged", entry.directory.display()),
                _ => {}
            }
        }
    }

    report.into_result()?;
    Ok(())
}

async fn run_restore(
    config: &Config,
    store: Arc<dyn BlobStore>,
    args: RestoreArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let restorer = Restorer::new(store, &config.hostname).with_cancel(cancel);

    if let Some(RestoreAction::List { directory }) = args.action {
        let keys = restorer.list_snapshots(directory.as_deref()).await?;
        if keys.is_empty() {
            match directory {
                Some(dir) => println!("No backups found for {}", dir.display()),
                None => println!("No backups found"),
            }
        }
        for key in keys {
            println!("{}  {}", snapshot_timestamp(&key).unwrap_or("-"), key);
        }
        return Ok(());
    }

    let directory = args
        .directory
        .context("a directory to restore is required")?;
    if !config.directories.contains(&directory) {
        tracing::warn!("{} is not a configured directory", directory.display());
    }

    let key = restorer
        .resolve_snapshot(&directory, args.snapshot.as_deref())
        .await?;
    let dest = args
        .dest
        .unwrap_or_else(|| Restorer::default_destination(&directory));

    restorer.restore(&key, &dest, args.file.as_deref()).await?;
    tracing::info!("Restore complete");
    Ok(())
}
