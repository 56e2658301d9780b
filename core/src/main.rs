//! Coordinator daemon entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use tracing::{debug, info};

use atlas_core::{Config, CoordinatorHandle};

#[derive(Parser, Debug)]
#[command(name = "atlas-core", version, about = "Hierarchical task and knowledge coordinator")]
struct Cli {
    /// Path to a config file (overrides the .atlas.yml / user-config lookup)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the storage directory from config
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Run one recovery pass and exit instead of serving
    #[arg(long)]
    recover_only: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a gzip-compressed JSON backup of the store to a file
    Export {
        /// Destination path for the backup file
        out: PathBuf,
    },
    /// Load tasks and knowledge from a backup file into the store
    Import {
        /// Path to a backup file previously produced by `export`
        input: PathBuf,
    },
    /// Find and optionally fix dangling parent/dependency references
    Repair {
        /// Report issues without modifying any task
        #[arg(long)]
        dry_run: bool,
    },
}

fn setup_logging(level: Option<&str>) {
    let level = level.unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref());

    let mut config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;
    if let Some(dir) = &cli.storage_dir {
        config.storage.base_dir = dir.to_string_lossy().into_owned();
    }
    debug!(?config.storage.base_dir, "resolved storage directory");

    let base_dir = PathBuf::from(&config.storage.base_dir);
    std::fs::create_dir_all(&base_dir).context("failed to create storage directory")?;

    let handle = match CoordinatorHandle::spawn(&base_dir, config).await {
        Ok(handle) => handle,
        Err(e) if e.kind == atlas_core::ErrorKind::RecoveryRequired => {
            tracing::error!(error = %e, "startup recovery failed, manual intervention required");
            std::process::exit(2);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start coordinator");
            std::process::exit(1);
        }
    };
    info!("coordinator started");

    if cli.recover_only {
        info!("recovery pass complete, exiting");
        handle.shutdown().await.ok();
        return Ok(());
    }

    if let Some(command) = cli.command {
        let result = run_command(&handle, command).await;
        handle.shutdown().await.ok();
        return result;
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("ctrl-c received, shutting down");
    }

    handle.shutdown().await.context("graceful shutdown failed")?;
    info!("coordinator stopped cleanly");
    Ok(())
}

async fn run_command(handle: &CoordinatorHandle, command: Command) -> Result<()> {
    match command {
        Command::Export { out } => {
            let bytes = handle.export_backup().await.context("export failed")?;
            std::fs::write(&out, bytes).context("failed to write backup file")?;
            info!(path = %out.display(), "backup written");
        }
        Command::Import { input } => {
            let bytes = std::fs::read(&input).context("failed to read backup file")?;
            let summary = handle.import_backup(bytes).await.context("import failed")?;
            info!(tasks = summary.tasks_imported, knowledge = summary.knowledge_imported, "backup imported");
        }
        Command::Repair { dry_run } => {
            let report = handle.repair_relationships(dry_run).await.context("repair failed")?;
            info!(fixed = report.fixed, issues = report.issues.len(), dry_run, "relationship repair complete");
            for issue in &report.issues {
                tracing::warn!("{issue}");
            }
        }
    }
    Ok(())
}
