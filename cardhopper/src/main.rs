//! CardHopper - Main entry point
//!
//! Watches for memory cards and ingests their media into an organized library.

use anyhow::{bail, Context, Result};
use cardhopper::config::Config;
use cardhopper::daemon::{IngestQueue, ShutdownCoordinator};
use cardhopper::events::{EventBus, IngestEvent};
use cardhopper::executor::IngestEngine;
use cardhopper::transfer::clean_temp_files;
use cardhopper::transfer::progress::{format_bytes, format_duration, format_speed};
use cardhopper::utils;
use cardhopper::volume::folders::FolderWatcher;
use cardhopper::volume::{platform_source, Volume, VolumeWatcher};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

const VOLUME_EVENT_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print events and listings as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch for removable volumes and ingest them as they appear (default)
    Watch,

    /// Ingest a single directory as if it were a mounted card
    Ingest {
        path: PathBuf,

        /// Label appended to the destination folder and available as {label}
        #[arg(long)]
        label: Option<String>,
    },

    /// List the removable volumes currently detected
    Volumes,

    /// Remove leftover temp files from the destination
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting cardhopper v{}", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => run_watch(config, args.config, args.json).await,
        Command::Ingest { path, label } => {
            run_ingest(&config, &path, label.as_deref(), args.json).await
        }
        Command::Volumes => list_volumes(args.json).await,
        Command::Clean => {
            let removed = sweep_temp_files(&config.ingest.destination).await;
            println!(
                "Removed {} temp file(s) from {}",
                removed,
                config.ingest.destination.display()
            );
            Ok(())
        }
    }
}

async fn run_watch(config: Config, config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let destination = config.ingest.destination.clone();
    let removed = sweep_temp_files(&destination).await;
    if removed > 0 {
        tracing::info!("Cleaned up {} stale temp file(s)", removed);
    }

    let (settings_tx, settings_rx) = watch::channel(config.ingest_settings());

    let bus = EventBus::new();
    let printer = tokio::spawn(print_events(bus.subscribe(), json));
    let engine = IngestEngine::new(bus);
    let queue = IngestQueue::new(engine, settings_rx);

    let (volume_tx, volume_rx) = mpsc::channel(VOLUME_EVENT_CAPACITY);

    let mut volume_watcher = VolumeWatcher::new(
        platform_source(),
        config.watcher.poll_interval(),
        volume_tx.clone(),
    );
    volume_watcher.start();

    let mut folder_watcher = FolderWatcher::new(
        config.watcher.watched_folders.clone(),
        config.watcher.folder_quiet_period(),
        volume_tx,
    );
    if let Err(e) = folder_watcher.start() {
        tracing::warn!("Folder watcher failed to start: {}", e);
    }

    let shutdown_coordinator = ShutdownCoordinator::new();
    let queue_handle = tokio::spawn(queue.run(volume_rx, shutdown_coordinator.token()));

    if let Some(path) = config_path {
        tokio::spawn(reload_on_hangup(path, settings_tx));
    }

    tracing::info!("Watching for volumes, ingesting into {}", destination.display());

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    volume_watcher.stop().await;
    folder_watcher.stop().await;

    match tokio::time::timeout(Duration::from_secs(10), queue_handle).await {
        Ok(Ok(())) => tracing::info!("Ingest queue stopped"),
        Ok(Err(e)) => tracing::error!("Ingest queue task panicked: {}", e),
        Err(_) => tracing::warn!("Ingest queue shutdown timeout, forcing exit"),
    }

    printer.abort();
    Ok(())
}

async fn run_ingest(config: &Config, path: &Path, label: Option<&str>, json: bool) -> Result<()> {
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    let root = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", path.display()))?;

    let bus = EventBus::new();
    let printer = tokio::spawn(print_events(bus.subscribe(), json));
    let engine = IngestEngine::new(bus);

    // Ctrl+C aborts the run cooperatively so the manifest gets saved
    let shutdown_coordinator = ShutdownCoordinator::new();
    let abort_engine = engine.clone();
    let shutdown_token = shutdown_coordinator.token();
    tokio::spawn(async move {
        shutdown_coordinator.wait_for_signal().await;
        abort_engine.abort();
    });

    let result = engine
        .ingest(&Volume::for_folder(&root), &config.ingest_settings(), label)
        .await;

    shutdown_token.cancel();
    // Let the printer drain the terminal event
    drop(engine);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    let summary = result.with_context(|| format!("Ingest of {} failed", root.display()))?;
    if summary.error_count > 0 {
        bail!("{} file(s) failed to ingest", summary.error_count);
    }
    Ok(())
}

async fn list_volumes(json: bool) -> Result<()> {
    let source = platform_source();
    let volumes = tokio::task::spawn_blocking(move || source.enumerate())
        .await?
        .context("Failed to enumerate volumes")?;

    for volume in &volumes {
        if json {
            println!("{}", serde_json::to_string(volume)?);
        } else {
            println!(
                "{}\t{}\t{}",
                volume.mountpoint.display(),
                volume.display_name(),
                volume.device.as_deref().unwrap_or("-")
            );
        }
    }

    if volumes.is_empty() && !json {
        println!("No removable volumes found");
    }
    Ok(())
}

async fn sweep_temp_files(destination: &Path) -> usize {
    let root = destination.to_path_buf();
    tokio::task::spawn_blocking(move || clean_temp_files(&root))
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Temp file sweep failed: {}", e);
            0
        })
}

/// Publish a fresh settings snapshot whenever SIGHUP arrives.
#[cfg(unix)]
async fn reload_on_hangup(path: PathBuf, settings: watch::Sender<cardhopper::IngestSettings>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!("Failed to install SIGHUP handler: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match Config::from_file(&path) {
            Ok(config) => {
                tracing::info!("Reloaded configuration from {}", path.display());
                if settings.send(config.ingest_settings()).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Keeping previous configuration: {:#}", e),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_path: PathBuf, _settings: watch::Sender<cardhopper::IngestSettings>) {}

async fn print_events(mut rx: broadcast::Receiver<IngestEvent>, json: bool) {
    loop {
        match rx.recv().await {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Cannot serialize event: {}", e),
            },
            Ok(event) => println!("{}", describe(&event)),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event printer lagged, skipped {} events", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn describe(event: &IngestEvent) -> String {
    match event {
        IngestEvent::Started {
            volume_name,
            file_count,
            total_source_size,
        } => format!(
            "[{}] Importing {} files ({})",
            volume_name,
            file_count,
            format_bytes(*total_source_size)
        ),
        IngestEvent::Progress(p) => format!(
            "[{}] {}/{} ({}%) {} - {}, ETA {}",
            p.volume_name,
            p.current,
            p.total,
            p.percent,
            p.file_name,
            format_speed(p.bytes_per_sec),
            format_duration(Duration::from_millis(p.eta_ms))
        ),
        IngestEvent::Completed {
            volume_name,
            file_count,
            total_size,
            skipped_count,
            error_count,
            elapsed,
        } => format!(
            "[{}] Done: {} files, {} ({} skipped, {} errors) in {}",
            volume_name,
            file_count,
            format_bytes(*total_size),
            skipped_count,
            error_count,
            format_duration(Duration::from_millis(*elapsed))
        ),
        IngestEvent::Failed { volume_name, message } => {
            format!("[{}] Ingest failed: {}", volume_name, message)
        }
        IngestEvent::Aborted {
            volume_name,
            copied_count,
            total_count,
        } => format!(
            "[{}] Aborted: {}/{} files imported",
            volume_name, copied_count, total_count
        ),
        IngestEvent::FileFailed {
            volume_name,
            file_name,
            message,
        } => format!("[{}] {}: {}", volume_name, file_name, message),
    }
}
