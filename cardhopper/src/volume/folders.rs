//! Watched folders treated as pseudo-volumes.
//!
//! New files under a watched folder restart that folder's quiet-period timer.
//! Once the folder has been quiet for the whole period a `VolumeEvent::Added`
//! is emitted for it, so a camera tethering dump or a slow network copy is
//! ingested once, after it settles.

use super::Volume;
use crate::events::VolumeEvent;
use crate::executor::manifest::MANIFEST_FILE_NAME;
use crate::transfer::TEMP_SUFFIX;
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct FolderWatcher {
    folders: Vec<PathBuf>,
    quiet_period: Duration,
    events: mpsc::Sender<VolumeEvent>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FolderWatcher {
    pub fn new(
        folders: Vec<PathBuf>,
        quiet_period: Duration,
        events: mpsc::Sender<VolumeEvent>,
    ) -> Self {
        Self {
            folders,
            quiet_period,
            events,
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    /// Start watching every configured folder that exists.
    pub fn start(&mut self) -> io::Result<()> {
        if self.task.is_some() || self.folders.is_empty() {
            return Ok(());
        }

        let (arrival_tx, arrival_rx) = mpsc::unbounded_channel();
        let folders = self.folders.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_arrival(&event.kind) => {
                    for path in event.paths.iter().filter(|p| !is_own_artifact(p)) {
                        if let Some(folder) = owning_folder(&folders, path) {
                            let _ = arrival_tx.send(folder.to_path_buf());
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Folder watcher error: {}", e),
            },
            NotifyConfig::default(),
        )
        .map_err(io::Error::other)?;

        for folder in &self.folders {
            if !folder.is_dir() {
                warn!("Watched folder {} does not exist, skipping", folder.display());
                continue;
            }
            match watcher.watch(folder, RecursiveMode::Recursive) {
                Ok(()) => info!("Watching folder {}", folder.display()),
                Err(e) => warn!("Cannot watch folder {}: {}", folder.display(), e),
            }
        }

        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let quiet_period = self.quiet_period;

        self.task = Some(tokio::spawn(async move {
            // Keeps the notify watcher alive for the life of the task
            let _watcher = watcher;
            debounce_arrivals(arrival_rx, quiet_period, events, shutdown).await;
        }));

        Ok(())
    }

    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

fn is_arrival(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)))
}

/// Our own temp files and manifests must not retrigger an ingest.
fn is_own_artifact(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.ends_with(TEMP_SUFFIX) || n == MANIFEST_FILE_NAME
        })
        .unwrap_or(false)
}

/// Longest watched folder containing `path`.
fn owning_folder<'a>(folders: &'a [PathBuf], path: &Path) -> Option<&'a Path> {
    folders
        .iter()
        .filter(|f| path.starts_with(f))
        .max_by_key(|f| f.components().count())
        .map(PathBuf::as_path)
}

/// Emit one `Added` per folder after `quiet_period` without new arrivals.
///
/// Runs until `shutdown` fires, the receiver of `events` goes away, or the
/// arrival channel closes with nothing pending.
pub async fn debounce_arrivals(
    mut arrivals: mpsc::UnboundedReceiver<PathBuf>,
    quiet_period: Duration,
    events: mpsc::Sender<VolumeEvent>,
    shutdown: CancellationToken,
) {
    let mut deadlines: BTreeMap<PathBuf, Instant> = BTreeMap::new();
    let mut arrivals_open = true;

    loop {
        let next = deadlines.values().min().copied();
        if !arrivals_open && next.is_none() {
            break;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            arrival = arrivals.recv(), if arrivals_open => match arrival {
                Some(folder) => {
                    debug!("New file under {}", folder.display());
                    deadlines.insert(folder, Instant::now() + quiet_period);
                }
                None => arrivals_open = false,
            },
            _ = tokio::time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                let now = Instant::now();
                let settled: Vec<PathBuf> = deadlines
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(folder, _)| folder.clone())
                    .collect();

                for folder in settled {
                    deadlines.remove(&folder);
                    info!("Watched folder {} settled, queueing ingest", folder.display());
                    if events.send(VolumeEvent::Added(Volume::for_folder(&folder))).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
