//! Removable volume detection.
//!
//! A [`VolumeSource`] knows how to list removable volumes on one platform and,
//! optionally, how to get notified that something changed. The
//! [`VolumeWatcher`] treats every notification only as a hint: it re-enumerates,
//! diffs against the volumes it already knows, and emits `Added`/`Removed`
//! events. A fixed-interval poll runs regardless of notification support.

pub mod folders;
pub mod linux;
pub mod macos;
pub mod windows;

use crate::events::VolumeEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A mounted removable volume, or a watched folder standing in for one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Identity key
    pub mountpoint: PathBuf,
    pub label: Option<String>,
    pub device: Option<String>,
    pub is_removable: bool,
}

impl Volume {
    /// Pseudo-volume for a watched folder.
    pub fn for_folder(path: &Path) -> Self {
        Self {
            mountpoint: path.to_path_buf(),
            label: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            device: None,
            is_removable: false,
        }
    }

    /// Label if present, otherwise the last mountpoint component.
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .filter(|l| !l.is_empty())
            .or_else(|| {
                self.mountpoint
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| self.mountpoint.display().to_string())
    }
}

/// Sender used by platform signal sources to request a re-enumeration.
pub type ChangeTrigger = mpsc::Sender<()>;

/// Platform capability: authoritative enumeration plus optional change hints.
pub trait VolumeSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Currently mounted removable volumes. Blocking; run off the async executor.
    fn enumerate(&self) -> io::Result<Vec<Volume>>;

    /// Start a native change notifier. The returned watcher must be kept alive;
    /// `Ok(None)` means the platform relies on polling alone.
    fn watch_for_changes(
        &self,
        trigger: ChangeTrigger,
    ) -> io::Result<Option<notify::RecommendedWatcher>>;
}

/// Source for the platform this binary was built for.
pub fn platform_source() -> Arc<dyn VolumeSource> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(macos::MacosVolumeSource::new())
    }
    #[cfg(windows)]
    {
        Arc::new(windows::WindowsVolumeSource::new())
    }
    #[cfg(not(any(target_os = "macos", windows)))]
    {
        Arc::new(linux::LinuxVolumeSource::new())
    }
}

/// Volumes present in `current` but not `known` (added) and vice versa (removed).
pub fn diff_volumes(
    known: &BTreeMap<PathBuf, Volume>,
    current: &BTreeMap<PathBuf, Volume>,
) -> Vec<VolumeEvent> {
    let added = current
        .iter()
        .filter(|(mp, _)| !known.contains_key(*mp))
        .map(|(_, v)| VolumeEvent::Added(v.clone()));

    let removed = known
        .iter()
        .filter(|(mp, _)| !current.contains_key(*mp))
        .map(|(_, v)| VolumeEvent::Removed(v.clone()));

    added.chain(removed).collect()
}

/// Forward a notify result as a re-enumeration hint, dropping bursts.
pub(crate) fn forward_change(
    trigger: &ChangeTrigger,
    source: &str,
    res: notify::Result<notify::Event>,
) {
    match res {
        Ok(event) => {
            debug!("[{}] change: {:?}", source, event.kind);
            // A full channel already holds a pending rescan
            let _ = trigger.try_send(());
        }
        Err(e) => warn!("[{}] Watcher error: {}", source, e),
    }
}

/// Diffs successive enumerations and emits volume events.
pub struct VolumeWatcher {
    source: Arc<dyn VolumeSource>,
    known: Arc<Mutex<BTreeMap<PathBuf, Volume>>>,
    poll_interval: Duration,
    events: mpsc::Sender<VolumeEvent>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl VolumeWatcher {
    pub fn new(
        source: Arc<dyn VolumeSource>,
        poll_interval: Duration,
        events: mpsc::Sender<VolumeEvent>,
    ) -> Self {
        Self {
            source,
            known: Arc::new(Mutex::new(BTreeMap::new())),
            poll_interval,
            events,
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    /// Start watching. Volumes already mounted are reported as added.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let source = Arc::clone(&self.source);
        let known = Arc::clone(&self.known);
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let poll_interval = self.poll_interval;

        self.task = Some(tokio::spawn(async move {
            let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);

            // Dropping the notifier stops it, so it lives as long as this task
            let _notifier = match source.watch_for_changes(trigger_tx) {
                Ok(Some(watcher)) => {
                    info!("[{}] Native change notifications active", source.name());
                    Some(watcher)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("[{}] Platform watcher failed to start: {}", source.name(), e);
                    None
                }
            };

            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                "Volume watcher started ({}, polling every {:?})",
                source.name(),
                poll_interval
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                    Some(()) = trigger_rx.recv() => {}
                }

                for event in rescan(&source, &known).await {
                    if events.send(event).await.is_err() {
                        debug!("Volume event receiver dropped, stopping watcher");
                        return;
                    }
                }
            }

            info!("Volume watcher stopped");
        }));
    }

    /// Stop watching and wait for the background task to finish.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Snapshot of the volumes currently considered mounted.
    pub async fn known_volumes(&self) -> Vec<Volume> {
        self.known.lock().await.values().cloned().collect()
    }
}

/// Enumerate once, replace the known set, and return the differences.
async fn rescan(
    source: &Arc<dyn VolumeSource>,
    known: &Mutex<BTreeMap<PathBuf, Volume>>,
) -> Vec<VolumeEvent> {
    let current = match enumerate_blocking(source).await {
        Ok(volumes) => volumes,
        Err(e) => {
            warn!("Volume poll error: {}", e);
            return Vec::new();
        }
    };

    let current: BTreeMap<PathBuf, Volume> = current
        .into_iter()
        .map(|v| (v.mountpoint.clone(), v))
        .collect();

    let mut known = known.lock().await;
    let events = diff_volumes(&known, &current);
    for event in &events {
        match event {
            VolumeEvent::Added(v) => info!("Volume added: {}", v.mountpoint.display()),
            VolumeEvent::Removed(v) => info!("Volume removed: {}", v.mountpoint.display()),
        }
    }
    *known = current;
    events
}

async fn enumerate_blocking(source: &Arc<dyn VolumeSource>) -> io::Result<Vec<Volume>> {
    // Enumeration may spawn processes or read /proc; keep it off the executor
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || source.enumerate())
        .await
        .map_err(io::Error::other)?
}
