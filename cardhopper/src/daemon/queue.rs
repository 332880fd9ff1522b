//! Sequential ingest queue.
//!
//! Volumes are ingested one at a time in arrival order. Removing a volume
//! drops it from the queue and aborts its run if it is the active one. A
//! volume announced again while it is being ingested gets one more pass after
//! the current run, which picks up files the first scan could not see.

use crate::config::IngestSettings;
use crate::events::VolumeEvent;
use crate::executor::IngestEngine;
use crate::volume::Volume;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMMAND_CAPACITY: usize = 32;

/// Requests from the shell layer.
#[derive(Debug, Clone)]
pub enum QueueCommand {
    /// Queue a volume explicitly, optionally with a label for this run
    Enqueue { volume: Volume, label: Option<String> },
    /// Stop starting new runs; the active one finishes
    Pause,
    Resume,
}

/// Cloneable sender for [`QueueCommand`]s.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<QueueCommand>,
}

impl QueueHandle {
    pub async fn enqueue(&self, volume: Volume, label: Option<String>) -> bool {
        self.send(QueueCommand::Enqueue { volume, label }).await
    }

    pub async fn pause(&self) -> bool {
        self.send(QueueCommand::Pause).await
    }

    pub async fn resume(&self) -> bool {
        self.send(QueueCommand::Resume).await
    }

    async fn send(&self, command: QueueCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }
}

#[derive(Debug, Clone)]
struct QueuedVolume {
    volume: Volume,
    label: Option<String>,
}

struct ActiveIngest {
    mountpoint: PathBuf,
    label: Option<String>,
    handle: JoinHandle<()>,
    /// Set when the volume is announced again mid-run
    rerun: Option<QueuedVolume>,
}

/// Drives the [`IngestEngine`] from volume events and commands.
pub struct IngestQueue {
    engine: IngestEngine,
    settings: watch::Receiver<IngestSettings>,
    commands_tx: mpsc::Sender<QueueCommand>,
    commands_rx: mpsc::Receiver<QueueCommand>,
    pending: VecDeque<QueuedVolume>,
    paused: bool,
    active: Option<ActiveIngest>,
}

impl IngestQueue {
    pub fn new(engine: IngestEngine, settings: watch::Receiver<IngestSettings>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        Self {
            engine,
            settings,
            commands_tx,
            commands_rx,
            pending: VecDeque::new(),
            paused: false,
            active: None,
        }
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            tx: self.commands_tx.clone(),
        }
    }

    /// Process volume events and commands until `shutdown` fires.
    ///
    /// On shutdown the active run is aborted and awaited so its manifest is on
    /// disk before this returns.
    pub async fn run(
        mut self,
        mut volumes: mpsc::Receiver<VolumeEvent>,
        shutdown: CancellationToken,
    ) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<PathBuf>();

        info!("Ingest queue started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = volumes.recv() => self.on_volume_event(event),
                Some(command) = self.commands_rx.recv() => self.on_command(command),
                Some(mountpoint) = done_rx.recv() => self.on_run_finished(&mountpoint),
            }

            self.start_next(&done_tx);
        }

        self.shutdown().await;
    }

    fn on_volume_event(&mut self, event: VolumeEvent) {
        match event {
            VolumeEvent::Added(volume) => {
                if self.paused {
                    info!("Paused, skipping ingest of {}", volume.mountpoint.display());
                    return;
                }
                self.push(volume, None);
            }
            VolumeEvent::Removed(volume) => {
                self.engine.abort_volume(&volume.mountpoint);
                if let Some(active) = self.active.as_mut() {
                    if active.mountpoint == volume.mountpoint {
                        active.rerun = None;
                    }
                }
                let before = self.pending.len();
                self.pending.retain(|q| q.volume.mountpoint != volume.mountpoint);
                if self.pending.len() != before {
                    info!("Dropped {} from the queue", volume.mountpoint.display());
                }
            }
        }
    }

    fn on_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::Enqueue { volume, label } => self.push(volume, label),
            QueueCommand::Pause => {
                self.paused = true;
                info!("Paused");
            }
            QueueCommand::Resume => {
                self.paused = false;
                info!("Resumed ({} pending)", self.pending.len());
            }
        }
    }

    fn on_run_finished(&mut self, mountpoint: &Path) {
        if !self.active.as_ref().is_some_and(|a| a.mountpoint == mountpoint) {
            return;
        }
        if let Some(again) = self.active.take().and_then(|a| a.rerun) {
            info!("Ingesting {} again for late arrivals", mountpoint.display());
            self.pending.push_back(again);
        }
    }

    fn push(&mut self, volume: Volume, label: Option<String>) {
        let mountpoint = &volume.mountpoint;

        if let Some(active) = self.active.as_mut().filter(|a| &a.mountpoint == mountpoint) {
            if active.rerun.is_none() {
                info!("{} changed during ingest, another pass will follow", mountpoint.display());
            }
            let label = label.or_else(|| active.label.clone());
            active.rerun = Some(QueuedVolume { volume, label });
            return;
        }

        if self.pending.iter().any(|q| &q.volume.mountpoint == mountpoint) {
            debug!("{} is already queued", mountpoint.display());
            return;
        }

        info!("Queued {} ({})", mountpoint.display(), volume.display_name());
        self.pending.push_back(QueuedVolume { volume, label });
    }

    fn start_next(&mut self, done_tx: &mpsc::UnboundedSender<PathBuf>) {
        if self.active.is_some() || self.paused {
            return;
        }
        let Some(next) = self.pending.pop_front() else {
            return;
        };

        // Each run works from the settings current at its start
        let settings = self.settings.borrow().clone();
        let engine = self.engine.clone();
        let done_tx = done_tx.clone();
        let mountpoint = next.volume.mountpoint.clone();
        let label = next.label.clone();

        let handle = tokio::spawn(async move {
            let QueuedVolume { volume, label } = next;
            match engine.ingest(&volume, &settings, label.as_deref()).await {
                Ok(summary) => debug!(
                    "Run for {} finished: {} files, {} errors",
                    summary.volume_name, summary.copied_count, summary.error_count
                ),
                Err(e) => error!("Ingest failed for {}: {}", volume.mountpoint.display(), e),
            }
            let _ = done_tx.send(volume.mountpoint);
        });

        self.active = Some(ActiveIngest {
            mountpoint,
            label,
            handle,
            rerun: None,
        });
    }

    async fn shutdown(&mut self) {
        info!("Ingest queue shutting down");
        self.pending.clear();

        if let Some(active) = self.active.take() {
            self.engine.abort();
            if let Err(e) = active.handle.await {
                warn!("Ingest task for {} ended abnormally: {}", active.mountpoint.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, IngestEvent};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    struct Harness {
        volumes: mpsc::Sender<VolumeEvent>,
        handle: QueueHandle,
        events: broadcast::Receiver<IngestEvent>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
        dest: TempDir,
    }

    fn harness() -> Harness {
        let dest = TempDir::new().unwrap();
        let engine = IngestEngine::new(EventBus::new()).with_space_floor(0);
        let events = engine.events().subscribe();
        let settings = IngestSettings::for_destination(dest.path());
        let (_settings_tx, settings_rx) = watch::channel(settings);

        let queue = IngestQueue::new(engine, settings_rx);
        let handle = queue.handle();
        let (volumes, volumes_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(queue.run(volumes_rx, shutdown.clone()));

        Harness {
            volumes,
            handle,
            events,
            shutdown,
            task,
            dest,
        }
    }

    fn card(files: usize) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("DCIM")).unwrap();
        for i in 0..files {
            let path = dir.path().join(format!("DCIM/IMG_{i:04}.JPG"));
            std::fs::write(path, vec![1u8; 32 * 1024]).unwrap();
        }
        dir
    }

    fn volume(dir: &TempDir, name: &str) -> Volume {
        Volume {
            mountpoint: dir.path().to_path_buf(),
            label: Some(name.to_string()),
            device: None,
            is_removable: true,
        }
    }

    async fn next_terminal(events: &mut broadcast::Receiver<IngestEvent>) -> IngestEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.unwrap();
                if event.is_terminal() {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    fn volume_name(event: &IngestEvent) -> &str {
        match event {
            IngestEvent::Completed { volume_name, .. }
            | IngestEvent::Failed { volume_name, .. }
            | IngestEvent::Aborted { volume_name, .. } => volume_name,
            other => panic!("not terminal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runs_volumes_in_order() {
        let mut h = harness();
        let (a, b) = (card(3), card(2));

        h.volumes.send(VolumeEvent::Added(volume(&a, "A"))).await.unwrap();
        h.volumes.send(VolumeEvent::Added(volume(&b, "B"))).await.unwrap();
        // Duplicate arrival is ignored
        h.volumes.send(VolumeEvent::Added(volume(&b, "B"))).await.unwrap();

        assert_eq!(volume_name(&next_terminal(&mut h.events).await), "A");
        assert_eq!(volume_name(&next_terminal(&mut h.events).await), "B");

        h.shutdown.cancel();
        h.task.await.unwrap();
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_paused_ignores_arrivals_but_keeps_explicit_enqueue() {
        let mut h = harness();
        let (a, b) = (card(1), card(1));

        assert!(h.handle.pause().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.volumes.send(VolumeEvent::Added(volume(&a, "A"))).await.unwrap();
        assert!(h.handle.enqueue(volume(&b, "B"), Some("Trip".to_string())).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.events.try_recv().is_err());

        assert!(h.handle.resume().await);
        assert_eq!(volume_name(&next_terminal(&mut h.events).await), "B");

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_removed_pending_volume_is_not_ingested() {
        let mut h = harness();
        let (a, b) = (card(1), card(1));

        assert!(h.handle.pause().await);
        assert!(h.handle.enqueue(volume(&a, "A"), None).await);
        assert!(h.handle.enqueue(volume(&b, "B"), None).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.volumes.send(VolumeEvent::Removed(volume(&a, "A"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.handle.resume().await);

        assert_eq!(volume_name(&next_terminal(&mut h.events).await), "B");

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_aborts_active_run() {
        let mut h = harness();
        let a = card(400);

        h.volumes.send(VolumeEvent::Added(volume(&a, "A"))).await.unwrap();
        loop {
            if matches!(h.events.recv().await.unwrap(), IngestEvent::Started { .. }) {
                break;
            }
        }

        h.shutdown.cancel();
        h.task.await.unwrap();

        assert!(matches!(next_terminal(&mut h.events).await, IngestEvent::Aborted { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_arrival_during_active_run_gets_another_pass() {
        let mut h = harness();
        let folder = card(300);

        h.volumes.send(VolumeEvent::Added(volume(&folder, "In"))).await.unwrap();
        loop {
            if matches!(h.events.recv().await.unwrap(), IngestEvent::Started { .. }) {
                break;
            }
        }

        std::fs::write(folder.path().join("DCIM/LATE_9999.JPG"), b"late arrival").unwrap();
        h.volumes.send(VolumeEvent::Added(volume(&folder, "In"))).await.unwrap();

        assert_eq!(volume_name(&next_terminal(&mut h.events).await), "In");
        match next_terminal(&mut h.events).await {
            IngestEvent::Completed { skipped_count, .. } => assert!(skipped_count >= 300),
            other => panic!("expected a completed second pass, got {:?}", other),
        }

        let late_copied = walkdir::WalkDir::new(h.dest.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name() == "LATE_9999.JPG");
        assert!(late_copied);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }
}
