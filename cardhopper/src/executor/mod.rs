//! Ingest engine - runs one volume through scan, copy, verify and record.
//!
//! A run moves through `Idle -> Scanning -> Running` and ends in exactly one
//! terminal event (`Completed`, `Failed` or `Aborted`). Files are processed
//! strictly one after another; the manifest at the destination root is the
//! only resume mechanism and is rewritten whole at every exit.

pub mod manifest;

use crate::config::IngestSettings;
use crate::events::{EventBus, IngestEvent, IngestProgressPayload};
use crate::fs::space::{has_headroom, SAFETY_FLOOR_BYTES};
use crate::fs::{hash_file, scan_media, MediaFile};
use crate::ingest::{destination_path, resolve_duplicate, DuplicateAction, NamingOptions};
use crate::transfer::copy_file;
use crate::transfer::progress::{format_bytes, format_speed, percent, ProgressTracker};
use crate::utils::errors::{IngestError, Result};
use crate::volume::Volume;
use chrono::Utc;
use manifest::{Manifest, ManifestEntry};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Total copy attempts when the destination hash does not match the source.
const MAX_COPY_ATTEMPTS: u32 = 3;

/// Where the engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
    Running,
}

/// Counters reported at the end of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub volume_name: String,
    pub file_count: usize,
    /// Files processed, including skipped ones
    pub copied_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub backup_error_count: usize,
    pub bytes_copied: u64,
    pub elapsed: Duration,
}

struct ActiveRun {
    volume: Volume,
    cancel: CancellationToken,
    state: EngineState,
}

/// Clears the active-run slot when the run ends, however it ends.
struct RunSlot {
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        lock(&self.active).take();
    }
}

fn lock(active: &Mutex<Option<ActiveRun>>) -> MutexGuard<'_, Option<ActiveRun>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Result of a run together with the terminal event announcing it.
type RunOutcome = (Result<IngestSummary>, IngestEvent);

/// Called after every primary copy lands, before it is verified.
type AfterCopyHook = fn(&MediaFile, &Path);

/// Outcome of one file that did not fail.
enum FileOutcome {
    /// Manifest entry honoured, nothing touched
    Resumed,
    /// Identical content already at the destination
    Skipped,
    Copied { verified: bool },
}

/// Runs ingests, one at a time.
///
/// Cheap to clone; clones share the active run so any of them can `abort()`.
#[derive(Clone)]
pub struct IngestEngine {
    events: EventBus,
    active: Arc<Mutex<Option<ActiveRun>>>,
    space_floor: u64,
    after_copy: Option<AfterCopyHook>,
}

impl IngestEngine {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            active: Arc::new(Mutex::new(None)),
            space_floor: SAFETY_FLOOR_BYTES,
            after_copy: None,
        }
    }

    /// Override the free-space floor checked before each run.
    pub fn with_space_floor(mut self, bytes: u64) -> Self {
        self.space_floor = bytes;
        self
    }

    #[cfg(test)]
    fn with_after_copy(mut self, hook: AfterCopyHook) -> Self {
        self.after_copy = Some(hook);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> EngineState {
        lock(&self.active)
            .as_ref()
            .map(|run| run.state)
            .unwrap_or(EngineState::Idle)
    }

    /// Volume of the run in progress, if any.
    pub fn current_volume(&self) -> Option<Volume> {
        lock(&self.active).as_ref().map(|run| run.volume.clone())
    }

    /// Cancel the active run. Safe to call repeatedly or with nothing running.
    pub fn abort(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(run) => {
                if !run.cancel.is_cancelled() {
                    info!("Aborting ingest of {}", run.volume.display_name());
                    run.cancel.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Abort only if the active run reads from `mountpoint`.
    pub fn abort_volume(&self, mountpoint: &Path) -> bool {
        let active = lock(&self.active);
        match active.as_ref() {
            Some(run) if run.volume.mountpoint == mountpoint => {
                info!("Volume {} removed during ingest, aborting", mountpoint.display());
                run.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn claim(&self, volume: &Volume) -> Result<(RunSlot, CancellationToken)> {
        let mut active = lock(&self.active);
        if let Some(run) = active.as_ref() {
            return Err(IngestError::AlreadyRunning(run.volume.display_name()));
        }

        let cancel = CancellationToken::new();
        *active = Some(ActiveRun {
            volume: volume.clone(),
            cancel: cancel.clone(),
            state: EngineState::Scanning,
        });

        Ok((
            RunSlot {
                active: Arc::clone(&self.active),
            },
            cancel,
        ))
    }

    fn set_state(&self, state: EngineState) {
        if let Some(run) = lock(&self.active).as_mut() {
            run.state = state;
        }
    }

    /// Ingest every media file on `volume` into `settings.destination`.
    ///
    /// Rejected with [`IngestError::AlreadyRunning`] while another run is
    /// active; no events are emitted in that case.
    pub async fn ingest(
        &self,
        volume: &Volume,
        settings: &IngestSettings,
        label: Option<&str>,
    ) -> Result<IngestSummary> {
        let (slot, cancel) = self.claim(volume)?;
        let (result, terminal) = self.run(volume, settings, label, cancel).await;

        // Subscribers reacting to the terminal event must find the engine idle
        drop(slot);
        self.events.emit(terminal);
        result
    }

    async fn run(
        &self,
        volume: &Volume,
        settings: &IngestSettings,
        label: Option<&str>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let volume_name = volume.display_name();
        let run_id = Uuid::new_v4();

        info!(
            run = %run_id,
            volume = %volume_name,
            "Starting ingest of {} into {}",
            volume.mountpoint.display(),
            settings.destination.display()
        );

        if let Err(e) = self.prepare(settings).await {
            return failed(&volume_name, e);
        }

        let files = match self.scan(volume, settings).await {
            Ok(files) => files,
            Err(e) => return failed(&volume_name, e),
        };

        if files.is_empty() {
            info!("No media files found on {}", volume_name);
            let completed = IngestEvent::Completed {
                volume_name: volume_name.clone(),
                file_count: 0,
                total_size: 0,
                skipped_count: 0,
                error_count: 0,
                elapsed: 0,
            };
            let summary = IngestSummary {
                volume_name,
                ..Default::default()
            };
            return (Ok(summary), completed);
        }

        self.set_state(EngineState::Running);

        let total_source_size: u64 = files.iter().map(|f| f.size).sum();
        self.events.emit(IngestEvent::Started {
            volume_name: volume_name.clone(),
            file_count: files.len(),
            total_source_size,
        });

        let manifest = Manifest::load(&settings.destination).await;

        let mut run = IngestRun {
            events: &self.events,
            settings,
            volume,
            volume_name,
            label,
            cancel,
            manifest,
            after_copy: self.after_copy,
            tracker: ProgressTracker::new(total_source_size),
            total_files: files.len(),
            total_source_size,
            copied: 0,
            skipped: 0,
            errors: 0,
            backup_errors: 0,
        };

        let outcome = run.process_all(&files).await;
        debug!(run = %run_id, "Ingest loop finished");
        outcome
    }

    /// Step 1 and 2: destination directories and free space.
    async fn prepare(&self, settings: &IngestSettings) -> Result<()> {
        ensure_dir(&settings.destination, "destination").await?;
        if let Some(backup) = &settings.backup {
            ensure_dir(backup, "backup").await?;
        }

        let dest = settings.destination.clone();
        let floor = self.space_floor;
        match tokio::task::spawn_blocking(move || has_headroom(&dest, floor)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(IngestError::InsufficientSpace(format!(
                "Destination disk has less than {} free space",
                format_bytes(floor)
            ))),
            Ok(Err(e)) => {
                warn!("Cannot determine free space at {}: {}", settings.destination.display(), e);
                Ok(())
            }
            Err(e) => {
                warn!("Free space probe panicked: {}", e);
                Ok(())
            }
        }
    }

    async fn scan(&self, volume: &Volume, settings: &IngestSettings) -> Result<Vec<MediaFile>> {
        let root = volume.mountpoint.clone();
        let extensions = settings.extensions.clone();

        tokio::task::spawn_blocking(move || scan_media(&root, &extensions))
            .await
            .map_err(|e| IngestError::Io(std::io::Error::other(e)))
    }
}

/// Outcome of a run that never started copying.
fn failed(volume_name: &str, err: IngestError) -> RunOutcome {
    error!("Ingest of {} failed: {}", volume_name, err);
    let event = IngestEvent::Failed {
        volume_name: volume_name.to_string(),
        message: err.to_string(),
    };
    (Err(err), event)
}

async fn ensure_dir(path: &Path, what: &str) -> Result<()> {
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        IngestError::Configuration(format!(
            "Cannot create {} folder {}: {}",
            what,
            path.display(),
            e
        ))
    })
}

/// State of a single run: counters, manifest and the cancel token.
struct IngestRun<'a> {
    events: &'a EventBus,
    settings: &'a IngestSettings,
    volume: &'a Volume,
    volume_name: String,
    label: Option<&'a str>,
    cancel: CancellationToken,
    manifest: Manifest,
    after_copy: Option<AfterCopyHook>,
    tracker: ProgressTracker,
    total_files: usize,
    total_source_size: u64,
    copied: usize,
    skipped: usize,
    errors: usize,
    backup_errors: usize,
}

impl IngestRun<'_> {
    async fn process_all(&mut self, files: &[MediaFile]) -> RunOutcome {
        for (index, file) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return self.stop(IngestError::Cancelled).await;
            }

            let sequence = u32::try_from(index + 1).unwrap_or(u32::MAX);

            match self.process_file(file, sequence).await {
                Ok(outcome) => {
                    self.copied += 1;
                    self.tracker.advance(file.size);
                    match outcome {
                        FileOutcome::Resumed | FileOutcome::Skipped => self.skipped += 1,
                        FileOutcome::Copied { verified: true } => {}
                        FileOutcome::Copied { verified: false } => self.errors += 1,
                    }
                    self.emit_progress(file);
                }
                Err(e) if e.is_run_fatal() => return self.stop(e).await,
                Err(e) => {
                    error!(
                        file = %file.relative_path.display(),
                        "Error processing {}: {}",
                        file.file_name,
                        e
                    );
                    self.errors += 1;
                    self.events.emit(IngestEvent::FileFailed {
                        volume_name: self.volume_name.clone(),
                        file_name: file.file_name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.finish().await
    }

    async fn process_file(&mut self, file: &MediaFile, sequence: u32) -> Result<FileOutcome> {
        let key = file.manifest_key();

        if let Some(entry) = self.manifest.entry(&key) {
            if entry.is_resumable() {
                if tokio::fs::try_exists(&entry.dest_path).await.unwrap_or(false) {
                    debug!("Already ingested: {}", key);
                    return Ok(FileOutcome::Resumed);
                }
                info!(
                    "Manifest says verified but file missing at {}, re-importing",
                    entry.dest_path.display()
                );
                self.manifest.forget(&key);
            }
        }

        let settings = self.settings;
        let source_hash = if settings.verify_checksums {
            Some(hash_file(&file.absolute_path, &self.cancel).await?)
        } else {
            None
        };

        let options = NamingOptions {
            label: self.label,
            rename_enabled: settings.rename_enabled,
            rename_pattern: settings.rename_pattern.as_deref(),
            sequence,
        };

        let candidate = destination_path(&settings.destination, file, settings.scheme, &options);
        let resolution = resolve_duplicate(
            &candidate,
            source_hash.as_deref(),
            settings.duplicate_handling,
            &self.cancel,
        )
        .await?;

        if resolution.action == DuplicateAction::Skip {
            info!("Skipping duplicate: {}", file.file_name);
            self.manifest.record(
                key,
                ManifestEntry {
                    dest_path: resolution.dest_path,
                    backup_dest_path: None,
                    source_hash,
                    verified: true,
                    skipped: true,
                    deleted: false,
                    timestamp: Utc::now(),
                },
            );
            return Ok(FileOutcome::Skipped);
        }

        let dest_path =
            copy_file(&file.absolute_path, &resolution.dest_path, &self.cancel, None).await?;
        self.copied_hook(file, &dest_path);

        let backup_dest_path = match &settings.backup {
            Some(backup_root) => {
                self.copy_backup(backup_root, file, &options, source_hash.as_deref())
                    .await?
            }
            None => None,
        };

        let verified = match &source_hash {
            Some(hash) => self.verify(file, &dest_path, hash).await?,
            None => true,
        };

        let deleted = settings.auto_delete && verified && self.delete_source(file).await;

        self.manifest.record(
            key,
            ManifestEntry {
                dest_path,
                backup_dest_path,
                source_hash,
                verified,
                skipped: false,
                deleted,
                timestamp: Utc::now(),
            },
        );

        Ok(FileOutcome::Copied { verified })
    }

    /// Hash the copy and re-copy on mismatch, up to [`MAX_COPY_ATTEMPTS`] in total.
    async fn verify(&self, file: &MediaFile, dest: &Path, source_hash: &str) -> Result<bool> {
        for attempt in 1..=MAX_COPY_ATTEMPTS {
            let dest_hash = hash_file(dest, &self.cancel).await?;
            if dest_hash == source_hash {
                return Ok(true);
            }

            if attempt < MAX_COPY_ATTEMPTS {
                warn!(
                    "Checksum mismatch for {}, retry {}/{}",
                    file.file_name,
                    attempt,
                    MAX_COPY_ATTEMPTS - 1
                );
                copy_file(&file.absolute_path, dest, &self.cancel, None).await?;
                self.copied_hook(file, dest);
            }
        }

        let err = IngestError::ChecksumMismatch {
            path: dest.to_path_buf(),
        };
        error!("{} after {} attempts: {}", err, MAX_COPY_ATTEMPTS, file.file_name);
        self.events.emit(IngestEvent::FileFailed {
            volume_name: self.volume_name.clone(),
            file_name: file.file_name.clone(),
            message: err.to_string(),
        });
        Ok(false)
    }

    /// Best-effort mirror copy. Only cancellation escapes; every other failure
    /// is logged and counted.
    async fn copy_backup(
        &mut self,
        backup_root: &Path,
        file: &MediaFile,
        options: &NamingOptions<'_>,
        source_hash: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        let candidate = destination_path(backup_root, file, self.settings.scheme, options);

        let result = match resolve_duplicate(
            &candidate,
            source_hash,
            self.settings.duplicate_handling,
            &self.cancel,
        )
        .await
        {
            Ok(resolution) if resolution.action == DuplicateAction::Skip => {
                Ok(resolution.dest_path)
            }
            Ok(resolution) => {
                copy_file(&file.absolute_path, &resolution.dest_path, &self.cancel, None).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(path) => Ok(Some(path)),
            Err(IngestError::Cancelled) => Err(IngestError::Cancelled),
            Err(e) => {
                warn!("Backup copy failed for {}: {}", file.file_name, e);
                self.backup_errors += 1;
                Ok(None)
            }
        }
    }

    fn copied_hook(&self, file: &MediaFile, dest: &Path) {
        if let Some(hook) = self.after_copy {
            hook(file, dest);
        }
    }

    async fn delete_source(&self, file: &MediaFile) -> bool {
        match tokio::fs::remove_file(&file.absolute_path).await {
            Ok(()) => {
                info!("Deleted original: {}", file.absolute_path.display());
                true
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", file.absolute_path.display(), e);
                false
            }
        }
    }

    fn emit_progress(&self, file: &MediaFile) {
        let snapshot = self.tracker.snapshot();

        self.events.emit(IngestEvent::Progress(IngestProgressPayload {
            current: self.copied,
            total: self.total_files,
            percent: percent(self.copied, self.total_files),
            file_name: file.file_name.clone(),
            volume_name: self.volume_name.clone(),
            total_bytes_copied: snapshot.bytes_done,
            total_source_size: self.total_source_size,
            bytes_per_sec: snapshot.bytes_per_sec,
            elapsed: millis(snapshot.elapsed),
            eta_ms: millis(snapshot.eta),
            skipped_count: self.skipped,
            error_count: self.errors,
        }));
    }

    /// Persist the manifest and build the terminal event for a run-level error.
    async fn stop(&mut self, err: IngestError) -> RunOutcome {
        self.manifest.persist(&self.settings.destination).await;

        let event = match &err {
            IngestError::Cancelled => {
                warn!(
                    "Ingest of {} aborted after {}/{} files",
                    self.volume_name, self.copied, self.total_files
                );
                IngestEvent::Aborted {
                    volume_name: self.volume_name.clone(),
                    copied_count: self.copied,
                    total_count: self.total_files,
                }
            }
            _ => {
                error!("Ingest of {} stopped: {}", self.volume_name, err);
                IngestEvent::Failed {
                    volume_name: self.volume_name.clone(),
                    message: err.to_string(),
                }
            }
        };

        (Err(err), event)
    }

    async fn finish(&mut self) -> RunOutcome {
        self.manifest.completed_at = Some(Utc::now());
        self.manifest.volume_name = Some(self.volume_name.clone());
        self.manifest.volume_mountpoint = Some(self.volume.mountpoint.clone());
        self.manifest.label = self.label.map(str::to_string);
        self.manifest.persist(&self.settings.destination).await;

        let elapsed = self.tracker.elapsed();
        let bytes = self.tracker.bytes_done();

        info!(
            "Ingest of {} complete: {} files ({} skipped, {} errors), {} in {:.1}s ({})",
            self.volume_name,
            self.copied,
            self.skipped,
            self.errors,
            format_bytes(bytes),
            elapsed.as_secs_f64(),
            format_speed(bytes as f64 / elapsed.as_secs_f64().max(0.001))
        );
        if self.backup_errors > 0 {
            warn!("{} backup copies failed for {}", self.backup_errors, self.volume_name);
        }

        let completed = IngestEvent::Completed {
            volume_name: self.volume_name.clone(),
            file_count: self.copied,
            total_size: bytes,
            skipped_count: self.skipped,
            error_count: self.errors,
            elapsed: millis(elapsed),
        };

        let summary = IngestSummary {
            volume_name: self.volume_name.clone(),
            file_count: self.total_files,
            copied_count: self.copied,
            skipped_count: self.skipped,
            error_count: self.errors,
            backup_error_count: self.backup_errors,
            bytes_copied: bytes,
            elapsed,
        };
        (Ok(summary), completed)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
