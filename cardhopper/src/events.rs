//! Outbound events for the shell/notification layer.
//!
//! Ingest lifecycle events fan out over a broadcast channel; any number of
//! consumers (log printer, JSON writer, tray) may subscribe.

use crate::volume::Volume;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of queued events per subscriber
const BROADCAST_CAPACITY: usize = 1000;

/// Ingest lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IngestEvent {
    #[serde(rename = "ingest:start", rename_all = "camelCase")]
    Started {
        volume_name: String,
        file_count: usize,
        total_source_size: u64,
    },

    #[serde(rename = "ingest:progress")]
    Progress(IngestProgressPayload),

    #[serde(rename = "ingest:complete", rename_all = "camelCase")]
    Completed {
        volume_name: String,
        file_count: usize,
        total_size: u64,
        skipped_count: usize,
        error_count: usize,
        /// Milliseconds
        elapsed: u64,
    },

    /// Terminal run failure
    #[serde(rename = "ingest:error", rename_all = "camelCase")]
    Failed { volume_name: String, message: String },

    #[serde(rename = "ingest:aborted", rename_all = "camelCase")]
    Aborted {
        volume_name: String,
        copied_count: usize,
        total_count: usize,
    },

    /// A single file failed; the run continues
    #[serde(rename = "ingest:file-error", rename_all = "camelCase")]
    FileFailed {
        volume_name: String,
        file_name: String,
        message: String,
    },
}

impl IngestEvent {
    /// `Completed`, `Failed` and `Aborted` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestEvent::Completed { .. } | IngestEvent::Failed { .. } | IngestEvent::Aborted { .. }
        )
    }
}

/// Progress after each processed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestProgressPayload {
    pub current: usize,
    pub total: usize,
    pub percent: u8,
    pub file_name: String,
    pub volume_name: String,
    pub total_bytes_copied: u64,
    pub total_source_size: u64,
    pub bytes_per_sec: f64,
    /// Milliseconds
    pub elapsed: u64,
    pub eta_ms: u64,
    pub skipped_count: usize,
    pub error_count: usize,
}

/// Volume detection events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum VolumeEvent {
    #[serde(rename = "volume-added")]
    Added(Volume),

    #[serde(rename = "volume-removed")]
    Removed(Volume),
}

impl VolumeEvent {
    pub fn volume(&self) -> &Volume {
        match self {
            VolumeEvent::Added(v) | VolumeEvent::Removed(v) => v,
        }
    }
}

/// Broadcast hub for ingest events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Deliver an event to every subscriber. Having none is not an error.
    pub fn emit(&self, event: IngestEvent) {
        match self.tx.send(event) {
            Ok(count) => debug!("Delivered event to {} subscriber(s)", count),
            Err(e) => debug!("No subscribers for event: {:?}", e.0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
