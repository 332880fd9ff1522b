//! Error types for the ingest pipeline.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Cooperative abort observed at a suspension point.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("Checksum mismatch for {}", path.display())]
    ChecksumMismatch { path: PathBuf },

    #[error("Insufficient space: {0}")]
    InsufficientSpace(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("An ingest is already running for {0}")]
    AlreadyRunning(String),
}

impl IngestError {
    /// Errors that end the whole run rather than a single file.
    ///
    /// `Serialization` only comes out of manifest saves, which are logged and
    /// never stop a run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Cancelled
                | IngestError::InsufficientSpace(_)
                | IngestError::Configuration(_)
        )
    }
}

impl From<io::Error> for IngestError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::StorageFull {
            IngestError::InsufficientSpace("Destination disk is full".to_string())
        } else {
            IngestError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
