//! CardHopper Library
//!
//! Detects removable media and ingests photos, video and audio into an
//! organized, checksum-verified destination tree with crash-resumable progress.

pub mod config;
pub mod daemon;
pub mod events;
pub mod executor;
pub mod fs;
pub mod ingest;
pub mod transfer;
pub mod utils;
pub mod volume;

// Re-export commonly used types
pub use config::{Config, IngestSettings};
pub use events::{EventBus, IngestEvent, VolumeEvent};
pub use executor::{IngestEngine, IngestSummary};
pub use utils::errors::IngestError;
pub use volume::Volume;
pub type Result<T> = std::result::Result<T, IngestError>;
