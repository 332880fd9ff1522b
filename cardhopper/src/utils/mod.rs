//! Utility modules shared by the daemon and the ingest pipeline.

pub mod errors;
pub mod logger;

pub use errors::{IngestError, Result};
