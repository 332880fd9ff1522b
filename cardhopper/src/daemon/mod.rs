//! Long-running watch mode: ingest queue and signal handling.

pub mod queue;
pub mod shutdown;

pub use queue::{IngestQueue, QueueCommand, QueueHandle};
pub use shutdown::ShutdownCoordinator;
