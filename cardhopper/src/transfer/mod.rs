//! Byte movement: atomic copies and progress accounting.

pub mod copier;
pub mod progress;
pub mod progress_stream;

pub use copier::{clean_temp_files, copy_file, temp_path_for, TEMP_SUFFIX};
pub use progress_stream::ProgressCallback;
