//! Free-space probe for destination volumes.

use std::io;
use std::path::Path;

/// Minimum free space required at the destination before a run starts.
pub const SAFETY_FLOOR_BYTES: u64 = 100 * 1024 * 1024;

/// Bytes available to the current user on the filesystem holding `path`.
pub fn available_space(path: &Path) -> io::Result<u64> {
    fs2::available_space(path)
}

/// `Ok(true)` when `path` has at least `floor` bytes free.
pub fn has_headroom(path: &Path, floor: u64) -> io::Result<bool> {
    Ok(available_space(path)? >= floor)
}
