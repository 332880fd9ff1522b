//! Atomic streaming file copy.
//!
//! Data is written to `<dest>.cardhopper-tmp` next to the destination and
//! renamed into place only after every byte is flushed, so a partial file never
//! appears under the final name. The temp file is removed on every failure
//! path, including when the copy future is dropped mid-flight.

use super::progress_stream::{ProgressCallback, ProgressStream};
use crate::utils::errors::{IngestError, Result};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Suffix appended to the destination file name while a copy is in flight.
pub const TEMP_SUFFIX: &str = ".cardhopper-tmp";

/// Read/write chunk size
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Temp path used while copying to `dest`.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Removes the temp file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!("Removed temp file {}", self.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove temp file {}: {}", self.path.display(), e),
            }
        }
    }
}

/// Copy `src` to `dest`, creating the parent directory first.
///
/// Returns the final path. Fails with [`IngestError::Cancelled`] when the
/// token fires between chunks; the destination is untouched in that case.
pub async fn copy_file(
    src: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    on_progress: Option<ProgressCallback>,
) -> Result<PathBuf> {
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path_for(dest);
    let mut guard = TempFileGuard::new(tmp.clone());

    stream_to_temp(src, &tmp, cancel, on_progress).await?;

    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }

    tokio::fs::rename(&tmp, dest).await?;
    guard.disarm();

    Ok(dest.to_path_buf())
}

async fn stream_to_temp(
    src: &Path,
    tmp: &Path,
    cancel: &CancellationToken,
    on_progress: Option<ProgressCallback>,
) -> Result<()> {
    let source = tokio::fs::File::open(src).await?;
    let mut out = tokio::fs::File::create(tmp).await?;

    let reader = ReaderStream::with_capacity(source, COPY_CHUNK_SIZE);
    let mut stream = ProgressStream::new(reader, on_progress);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            next = stream.next() => next,
        };

        match chunk {
            Some(bytes) => out.write_all(&bytes?).await?,
            None => break,
        }
    }

    out.flush().await?;
    out.sync_all().await?;
    Ok(())
}

/// Delete leftover `*.cardhopper-tmp` files under `root`.
///
/// Returns the number of files removed. A missing root is not an error.
pub fn clean_temp_files(root: &Path) -> usize {
    if !root.exists() {
        return 0;
    }

    let mut removed = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cleanup error in {}: {}", root.display(), e);
                continue;
            }
        };

        let is_temp = entry.file_type().is_file()
            && entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX);
        if !is_temp {
            continue;
        }

        info!("Cleaning up temp file: {}", entry.path().display());
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }

    removed
}
