//! Media file discovery on a volume.
//!
//! Depth-first traversal where siblings are visited in file-name order, so two
//! scans of the same tree yield the same list. That order is what assigns
//! `{seq}` numbers when renaming.

use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

/// Directory names that are never descended into, besides dot-entries.
pub const IGNORED_DIRS: &[&str] = &["System Volume Information", "$RECYCLE.BIN", "TRASH"];

/// A media file discovered during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Path relative to the volume root (manifest key)
    pub relative_path: PathBuf,

    /// Full path to the file
    pub absolute_path: PathBuf,

    /// File name including extension
    pub file_name: String,

    /// File size in bytes
    pub size: u64,

    /// Last modification time, if the filesystem reports one
    pub mtime: Option<DateTime<Local>>,
}

impl MediaFile {
    fn from_entry(entry: &DirEntry, root: &Path) -> io::Result<Self> {
        let metadata = entry.metadata()?;
        let absolute_path = entry.path().to_path_buf();
        let relative_path = absolute_path
            .strip_prefix(root)
            .unwrap_or(&absolute_path)
            .to_path_buf();

        Ok(Self {
            relative_path,
            file_name: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
            mtime: metadata.modified().ok().map(DateTime::<Local>::from),
            absolute_path,
        })
    }

    /// Manifest key for this file.
    pub fn manifest_key(&self) -> String {
        self.relative_path.to_string_lossy().into_owned()
    }
}

/// Scan `root` for files whose lower-cased extension is in `extensions`.
///
/// Hidden entries and [`IGNORED_DIRS`] are pruned. Unreadable entries and
/// directories, the root included, are logged and their subtree dropped.
pub fn scan_media(root: &Path, extensions: &BTreeSet<String>) -> Vec<MediaFile> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_ignored(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(|p| p.display().to_string()).unwrap_or_default();
                warn!("Cannot read {}: {}", path, err);
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_media_extension(entry.path(), extensions) {
            continue;
        }

        match MediaFile::from_entry(&entry, root) {
            Ok(file) => files.push(file),
            Err(e) => warn!("Cannot stat {}: {}", entry.path().display(), e),
        }
    }

    info!("Scanned {}: found {} media files", root.display(), files.len());
    files
}

/// Dot-entries and well-known trash/system directories.
fn is_ignored(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
}

fn has_media_extension(path: &Path, extensions: &BTreeSet<String>) -> bool {
    path.extension()
        .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
        .unwrap_or(false)
}
