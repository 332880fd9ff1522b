//! Collision handling at a computed destination path.
//!
//! Divergent content is never overwritten or dropped unless the mode is
//! `Overwrite`: in `Rename` and `Skip` modes a mismatching file is kept and the
//! incoming one gets a `_N` suffix.

use crate::fs::checksum::hash_file;
use crate::utils::errors::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What to do when the destination path is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateHandling {
    #[default]
    Rename,
    Skip,
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateAction {
    Copy,
    Skip,
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub dest_path: PathBuf,
    pub action: DuplicateAction,
}

/// Decide how to place a file whose computed destination is `candidate`.
pub async fn resolve_duplicate(
    candidate: &Path,
    source_hash: Option<&str>,
    mode: DuplicateHandling,
    cancel: &CancellationToken,
) -> Result<Resolution> {
    if !tokio::fs::try_exists(candidate).await? {
        return Ok(Resolution {
            dest_path: candidate.to_path_buf(),
            action: DuplicateAction::Copy,
        });
    }

    if mode == DuplicateHandling::Overwrite {
        return Ok(Resolution {
            dest_path: candidate.to_path_buf(),
            action: DuplicateAction::Overwrite,
        });
    }

    if let Some(source_hash) = source_hash {
        match hash_file(candidate, cancel).await {
            Ok(existing) if existing == source_hash => {
                return Ok(Resolution {
                    dest_path: candidate.to_path_buf(),
                    action: DuplicateAction::Skip,
                });
            }
            Ok(_) => {}
            Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
            // Unreadable existing file: treat as a plain name collision
            Err(e) => debug!("Cannot hash existing {}: {}", candidate.display(), e),
        }
    }

    Ok(Resolution {
        dest_path: next_free_path(candidate).await?,
        action: DuplicateAction::Copy,
    })
}

/// First of `name_1.ext`, `name_2.ext`, … that does not exist.
async fn next_free_path(path: &Path) -> Result<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}{ext}"));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}
