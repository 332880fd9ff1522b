//! Resume ledger persisted at the destination root.
//!
//! The manifest records every file that reached a terminal state so a later
//! run against the same destination can skip it. It is always rewritten as a
//! whole file (temp + rename), never appended to. Every field has a default so
//! manifests written by older or newer versions still load.

use crate::transfer::temp_path_for;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the manifest inside the destination root.
pub const MANIFEST_FILE_NAME: &str = ".cardhopper-manifest.json";

pub const MANIFEST_VERSION: u32 = 1;

fn default_version() -> u32 {
    MANIFEST_VERSION
}

/// Ingest manifest, keyed by path relative to the source volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mountpoint: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default)]
    pub ingested: BTreeMap<String, ManifestEntry>,
}

/// Outcome recorded for a single source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Empty when the writer omitted it; such entries never resume
    #[serde(default)]
    pub dest_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dest_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,

    #[serde(default)]
    pub verified: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub skipped: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ManifestEntry {
    /// Whether a later run may trust this entry, provided the file still exists.
    pub fn is_resumable(&self) -> bool {
        self.verified && !self.dest_path.as_os_str().is_empty()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            created_at: Utc::now(),
            completed_at: None,
            volume_name: None,
            volume_mountpoint: None,
            label: None,
            ingested: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Location of the manifest for a destination root.
    pub fn path_for(destination: &Path) -> PathBuf {
        destination.join(MANIFEST_FILE_NAME)
    }

    /// Load the manifest for `destination`.
    ///
    /// A missing or unparseable manifest yields an empty one; loading never
    /// fails a run.
    pub async fn load(destination: &Path) -> Self {
        let path = Self::path_for(destination);

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Cannot read manifest {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_slice::<Manifest>(&data) {
            Ok(manifest) => {
                info!("Loaded manifest with {} entries", manifest.ingested.len());
                manifest
            }
            Err(e) => {
                warn!("Ignoring corrupt manifest {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Rewrite the manifest for `destination` atomically.
    pub async fn save(&self, destination: &Path) -> crate::Result<()> {
        let path = Self::path_for(destination);
        let tmp = temp_path_for(&path);
        let json = serde_json::to_vec_pretty(self)?;

        tokio::fs::write(&tmp, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Save, logging instead of failing.
    pub async fn persist(&self, destination: &Path) {
        if let Err(e) = self.save(destination).await {
            warn!("Failed to save manifest in {}: {}", destination.display(), e);
        }
    }

    pub fn entry(&self, key: &str) -> Option<&ManifestEntry> {
        self.ingested.get(key)
    }

    pub fn record(&mut self, key: String, entry: ManifestEntry) {
        self.ingested.insert(key, entry);
    }

    pub fn forget(&mut self, key: &str) -> Option<ManifestEntry> {
        self.ingested.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(dest: &Path) -> ManifestEntry {
        ManifestEntry {
            dest_path: dest.to_path_buf(),
            backup_dest_path: None,
            source_hash: Some("abc".to_string()),
            verified: true,
            skipped: false,
            deleted: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_manifest_is_empty() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::load(dir.path()).await;
        assert!(manifest.ingested.is_empty());
        assert_eq!(manifest.version, MANIFEST_VERSION);
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(Manifest::path_for(dir.path()), b"{ not json").unwrap();
        let manifest = Manifest::load(dir.path()).await;
        assert!(manifest.ingested.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::default();
        manifest.record("DCIM/IMG_0001.JPG".to_string(), entry(&dir.path().join("a.jpg")));
        manifest.label = Some("Wedding".to_string());

        manifest.save(dir.path()).await.unwrap();
        assert!(!temp_path_for(&Manifest::path_for(dir.path())).exists());

        let loaded = Manifest::load(dir.path()).await;
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_sparse_manifest_uses_defaults() {
        let json = r#"{
            "ingested": {
                "DCIM/IMG_0001.JPG": { "destPath": "/photos/2024-03-05/IMG_0001.JPG" }
            },
            "someFutureField": 42
        }"#;

        let manifest: Manifest = serde_json::from_str(json).unwrap();
        let entry = manifest.entry("DCIM/IMG_0001.JPG").unwrap();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert!(!entry.verified);
        assert!(entry.source_hash.is_none());
    }

    #[test]
    fn test_entry_without_dest_path_keeps_the_rest() {
        let json = r#"{
            "ingested": {
                "DCIM/IMG_0001.JPG": { "destPath": "/photos/IMG_0001.JPG", "verified": true },
                "DCIM/IMG_0002.JPG": { "verified": true, "sourceHash": "ff00" }
            }
        }"#;

        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.ingested.len(), 2);
        assert!(manifest.entry("DCIM/IMG_0001.JPG").unwrap().is_resumable());

        let partial = manifest.entry("DCIM/IMG_0002.JPG").unwrap();
        assert!(partial.dest_path.as_os_str().is_empty());
        assert!(!partial.is_resumable());
    }

    #[tokio::test]
    async fn test_load_tolerates_entry_without_dest_path() {
        let dir = TempDir::new().unwrap();
        let json = r#"{
            "ingested": {
                "a.jpg": { "destPath": "/photos/a.jpg", "verified": true },
                "b.jpg": { "verified": true }
            }
        }"#;
        std::fs::write(Manifest::path_for(dir.path()), json).unwrap();

        let manifest = Manifest::load(dir.path()).await;
        assert_eq!(manifest.ingested.len(), 2);
        assert!(manifest.entry("a.jpg").unwrap().is_resumable());
    }

    #[test]
    fn test_camel_case_on_disk() {
        let mut manifest = Manifest::default();
        manifest.record("a.jpg".to_string(), entry(Path::new("/photos/a.jpg")));
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"destPath\""));
        assert!(json.contains("\"sourceHash\""));
        assert!(!json.contains("\"skipped\""));
    }
}
