//! Configuration management for CardHopper.
//!
//! Loads configuration from a TOML file. Every field has a default so a
//! partial file (or none at all) is valid. Runs never read this struct
//! directly; they receive an [`IngestSettings`] snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::{DuplicateHandling, OrganizationScheme};

/// Media extensions per file-type category (lower-case, no dot).
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "tiff", "tif", "bmp", "gif", "heic", "heif", "webp",
];
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "mts", "m2ts", "wmv", "flv", "webm", "m4v",
];
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "aac", "flac", "ogg", "m4a", "wma", "aiff", "aif",
];
pub const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "arw", "orf", "rw2", "dng", "raf", "pef", "srw", "x3f",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub file_types: FileTypesConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root of the organized library
    #[serde(default = "default_destination")]
    pub destination: PathBuf,

    /// Mirror destination, used only when `backup_enabled` is set
    #[serde(default)]
    pub backup_folder: Option<PathBuf>,

    #[serde(default)]
    pub backup_enabled: bool,

    #[serde(default)]
    pub organization_scheme: OrganizationScheme,

    #[serde(default)]
    pub duplicate_handling: DuplicateHandling,

    /// Delete source files once copied and verified
    #[serde(default)]
    pub auto_delete: bool,

    #[serde(default = "default_true")]
    pub verify_checksums: bool,

    #[serde(default)]
    pub rename_enabled: bool,

    /// Tokens: {date} {year} {month} {day} {seq} {original} {label}
    #[serde(default = "default_rename_pattern")]
    pub rename_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTypesConfig {
    #[serde(default = "default_true")]
    pub images: bool,
    #[serde(default = "default_true")]
    pub video: bool,
    #[serde(default = "default_true")]
    pub audio: bool,
    #[serde(default = "default_true")]
    pub raw: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Fallback enumeration interval, always active
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Folders treated as pseudo-volumes
    #[serde(default)]
    pub watched_folders: Vec<PathBuf>,

    /// Quiet period after the last new file before a watched folder is ingested
    #[serde(default = "default_folder_quiet_period_ms")]
    pub folder_quiet_period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_destination() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("CardHopper")
}

fn default_true() -> bool {
    true
}

fn default_rename_pattern() -> String {
    "{date}_{seq}".to_string()
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_folder_quiet_period_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            backup_folder: None,
            backup_enabled: false,
            organization_scheme: OrganizationScheme::default(),
            duplicate_handling: DuplicateHandling::default(),
            auto_delete: false,
            verify_checksums: true,
            rename_enabled: false,
            rename_pattern: default_rename_pattern(),
        }
    }
}

impl Default for FileTypesConfig {
    fn default() -> Self {
        Self {
            images: true,
            video: true,
            audio: true,
            raw: true,
        }
    }
}

impl FileTypesConfig {
    /// Union of the extension lists of every enabled category.
    pub fn enabled_extensions(&self) -> BTreeSet<String> {
        let categories = [
            (self.images, IMAGE_EXTENSIONS),
            (self.video, VIDEO_EXTENSIONS),
            (self.audio, AUDIO_EXTENSIONS),
            (self.raw, RAW_EXTENSIONS),
        ];

        categories
            .into_iter()
            .filter(|(enabled, _)| *enabled)
            .flat_map(|(_, exts)| exts.iter().map(|e| e.to_string()))
            .collect()
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            watched_folders: Vec::new(),
            folder_quiet_period_ms: default_folder_quiet_period_ms(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn folder_quiet_period(&self) -> Duration {
        Duration::from_millis(self.folder_quiet_period_ms)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Immutable configuration snapshot handed to a single ingest run.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub destination: PathBuf,
    /// Present only when backup is enabled and a folder is configured
    pub backup: Option<PathBuf>,
    pub scheme: OrganizationScheme,
    pub duplicate_handling: DuplicateHandling,
    pub rename_enabled: bool,
    pub rename_pattern: Option<String>,
    pub verify_checksums: bool,
    pub auto_delete: bool,
    /// Lower-case extensions without the leading dot
    pub extensions: BTreeSet<String>,
}

impl IngestSettings {
    /// Settings with every default except the destination.
    pub fn for_destination(destination: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.ingest.destination = destination.into();
        config.ingest_settings()
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Snapshot the settings an ingest run needs.
    pub fn ingest_settings(&self) -> IngestSettings {
        let ingest = &self.ingest;

        let backup = if ingest.backup_enabled {
            ingest
                .backup_folder
                .clone()
                .filter(|p| !p.as_os_str().is_empty())
        } else {
            None
        };

        let rename_pattern = Some(ingest.rename_pattern.clone()).filter(|p| !p.is_empty());

        IngestSettings {
            destination: ingest.destination.clone(),
            backup,
            scheme: ingest.organization_scheme,
            duplicate_handling: ingest.duplicate_handling,
            rename_enabled: ingest.rename_enabled,
            rename_pattern,
            verify_checksums: ingest.verify_checksums,
            auto_delete: ingest.auto_delete,
            extensions: self.file_types.enabled_extensions(),
        }
    }
}
