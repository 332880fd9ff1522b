//! Linux: removable volumes from the mount table.
//!
//! Anything mounted under the desktop automount roots counts as removable.
//! procfs raises no inotify events, so change hints come from watching the
//! automount roots and the per-user folders below them, where udisks creates
//! the mountpoint directories. Polling the mount table stays authoritative.

use super::{forward_change, ChangeTrigger, Volume, VolumeSource};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const MOUNTS_FILE: &str = "/proc/mounts";

/// Mountpoint prefixes used by udisks, automounters and manual mounts.
pub const REMOVABLE_PREFIXES: &[&str] = &["/media/", "/mnt/", "/run/media/"];

/// Pseudo filesystems that never hold user media.
const IGNORED_FS_TYPES: &[&str] = &["tmpfs", "devtmpfs", "sysfs", "proc"];

/// Automount roots watched for mountpoint directories coming and going.
const WATCH_ROOTS: &[&str] = &["/media", "/run/media", "/mnt"];

pub struct LinuxVolumeSource {
    mounts_file: PathBuf,
}

impl LinuxVolumeSource {
    pub fn new() -> Self {
        Self {
            mounts_file: PathBuf::from(MOUNTS_FILE),
        }
    }
}

impl Default for LinuxVolumeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeSource for LinuxVolumeSource {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn enumerate(&self) -> io::Result<Vec<Volume>> {
        let table = std::fs::read_to_string(&self.mounts_file)?;
        Ok(parse_mounts(&table))
    }

    fn watch_for_changes(&self, trigger: ChangeTrigger) -> io::Result<Option<RecommendedWatcher>> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| forward_change(&trigger, "linux", res),
            NotifyConfig::default(),
        )
        .map_err(io::Error::other)?;

        let mut watched = 0;
        let roots: Vec<&Path> = WATCH_ROOTS.iter().map(Path::new).collect();
        for path in watch_targets(&roots) {
            match watcher.watch(&path, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    info!("[linux] Watching {}", path.display());
                    watched += 1;
                }
                Err(e) => warn!("[linux] Cannot watch {}: {}", path.display(), e),
            }
        }

        Ok((watched > 0).then_some(watcher))
    }
}

/// Existing `roots` plus their immediate subdirectories (`/media/<user>`).
pub fn watch_targets(roots: &[&Path]) -> Vec<PathBuf> {
    let mut targets = Vec::new();
    for root in roots.iter().filter(|r| r.is_dir()) {
        targets.push(root.to_path_buf());
        match std::fs::read_dir(root) {
            Ok(entries) => targets.extend(
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
                    .map(|e| e.path()),
            ),
            Err(e) => warn!("[linux] Cannot list {}: {}", root.display(), e),
        }
    }
    targets
}

/// Removable volumes listed in `/proc/mounts` formatted text.
pub fn parse_mounts(table: &str) -> Vec<Volume> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mountpoint = unescape_mount_field(fields.next()?);
            let fs_type = fields.next()?;

            if !REMOVABLE_PREFIXES.iter().any(|p| mountpoint.starts_with(p)) {
                return None;
            }
            if IGNORED_FS_TYPES.contains(&fs_type) {
                return None;
            }

            let mountpoint = PathBuf::from(mountpoint);
            Some(Volume {
                label: mountpoint
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned()),
                device: Some(device.to_string()),
                is_removable: true,
                mountpoint,
            })
        })
        .collect()
}

/// Decode the octal escapes the kernel uses for whitespace and backslashes.
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
tmpfs /run/user/1000 tmpfs rw,nosuid,nodev,relatime 0 0
/dev/sdb1 /media/alex/EOS_DIGITAL vfat rw,nosuid,nodev,relatime 0 0
/dev/sdc1 /run/media/alex/Card\\040Two exfat rw,nosuid,nodev 0 0
tmpfs /mnt/ramdisk tmpfs rw 0 0
";

    #[test]
    fn test_parse_mounts_keeps_removable_only() {
        let volumes = parse_mounts(SAMPLE);
        assert_eq!(volumes.len(), 2);

        assert_eq!(volumes[0].mountpoint, PathBuf::from("/media/alex/EOS_DIGITAL"));
        assert_eq!(volumes[0].label.as_deref(), Some("EOS_DIGITAL"));
        assert_eq!(volumes[0].device.as_deref(), Some("/dev/sdb1"));
        assert!(volumes[0].is_removable);
    }

    #[test]
    fn test_parse_mounts_unescapes_spaces() {
        let volumes = parse_mounts(SAMPLE);
        assert_eq!(volumes[1].mountpoint, PathBuf::from("/run/media/alex/Card Two"));
        assert_eq!(volumes[1].label.as_deref(), Some("Card Two"));
    }

    #[test]
    fn test_parse_mounts_tolerates_garbage() {
        assert!(parse_mounts("").is_empty());
        assert!(parse_mounts("short line\n\n").is_empty());
    }

    #[test]
    fn test_enumerate_reads_custom_table() {
        let dir = tempfile::TempDir::new().unwrap();
        let table = dir.path().join("mounts");
        std::fs::write(&table, SAMPLE).unwrap();

        let source = LinuxVolumeSource { mounts_file: table };
        assert_eq!(source.enumerate().unwrap().len(), 2);
    }

    #[test]
    fn test_watch_targets_descend_into_user_folders() {
        let dir = tempfile::TempDir::new().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(media.join("alex")).unwrap();
        std::fs::write(media.join("stray-file"), b"x").unwrap();
        let missing = dir.path().join("run-media");

        let mut targets = watch_targets(&[media.as_path(), missing.as_path()]);
        targets.sort();
        assert_eq!(targets, vec![media.clone(), media.join("alex")]);
    }
}
