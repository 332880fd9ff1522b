//! Windows: removable drive letters via `sysinfo`.
//!
//! There is no cheap mount notification to hook, so this source relies on the
//! watcher's poll alone.

use super::Volume;
use std::path::PathBuf;

/// Platform-neutral view of one disk entry reported by the OS.
#[derive(Debug, Clone)]
pub struct DiskEntry {
    pub mount_point: PathBuf,
    pub name: String,
    pub removable: bool,
}

/// Keep removable drive-letter roots (`E:\`), labelled by volume name or letter.
pub fn removable_volumes(disks: impl IntoIterator<Item = DiskEntry>) -> Vec<Volume> {
    disks
        .into_iter()
        .filter(|d| d.removable)
        .filter_map(|d| {
            let root = d.mount_point.to_string_lossy().into_owned();
            let letter = drive_letter(&root)?;
            let label = if d.name.trim().is_empty() {
                letter.clone()
            } else {
                d.name.trim().to_string()
            };

            Some(Volume {
                mountpoint: d.mount_point,
                label: Some(label),
                device: Some(letter),
                is_removable: true,
            })
        })
        .collect()
}

/// `E:\` or `E:` -> `E:`
fn drive_letter(root: &str) -> Option<String> {
    let mut chars = root.chars();
    let letter = chars.next().filter(|c| c.is_ascii_alphabetic())?;
    if chars.next() != Some(':') {
        return None;
    }
    match chars.as_str() {
        "" | "\\" | "/" => Some(format!("{}:", letter.to_ascii_uppercase())),
        _ => None,
    }
}

#[cfg(windows)]
pub use source::WindowsVolumeSource;

#[cfg(windows)]
mod source {
    use super::{removable_volumes, DiskEntry};
    use crate::volume::{ChangeTrigger, Volume, VolumeSource};
    use std::io;
    use sysinfo::Disks;

    pub struct WindowsVolumeSource;

    impl WindowsVolumeSource {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for WindowsVolumeSource {
        fn default() -> Self {
            Self::new()
        }
    }

    impl VolumeSource for WindowsVolumeSource {
        fn name(&self) -> &'static str {
            "win32"
        }

        fn enumerate(&self) -> io::Result<Vec<Volume>> {
            let disks = Disks::new_with_refreshed_list();
            Ok(removable_volumes(disks.list().iter().map(|disk| DiskEntry {
                mount_point: disk.mount_point().to_path_buf(),
                name: disk.name().to_string_lossy().into_owned(),
                removable: disk.is_removable(),
            })))
        }

        fn watch_for_changes(
            &self,
            _trigger: ChangeTrigger,
        ) -> io::Result<Option<notify::RecommendedWatcher>> {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(root: &str, name: &str, removable: bool) -> DiskEntry {
        DiskEntry {
            mount_point: PathBuf::from(root),
            name: name.to_string(),
            removable,
        }
    }

    #[test]
    fn test_removable_drive_letters_only() {
        let volumes = removable_volumes(vec![
            disk("C:\\", "Windows", false),
            disk("E:\\", "EOS_DIGITAL", true),
            disk("f:\\", "", true),
            disk("\\\\?\\Volume{1234}\\", "Hidden", true),
        ]);

        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].label.as_deref(), Some("EOS_DIGITAL"));
        assert_eq!(volumes[0].device.as_deref(), Some("E:"));
        assert_eq!(volumes[1].label.as_deref(), Some("F:"));
    }

    #[test]
    fn test_drive_letter() {
        assert_eq!(drive_letter("E:\\").as_deref(), Some("E:"));
        assert_eq!(drive_letter("e:").as_deref(), Some("E:"));
        assert!(drive_letter("/media/card").is_none());
        assert!(drive_letter("E:\\DCIM").is_none());
    }
}
