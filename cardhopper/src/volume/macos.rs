//! macOS: `mount` output filtered through `diskutil info`.
//!
//! Built-in SD readers report as internal disks, so the removable check looks
//! at the media properties rather than the bus location.

use super::{forward_change, ChangeTrigger, Volume, VolumeSource};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

const VOLUMES_ROOT: &str = "/Volumes";

const IGNORED_MOUNTS: &[&str] = &[
    "/",
    "/System/Volumes/Data",
    "/System/Volumes/Preboot",
    "/System/Volumes/VM",
    "/System/Volumes/Update",
    "/System/Volumes/Data/home",
];

const IGNORED_PREFIXES: &[&str] = &["/System/Volumes/"];

const IGNORED_NAMES: &[&str] = &["Macintosh HD", "Macintosh HD - Data"];

/// A `/dev/diskNsM` mount found in `mount` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountCandidate {
    /// e.g. `disk4s1`
    pub disk_id: String,
    /// e.g. `disk4`
    pub whole_disk: String,
    pub mountpoint: PathBuf,
}

pub struct MacosVolumeSource;

impl MacosVolumeSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MacosVolumeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeSource for MacosVolumeSource {
    fn name(&self) -> &'static str {
        "darwin"
    }

    fn enumerate(&self) -> io::Result<Vec<Volume>> {
        let output = Command::new("mount").output()?;
        let candidates = parse_mount_output(&String::from_utf8_lossy(&output.stdout));
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let whole_disks: BTreeSet<&str> =
            candidates.iter().map(|c| c.whole_disk.as_str()).collect();
        let removable: BTreeSet<&str> = whole_disks
            .into_iter()
            .filter(|disk| match diskutil_info(disk) {
                Ok(out) => is_removable_disk(&String::from_utf8_lossy(&out.stdout)),
                Err(e) => {
                    debug!("[darwin] diskutil info {} failed: {}", disk, e);
                    false
                }
            })
            .collect();

        Ok(candidates
            .iter()
            .filter(|c| removable.contains(c.whole_disk.as_str()))
            .filter_map(to_volume)
            .collect())
    }

    fn watch_for_changes(&self, trigger: ChangeTrigger) -> io::Result<Option<RecommendedWatcher>> {
        let root = Path::new(VOLUMES_ROOT);
        if !root.exists() {
            return Ok(None);
        }

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| forward_change(&trigger, "darwin", res),
            NotifyConfig::default(),
        )
        .map_err(io::Error::other)?;
        watcher
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(io::Error::other)?;

        info!("[darwin] Watching {}", VOLUMES_ROOT);
        Ok(Some(watcher))
    }
}

/// Parse lines like `/dev/disk4s1 on /Volumes/EOS_DIGITAL (msdos, local, ...)`.
pub fn parse_mount_output(output: &str) -> Vec<MountCandidate> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("/dev/")?;
            let (disk_id, rest) = rest.split_once(" on ")?;
            let (mountpoint, _) = rest.rsplit_once(" (")?;

            if !is_disk_id(disk_id) || is_system_mount(mountpoint) {
                return None;
            }

            Some(MountCandidate {
                disk_id: disk_id.to_string(),
                whole_disk: whole_disk(disk_id).to_string(),
                mountpoint: PathBuf::from(mountpoint),
            })
        })
        .collect()
}

/// Whether `diskutil info` output describes removable, ejectable or SD media.
pub fn is_removable_disk(info: &str) -> bool {
    info.lines().any(|line| {
        let Some((key, value)) = line.split_once(':') else {
            return false;
        };
        let value = value.trim();
        match key.trim() {
            "Removable Media" => {
                value.eq_ignore_ascii_case("removable") || value.eq_ignore_ascii_case("yes")
            }
            "Ejectable" => value.eq_ignore_ascii_case("yes"),
            "Protocol" => value.eq_ignore_ascii_case("secure digital"),
            _ => false,
        }
    })
}

fn to_volume(candidate: &MountCandidate) -> Option<Volume> {
    let name = candidate.mountpoint.file_name()?.to_string_lossy().into_owned();
    if IGNORED_NAMES.contains(&name.as_str()) {
        return None;
    }

    Some(Volume {
        mountpoint: candidate.mountpoint.clone(),
        label: Some(name),
        device: Some(format!("/dev/{}", candidate.disk_id)),
        is_removable: true,
    })
}

/// `disk4`, `disk4s1`
fn is_disk_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("disk") else {
        return false;
    };
    let (disk, slice) = match rest.split_once('s') {
        Some((disk, slice)) => (disk, Some(slice)),
        None => (rest, None),
    };
    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    digits(disk) && slice.map_or(true, digits)
}

/// `disk4s1` -> `disk4`
fn whole_disk(disk_id: &str) -> &str {
    match disk_id.get(4..).and_then(|rest| rest.find('s')) {
        Some(pos) => &disk_id[..4 + pos],
        None => disk_id,
    }
}

fn diskutil_info(disk: &str) -> io::Result<Output> {
    Command::new("diskutil")
        .arg("info")
        .arg(format!("/dev/{disk}"))
        .output()
}

fn is_system_mount(mountpoint: &str) -> bool {
    IGNORED_MOUNTS.contains(&mountpoint)
        || IGNORED_PREFIXES.iter().any(|p| mountpoint.starts_with(p))
}
