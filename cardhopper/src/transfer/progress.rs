//! Run-level progress: throughput, ETA and human-readable formatting.

use std::time::{Duration, Instant};

/// Minimum window over which instantaneous throughput is sampled.
const SPEED_WINDOW: Duration = Duration::from_millis(500);

/// Snapshot of run progress after a file finished
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub total_bytes: u64,
    pub bytes_per_sec: f64,
    pub elapsed: Duration,
    pub eta: Duration,
}

/// Tracks byte progress and derives throughput and ETA.
///
/// Throughput is sampled over windows of at least [`SPEED_WINDOW`]; until the
/// first window closes the average since start is used.
pub struct ProgressTracker {
    start_time: Instant,
    window_start: Instant,
    window_bytes: u64,
    bytes_done: u64,
    total_bytes: u64,
    bytes_per_sec: f64,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        Self::starting_at(total_bytes, Instant::now())
    }

    fn starting_at(total_bytes: u64, now: Instant) -> Self {
        Self {
            start_time: now,
            window_start: now,
            window_bytes: 0,
            bytes_done: 0,
            total_bytes,
            bytes_per_sec: 0.0,
        }
    }

    /// Add `bytes` to the running total and return a fresh snapshot.
    pub fn advance(&mut self, bytes: u64) -> ProgressSnapshot {
        self.advance_at(bytes, Instant::now())
    }

    fn advance_at(&mut self, bytes: u64, now: Instant) -> ProgressSnapshot {
        self.bytes_done = self.bytes_done.saturating_add(bytes);

        let window = now.duration_since(self.window_start);
        if window >= SPEED_WINDOW {
            let diff = self.bytes_done.saturating_sub(self.window_bytes);
            self.bytes_per_sec = diff as f64 / window.as_secs_f64();
            self.window_start = now;
            self.window_bytes = self.bytes_done;
        } else if self.window_bytes == 0 {
            let elapsed = now.duration_since(self.start_time).as_secs_f64();
            if elapsed > 0.0 {
                self.bytes_per_sec = self.bytes_done as f64 / elapsed;
            }
        }

        self.snapshot_at(now)
    }

    fn snapshot_at(&self, now: Instant) -> ProgressSnapshot {
        let remaining = self.total_bytes.saturating_sub(self.bytes_done);
        let eta = if self.bytes_per_sec > 0.0 {
            Duration::from_secs_f64(remaining as f64 / self.bytes_per_sec)
        } else {
            Duration::ZERO
        };

        ProgressSnapshot {
            bytes_done: self.bytes_done,
            total_bytes: self.total_bytes,
            bytes_per_sec: self.bytes_per_sec,
            elapsed: now.duration_since(self.start_time),
            eta,
        }
    }

    /// Current figures without adding bytes.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Integer percentage of `current` over `total` (0 when total is 0).
pub fn percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second as u64))
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
