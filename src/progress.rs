//! Periodic stderr progress reporting, shared by both binaries.
//!
//! Grounded on `common/utils.c`'s `utils_print_progress`: rate-limit to at
//! most one line every [`MIN_INTERVAL`] of wall-clock time, and only print
//! again once the completion percentage has actually advanced.

use std::time::{Duration, Instant};

const MIN_INTERVAL: Duration = Duration::from_secs(5);

pub struct Progress {
    file_size: u64,
    last_logged_at: Option<Instant>,
    last_percent: i64,
}

impl Progress {
    pub fn new(file_size: u64) -> Progress {
        Progress {
            file_size,
            last_logged_at: None,
            last_percent: -1,
        }
    }

    /// Reports progress based on `bytes_read`, the current file offset.
    /// No-op more often than not: it enforces both the time and
    /// percentage-advanced gates before writing a line.
    pub fn tick(&mut self, bytes_read: u64) {
        let now = Instant::now();
        if let Some(last) = self.last_logged_at {
            if now.duration_since(last) <= MIN_INTERVAL {
                return;
            }
        }
        self.last_logged_at = Some(now);

        if self.file_size == 0 {
            return;
        }
        let percent = (bytes_read * 10_000 / self.file_size) as i64;
        if percent <= self.last_percent {
            return;
        }
        self.last_percent = percent;
        eprintln!(
            "Progress: {:.2} % ({} of {})",
            percent as f64 / 100.0,
            bytes_read,
            self.file_size
        );
    }
}
