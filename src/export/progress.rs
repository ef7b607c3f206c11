//! Progress reporting for export runs
//!
//! Shows a spinner with bytes uploaded, segments sealed and throughput while
//! a run is in flight. Nothing is drawn when stderr is not a terminal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use crate::utils::convert::format_bytes;

/// Progress tracker for segment uploads
pub struct ProgressTracker {
    bytes: AtomicU64,
    segments: AtomicU64,
    start_time: Instant,
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `enable_bar` - Whether to draw a spinner on stderr
    pub fn new(enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner()
                .template("{spinner:.green} {bytes} uploaded {msg} [{elapsed_precise}]")
            {
                bar.set_style(style);
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });

        Self {
            bytes: AtomicU64::new(0),
            segments: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    /// Tracker that records totals without drawing anything
    pub fn hidden() -> Self {
        Self::new(false)
    }

    /// Record a sealed segment
    ///
    /// # Arguments
    /// * `segment_bytes` - Size of the segment just written
    pub fn segment_sealed(&self, segment_bytes: u64) {
        let total = self.bytes.fetch_add(segment_bytes, Ordering::Relaxed) + segment_bytes;
        let segments = self.segments.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(ref bar) = self.bar {
            bar.set_position(total);

            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let speed = total as f64 / elapsed;
                bar.set_message(format!(
                    "in {} segment(s) ({}/s)",
                    segments,
                    format_bytes(speed as u64)
                ));
            }
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn segments(&self) -> u64 {
        self.segments.load(Ordering::Relaxed)
    }

    /// Finish and clear the spinner
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_tracker_counts() {
        let tracker = ProgressTracker::hidden();
        tracker.segment_sealed(100);
        tracker.segment_sealed(50);
        assert_eq!(tracker.bytes(), 150);
        assert_eq!(tracker.segments(), 2);
        tracker.finish();
    }
}
