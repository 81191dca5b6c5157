//! Frame-count progress.
//!
//! Progress is measured in output frames: a job over `N` input frames with
//! multiplier `m` is considered to produce `N * m` frames. The real count is
//! `N + (N - 1)(m - 1)`, so the last report of a run is forced to 100.

use serde::{Deserialize, Serialize};

/// Percentage of the expected output written so far, clamped to `0..=100`.
///
/// An unknown total (`0`) counts as one frame.
pub fn progress_percent(frames_written: u64, total_input_frames: u64, multiplier: u32) -> u8 {
    let expected = total_input_frames.max(1).saturating_mul(multiplier.max(1) as u64);
    let percent = frames_written.saturating_mul(100) / expected;
    percent.min(100) as u8
}

/// Snapshot of a running job's frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameProgress {
    /// Input frames decoded
    pub frames_read: u64,
    /// Frames handed to the encoder
    pub frames_written: u64,
    /// Last percentage reported
    pub percent: u8,
}

/// Decides when a progress report is due.
///
/// Reports fire every `interval` input frames and only when the percentage
/// increased, so the reported sequence is non-decreasing.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_input_frames: u64,
    multiplier: u32,
    interval: u64,
    progress: FrameProgress,
}

impl ProgressTracker {
    pub fn new(total_input_frames: u64, multiplier: u32, interval: u64) -> Self {
        Self {
            total_input_frames,
            multiplier,
            interval: interval.max(1),
            progress: FrameProgress::default(),
        }
    }

    /// Record one decoded frame and the frames written for it.
    ///
    /// Returns the new percentage if a report is due.
    pub fn record(&mut self, frames_written: u64) -> Option<u8> {
        self.progress.frames_read += 1;
        self.progress.frames_written += frames_written;

        if self.progress.frames_read % self.interval != 0 {
            return None;
        }

        let percent = progress_percent(
            self.progress.frames_written,
            self.total_input_frames,
            self.multiplier,
        );
        self.advance(percent)
    }

    /// Final report; returns 100 unless it was already reported.
    pub fn finish(&mut self) -> Option<u8> {
        self.advance(100)
    }

    pub fn snapshot(&self) -> FrameProgress {
        self.progress
    }

    fn advance(&mut self, percent: u8) -> Option<u8> {
        if percent > self.progress.percent {
            self.progress.percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 10, 2), 0);
        assert_eq!(progress_percent(10, 10, 2), 50);
        assert_eq!(progress_percent(19, 10, 2), 95);
        assert_eq!(progress_percent(25, 10, 2), 100);
    }

    #[test]
    fn test_unknown_total_counts_as_one() {
        assert_eq!(progress_percent(1, 0, 2), 50);
        assert_eq!(progress_percent(5, 0, 2), 100);
    }

    #[test]
    fn test_tracker_reports_on_interval() {
        // 10 inputs at x2, interval 3
        let mut tracker = ProgressTracker::new(10, 2, 3);
        let mut reports = Vec::new();

        for i in 0..10 {
            let written = if i == 0 { 1 } else { 2 };
            if let Some(p) = tracker.record(written) {
                reports.push(p);
            }
        }
        reports.extend(tracker.finish());

        // frames written after inputs 3, 6, 9: 5, 11, 17
        assert_eq!(reports, vec![25, 55, 85, 100]);
        assert_eq!(tracker.snapshot().frames_written, 19);
    }

    #[test]
    fn test_tracker_never_repeats_or_decreases() {
        // Total underestimated: percentage saturates early
        let mut tracker = ProgressTracker::new(2, 2, 1);
        let mut reports = Vec::new();
        for _ in 0..6 {
            reports.extend(tracker.record(2));
        }
        reports.extend(tracker.finish());

        assert_eq!(reports, vec![50, 100]);
        assert!(reports.windows(2).all(|w| w[0] < w[1]));
    }
}
