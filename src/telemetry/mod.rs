//! # Telemetry
//!
//! Counters and timings owned by the main loop.
//!
//! ## Plain English
//!
//! Things go wrong every now and then in a real-time loop: the camera has
//! no new picture yet, a headset image is late. Logging each one would
//! drown the log, so [`LoopStats`] counts them and says "log this one" only
//! for the first occurrence and then every Nth. [`FrameTimer`] remembers
//! how long recent frames and their stages took, for the periodic FPS line.

mod window;

pub use window::SampleWindow;

use std::fmt;
use std::time::{Duration, Instant};

use crate::{Eye, EYE_COUNT};

// ============================================
// FAILURE COUNTERS
// ============================================

/// A per-frame failure the loop contains and counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The capture source had no new frame
    MissedCapture,
    /// The capture source reported an error
    CaptureError,
    /// A frame arrived with the wrong dimensions
    RejectedFrame,
    /// Uploading an eye failed; the frame was dropped
    Upload,
    /// Composing one eye failed; that eye was skipped
    Compose(Eye),
    /// wait/begin/locate/end frame failed
    Handshake,
}

impl Failure {
    fn slot(self) -> usize {
        match self {
            Self::MissedCapture => 0,
            Self::CaptureError => 1,
            Self::RejectedFrame => 2,
            Self::Upload => 3,
            Self::Compose(eye) => 4 + eye.index(),
            Self::Handshake => 4 + EYE_COUNT,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissedCapture => write!(f, "no capture frame"),
            Self::CaptureError => write!(f, "capture error"),
            Self::RejectedFrame => write!(f, "rejected frame"),
            Self::Upload => write!(f, "upload failure"),
            Self::Compose(eye) => write!(f, "{} compose failure", eye),
            Self::Handshake => write!(f, "frame handshake failure"),
        }
    }
}

const FAILURE_SLOTS: usize = 5 + EYE_COUNT;

/// Loop counters plus the throttle for repeated failure logs.
#[derive(Debug, Clone)]
pub struct LoopStats {
    log_every_n: u64,
    iterations: u64,
    frames_rendered: u64,
    frames_not_rendered: u64,
    failures: [u64; FAILURE_SLOTS],
}

impl LoopStats {
    /// `log_every_n` of 0 is treated as 1 (log every occurrence).
    pub fn new(log_every_n: u32) -> Self {
        Self {
            log_every_n: u64::from(log_every_n.max(1)),
            iterations: 0,
            frames_rendered: 0,
            frames_not_rendered: 0,
            failures: [0; FAILURE_SLOTS],
        }
    }

    pub fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    /// Counts a frame in which at least one eye was composed.
    pub fn record_rendered(&mut self) {
        self.frames_rendered += 1;
    }

    /// Counts a handshake whose frame the runtime did not want drawn.
    pub fn record_not_rendered(&mut self) {
        self.frames_not_rendered += 1;
    }

    /// Counts a failure. Returns true when this occurrence should be logged:
    /// the first one, then every Nth.
    pub fn record(&mut self, failure: Failure) -> bool {
        let count = &mut self.failures[failure.slot()];
        *count += 1;
        *count == 1 || *count % self.log_every_n == 0
    }

    pub fn count(&self, failure: Failure) -> u64 {
        self.failures[failure.slot()]
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn frames_not_rendered(&self) -> u64 {
        self.frames_not_rendered
    }

    /// Sum of all failure counters.
    pub fn total_failures(&self) -> u64 {
        self.failures.iter().sum()
    }
}

impl fmt::Display for LoopStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} iterations, {} frames rendered, {} not rendered, {} missed captures, {} rejected, \
             {} upload failures, compose failures L/R {}/{}, {} handshake failures",
            self.iterations,
            self.frames_rendered,
            self.frames_not_rendered,
            self.count(Failure::MissedCapture),
            self.count(Failure::RejectedFrame),
            self.count(Failure::Upload),
            self.count(Failure::Compose(Eye::Left)),
            self.count(Failure::Compose(Eye::Right)),
            self.count(Failure::Handshake),
        )
    }
}

// ============================================
// FRAME TIMING
// ============================================

/// A timed part of one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Capture,
    Upload,
    Compose,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Capture, Stage::Upload, Stage::Compose];

    fn index(self) -> usize {
        match self {
            Self::Capture => 0,
            Self::Upload => 1,
            Self::Compose => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Upload => "upload",
            Self::Compose => "compose",
        }
    }
}

/// Rolling frame intervals and per-stage durations.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    intervals: SampleWindow,
    stages: [SampleWindow; 3],
    last_frame: Option<Instant>,
}

impl FrameTimer {
    /// Averages over the last `window` frames.
    pub fn new(window: usize) -> Self {
        Self {
            intervals: SampleWindow::new(window),
            stages: [SampleWindow::new(window), SampleWindow::new(window), SampleWindow::new(window)],
            last_frame: None,
        }
    }

    /// Notes that a frame was presented at `now`.
    pub fn mark_frame(&mut self, now: Instant) {
        if let Some(last) = self.last_frame {
            self.intervals.push(now.saturating_duration_since(last));
        }
        self.last_frame = Some(now);
    }

    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        self.stages[stage.index()].push(elapsed);
    }

    /// Mean duration of `stage` over the window.
    pub fn stage_mean(&self, stage: Stage) -> Option<Duration> {
        self.stages[stage.index()].mean()
    }

    /// Frames per second over the window.
    pub fn average_fps(&self) -> Option<f32> {
        let mean = self.intervals.mean()?;
        (!mean.is_zero()).then(|| 1.0 / mean.as_secs_f32())
    }

    /// One line for the periodic performance log.
    pub fn summary(&self) -> String {
        let mut line = match self.average_fps() {
            Some(fps) => format!("{:.1} FPS", fps),
            None => "-- FPS".to_string(),
        };
        for stage in Stage::ALL {
            if let Some(mean) = self.stage_mean(stage) {
                line.push_str(&format!(", {} {:.2} ms", stage.name(), mean.as_secs_f64() * 1000.0));
            }
        }
        line
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_logs_first_then_every_nth() {
        let mut stats = LoopStats::new(3);
        let logged: Vec<bool> = (0..7).map(|_| stats.record(Failure::MissedCapture)).collect();
        assert_eq!(logged, vec![true, false, true, false, false, true, false]);
        assert_eq!(stats.count(Failure::MissedCapture), 7);
    }

    #[test]
    fn test_failures_are_counted_separately() {
        let mut stats = LoopStats::new(60);
        assert!(stats.record(Failure::Compose(Eye::Left)));
        assert!(stats.record(Failure::Compose(Eye::Right)));
        assert!(!stats.record(Failure::Compose(Eye::Left)));

        assert_eq!(stats.count(Failure::Compose(Eye::Left)), 2);
        assert_eq!(stats.count(Failure::Compose(Eye::Right)), 1);
        assert_eq!(stats.count(Failure::Upload), 0);
        assert_eq!(stats.total_failures(), 3);
    }

    #[test]
    fn test_stats_display_mentions_counts() {
        let mut stats = LoopStats::new(1);
        stats.record_iteration();
        stats.record_rendered();
        stats.record(Failure::Handshake);
        let line = stats.to_string();
        assert!(line.contains("1 frames rendered"));
        assert!(line.contains("1 handshake failures"));
    }

    #[test]
    fn test_average_fps() {
        let mut timer = FrameTimer::new(10);
        let start = Instant::now();
        assert_eq!(timer.average_fps(), None);

        for i in 0..5u64 {
            timer.mark_frame(start + Duration::from_millis(20 * i));
        }
        let fps = timer.average_fps().unwrap();
        assert!((fps - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_stage_means_in_summary() {
        let mut timer = FrameTimer::new(4);
        timer.record(Stage::Upload, Duration::from_millis(2));
        timer.record(Stage::Upload, Duration::from_millis(4));
        assert_eq!(timer.stage_mean(Stage::Upload), Some(Duration::from_millis(3)));
        assert_eq!(timer.stage_mean(Stage::Compose), None);

        let summary = timer.summary();
        assert!(summary.starts_with("-- FPS"));
        assert!(summary.contains("upload 3.00 ms"));
    }
}
