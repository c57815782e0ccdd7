//! # Configuration Module
//!
//! This module handles all configurable settings for the passthrough app.
//!
//! ## Plain English Explanation
//!
//! The camera, the headset and the loop each have a few knobs: which camera
//! to open and at what size, how long to wait for the headset before giving
//! up on a frame, how chatty the logs should be. This module defines those
//! knobs and their defaults.
//!
//! Settings include:
//! - Which capture source to use and the resolution to ask it for
//! - How long to wait on the GPU and on the headset's images
//! - How captured pictures are placed inside each eye's image
//! - How often diagnostics are logged

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::compose::CompositeMode;

// ============================================
// SOURCE OPTIONS
// ============================================

/// Where the stereo frames come from.
///
/// ## Plain English
///
/// Normally a real side-by-side stereo camera. For testing without one we
/// can replay a still photo or generate a synthetic picture.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum SourceKind {
    /// A V4L2 camera delivering MJPEG (read through `ffmpeg`)
    #[default]
    Camera,

    /// A side-by-side stereo image file, re-delivered at the requested rate
    StillImage(PathBuf),

    /// Synthetic gradients, optionally reporting "no frame" on every Nth poll
    TestPattern {
        /// Drop every Nth poll (None = never drop)
        drop_every: Option<u32>,
    },
}

// ============================================
// MAIN CONFIGURATION
// ============================================

/// All configuration options for the passthrough app
///
/// ## Plain English
///
/// This is the "settings menu". Each field is one setting you can adjust.
#[derive(Clone, Debug)]
pub struct Config {
    // ----------------------------------------
    // CAPTURE SETTINGS
    // "What to look through"
    // ----------------------------------------
    /// Which kind of source to open
    pub source: SourceKind,

    /// Camera device path
    ///
    /// ## Default
    /// `/dev/video0`
    pub device: String,

    /// Requested combined (left + right) frame width in pixels
    ///
    /// ## Plain English
    /// The camera puts both eyes side by side, so this is twice the width
    /// of one eye. The camera may give us something else; whatever it
    /// actually delivers is what we size everything from.
    pub requested_width: u32,

    /// Requested frame height in pixels
    pub requested_height: u32,

    /// Requested frames per second
    pub requested_fps: u32,

    /// How long `open` waits for the first camera frame
    pub capture_start_timeout: Duration,

    // ----------------------------------------
    // DISPLAY SETTINGS
    // "Where to show it"
    // ----------------------------------------
    /// Run without a headset (software GPU, scripted runtime)
    pub headless: bool,

    /// How the eye picture is sized inside the headset image
    pub composite_mode: CompositeMode,

    /// Colour of the area around the placed picture (linear RGBA)
    pub clear_color: [f32; 4],

    /// Per-eye image size of the simulated headset (headless mode only)
    ///
    /// ## Default
    /// 2468×2740, the reference headset's recommended eye size
    pub headless_target: (u32, u32),

    // ----------------------------------------
    // TIMING SETTINGS
    // "How long to wait"
    // ----------------------------------------
    /// Sleep at the end of each loop iteration
    ///
    /// ## Plain English
    /// Keeps the loop from spinning a CPU core at 100% while it has nothing
    /// to do (headset idle, camera between frames).
    pub idle_sleep: Duration,

    /// Upper bound on waiting for a headset image to become writable
    ///
    /// `None` waits forever (leaves the timeout to the runtime).
    pub target_wait_timeout: Option<Duration>,

    /// Upper bound on waiting for submitted GPU work
    pub gpu_timeout: Duration,

    /// Stop after this many rendered frames (None = run until told to stop)
    pub max_frames: Option<u64>,

    // ----------------------------------------
    // DIAGNOSTIC SETTINGS
    // "How much to say"
    // ----------------------------------------
    /// Repeated per-frame failures are logged once, then every Nth time
    pub log_every_n: u32,

    /// Log head roll/pitch/yaw every N rendered frames
    pub pose_log_interval: u32,

    /// Log average FPS and stage timings every N rendered frames
    pub stats_interval_frames: u32,

    /// Number of recent frames averaged for FPS and stage timings
    pub timing_window: usize,
}

impl Config {
    /// Creates a configuration with all default values
    ///
    /// Matches the reference hardware: a 3200×1200 side-by-side camera at
    /// 60 FPS, i.e. two 1600×1200 eyes.
    pub fn default() -> Self {
        Self {
            // Capture: the stereo camera at its native mode
            source: SourceKind::Camera,
            device: "/dev/video0".to_string(),
            requested_width: 3200,
            requested_height: 1200,
            requested_fps: 60,
            capture_start_timeout: Duration::from_secs(5),

            // Display: headset, native size, black surround
            headless: false,
            composite_mode: CompositeMode::Native,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            headless_target: (2468, 2740),

            // Timing
            idle_sleep: Duration::from_millis(1),
            target_wait_timeout: Some(Duration::from_millis(100)),
            gpu_timeout: Duration::from_secs(1),
            max_frames: None,

            // Diagnostics
            log_every_n: 60,
            pose_log_interval: 5,
            stats_interval_frames: 120,
            timing_window: 120,
        }
    }

    /// Creates a configuration tuned for the lowest glass-to-glass delay
    ///
    /// ## When to Use
    /// With a camera that supports 120 FPS. Shorter waits mean a stalled
    /// headset image costs one eye for one frame, not a visible hitch.
    pub fn low_latency() -> Self {
        Self {
            requested_fps: 120,
            target_wait_timeout: Some(Duration::from_millis(20)),
            gpu_timeout: Duration::from_millis(250),
            idle_sleep: Duration::from_micros(250),
            ..Self::default()
        }
    }

    /// Creates a configuration that needs neither camera nor headset
    ///
    /// ## When to Use
    /// CI machines and quick smoke runs: synthetic frames, software GPU,
    /// stops by itself.
    pub fn headless() -> Self {
        Self {
            source: SourceKind::TestPattern { drop_every: None },
            requested_width: 640,
            requested_height: 240,
            headless: true,
            headless_target: (480, 360),
            max_frames: Some(300),
            idle_sleep: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Width of one eye, derived from the requested combined width
    pub fn requested_eye_width(&self) -> u32 {
        self.requested_width / 2
    }

    /// Validates the configuration and returns errors if invalid
    ///
    /// ## Plain English
    /// Makes sure all settings are within reasonable bounds.
    /// Returns a list of problems, or empty if all is well.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Side-by-side frames must split into two equal, non-empty halves
        if self.requested_width == 0 || self.requested_width % 2 != 0 {
            errors.push(ConfigError::InvalidWidth(self.requested_width));
        }
        if self.requested_height == 0 {
            errors.push(ConfigError::InvalidHeight(self.requested_height));
        }

        if self.requested_fps == 0 || self.requested_fps > 240 {
            errors.push(ConfigError::InvalidFps(self.requested_fps));
        }

        if self.source == SourceKind::Camera && self.device.trim().is_empty() {
            errors.push(ConfigError::EmptyDevicePath);
        }

        if let SourceKind::TestPattern { drop_every: Some(0) } = self.source {
            errors.push(ConfigError::InvalidInterval("drop_every", 0));
        }

        // Throttles and intervals are divisors
        if self.log_every_n == 0 {
            errors.push(ConfigError::InvalidInterval("log_every_n", 0));
        }
        if self.pose_log_interval == 0 {
            errors.push(ConfigError::InvalidInterval("pose_log_interval", 0));
        }
        if self.stats_interval_frames == 0 {
            errors.push(ConfigError::InvalidInterval("stats_interval_frames", 0));
        }
        if self.timing_window == 0 {
            errors.push(ConfigError::InvalidInterval("timing_window", 0));
        }

        if self.gpu_timeout.is_zero() {
            errors.push(ConfigError::ZeroTimeout("gpu_timeout"));
        }
        if self.target_wait_timeout == Some(Duration::ZERO) {
            errors.push(ConfigError::ZeroTimeout("target_wait_timeout"));
        }

        let (target_w, target_h) = self.headless_target;
        if self.headless && (target_w == 0 || target_h == 0) {
            errors.push(ConfigError::InvalidTargetSize(target_w, target_h));
        }

        if self.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            errors.push(ConfigError::InvalidClearColor(self.clear_color));
        }

        errors
    }

    /// Bytes needed to stage one eye of the requested size (RGBA)
    ///
    /// ## Returns
    /// Estimated staging size in megabytes
    pub fn estimated_staging_mb(&self) -> f32 {
        let bytes = self.requested_eye_width() as f32 * self.requested_height as f32 * 4.0;
        bytes / (1024.0 * 1024.0)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default()
    }
}

// ============================================
// CONFIGURATION ERRORS
// ============================================

/// Errors that can occur with configuration values
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Frame width is zero or odd
    InvalidWidth(u32),

    /// Frame height is zero
    InvalidHeight(u32),

    /// FPS value is outside valid range
    InvalidFps(u32),

    /// Camera device path is empty
    EmptyDevicePath,

    /// An interval or window that must be at least 1
    InvalidInterval(&'static str, u64),

    /// A timeout that must be positive
    ZeroTimeout(&'static str),

    /// Clear colour components must lie in 0.0..=1.0
    InvalidClearColor([f32; 4]),

    /// Simulated headset image has a zero dimension
    InvalidTargetSize(u32, u32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWidth(val) => {
                write!(f, "Frame width {} must be even and non-zero", val)
            }
            Self::InvalidHeight(val) => {
                write!(f, "Frame height {} must be non-zero", val)
            }
            Self::InvalidFps(val) => {
                write!(f, "FPS {} is outside valid range (1-240)", val)
            }
            Self::EmptyDevicePath => {
                write!(f, "Camera device path is empty")
            }
            Self::InvalidInterval(name, val) => {
                write!(f, "{} is {} but must be at least 1", name, val)
            }
            Self::ZeroTimeout(name) => {
                write!(f, "{} must be greater than zero", name)
            }
            Self::InvalidClearColor(rgba) => {
                write!(f, "Clear colour {:?} has components outside 0.0-1.0", rgba)
            }
            Self::InvalidTargetSize(w, h) => {
                write!(f, "Headless target size {}x{} must be non-zero", w, h)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.device, "/dev/video0");
        assert_eq!(config.requested_width, 3200);
        assert_eq!(config.requested_height, 1200);
        assert_eq!(config.requested_fps, 60);
        assert_eq!(config.requested_eye_width(), 1600);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(Config::low_latency().validate().is_empty());
        assert!(Config::headless().validate().is_empty());
        assert!(Config::headless().headless);
        assert!(Config::headless().max_frames.is_some());
    }

    #[test]
    fn test_staging_estimation() {
        let config = Config::default();
        let mb = config.estimated_staging_mb();

        // 1600 × 1200 × 4 = 7,680,000 bytes ≈ 7.3 MB
        assert!(mb > 7.0 && mb < 7.5);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();

        // Odd width cannot split
        config.requested_width = 3201;
        assert!(config
            .validate()
            .contains(&ConfigError::InvalidWidth(3201)));

        // Fix it
        config.requested_width = 3200;
        assert!(config.validate().is_empty());

        // Invalid FPS
        config.requested_fps = 0;
        assert!(!config.validate().is_empty());
        config.requested_fps = 60;

        config.log_every_n = 0;
        assert_eq!(
            config.validate(),
            vec![ConfigError::InvalidInterval("log_every_n", 0)]
        );
    }

    #[test]
    fn test_device_path_only_required_for_camera() {
        let mut config = Config::default();
        config.device.clear();
        assert_eq!(config.validate(), vec![ConfigError::EmptyDevicePath]);

        config.source = SourceKind::TestPattern { drop_every: Some(3) };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_headless_target_checked_only_when_headless() {
        let mut config = Config::default();
        config.headless_target = (0, 360);
        assert!(config.validate().is_empty());

        config.headless = true;
        assert_eq!(config.validate(), vec![ConfigError::InvalidTargetSize(0, 360)]);
    }
}
