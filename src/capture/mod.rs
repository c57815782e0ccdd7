//! # Frame Capture Module
//!
//! Sources of side-by-side stereo frames and the splitter that turns one
//! frame into two eye views.
//!
//! ## Plain English
//!
//! The camera runs on its own clock (60 times a second); the headset runs on
//! another. The loop never waits for the camera: it asks "anything new?"
//! and either gets the newest picture or "not yet".

mod camera;
mod frame;
mod mjpeg;
mod still;

pub use camera::CameraSource;
pub use frame::{split_stereo, CaptureFrame, EyeFrame, StereoPair, CAPTURE_CHANNELS};
pub use still::{StillImageSource, TestPatternSource};

use crate::config::{Config, SourceKind};
use crate::error::PassthroughResult;

// ============================================
// CAPTURE CONTRACT
// ============================================

/// What the loop asks a source for.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureRequest {
    /// Device path (ignored by sources that have no device)
    pub device: String,
    /// Combined frame width
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureRequest {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device: config.device.clone(),
            width: config.requested_width,
            height: config.requested_height,
            fps: config.requested_fps,
        }
    }
}

/// What the source actually delivers.
///
/// Everything downstream (eye texture size, staging size) is derived from
/// this, never from the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureMode {
    /// Width of one eye.
    pub fn eye_width(&self) -> u32 {
        self.width / 2
    }
}

/// A producer of stereo frames.
///
/// ## Plain English
///
/// `open` starts the device and reports what it really gives us.
/// `try_read_frame` never blocks: it hands back the newest frame if one
/// arrived since the last call, or `None`. The returned frame is only
/// borrowed; the next call may overwrite it.
pub trait CaptureSource {
    /// Starts the source and returns the negotiated mode.
    fn open(&mut self, request: &CaptureRequest) -> PassthroughResult<CaptureMode>;

    /// Returns the newest frame since the previous call, if any.
    fn try_read_frame(&mut self) -> PassthroughResult<Option<&CaptureFrame>>;

    /// Stops the source. Safe to call more than once.
    fn close(&mut self);

    /// Short description for logs.
    fn describe(&self) -> String;
}

impl<C: CaptureSource + ?Sized> CaptureSource for Box<C> {
    fn open(&mut self, request: &CaptureRequest) -> PassthroughResult<CaptureMode> {
        (**self).open(request)
    }

    fn try_read_frame(&mut self) -> PassthroughResult<Option<&CaptureFrame>> {
        (**self).try_read_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Builds the (unopened) source selected by the configuration.
pub fn source_from_config(config: &Config) -> Box<dyn CaptureSource + Send> {
    match &config.source {
        SourceKind::Camera => Box::new(CameraSource::new(config.capture_start_timeout)),
        SourceKind::StillImage(path) => Box::new(StillImageSource::new(path.clone())),
        SourceKind::TestPattern { drop_every } => Box::new(TestPatternSource::new(*drop_every)),
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_config() {
        let config = Config::default();
        let request = CaptureRequest::from_config(&config);

        assert_eq!(request.device, "/dev/video0");
        assert_eq!((request.width, request.height, request.fps), (3200, 1200, 60));
    }

    #[test]
    fn test_boxed_source_opens() {
        let config = Config::headless();
        let mut source = source_from_config(&config);
        let mode = source.open(&CaptureRequest::from_config(&config)).unwrap();

        assert_eq!(mode.width, config.requested_width);
        assert_eq!(mode.eye_width(), config.requested_width / 2);
        assert!(source.describe().contains("test pattern"));
        source.close();
    }
}
