//! # Error Types Module
//!
//! This module defines all the error types used throughout the passthrough
//! pipeline.
//!
//! ## Plain English Explanation
//!
//! Not every failure is equal. A camera that cannot be opened means there is
//! nothing to show, so we stop. A camera that has no new picture *this*
//! frame just means we show the previous one. Every error therefore belongs
//! to one of four classes ([`ErrorClass`]):
//!
//! - **Setup**: something needed before the first frame failed; exit
//! - **Transient**: one frame (or one eye) is lost; keep looping
//! - **Protocol**: the runtime is taking the session away; shut down cleanly
//! - **Capacity**: an internal size invariant broke; fail loudly

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

// ============================================
// ERROR CLASSES
// ============================================

/// How the main loop reacts to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fatal before the loop starts: report once, exit non-zero
    Setup,
    /// Contained within one loop iteration
    Transient,
    /// Runtime-driven shutdown (instance or session loss)
    Protocol,
    /// A programming invariant was violated; never recovered
    Capacity,
}

// ============================================
// MAIN APPLICATION ERROR
// ============================================

/// The main error type for the passthrough pipeline.
#[derive(Debug, Error)]
pub enum PassthroughError {
    /// An initialization step failed.
    ///
    /// Wraps whatever went wrong inside the step so the report names the
    /// step ("Create swapchains") and the cause.
    #[error("Setup failed at '{step}': {source}")]
    Setup {
        step: &'static str,
        #[source]
        source: Box<PassthroughError>,
    },

    /// A condition that can only be detected during setup
    #[error("Setup error: {0}")]
    SetupCondition(#[from] SetupErrorKind),

    /// Something went wrong with the capture device
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureErrorKind),

    /// A captured frame could not be used
    #[error("Frame error: {0}")]
    Frame(#[from] FrameErrorKind),

    /// OpenXR or display runtime error
    #[error("OpenXR error: {0}")]
    OpenXR(#[from] OpenXRErrorKind),

    /// Vulkan or GPU device error
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuErrorKind),

    /// The staging region is too small for the bytes about to be written.
    ///
    /// Eye dimensions are fixed at initialization precisely so this cannot
    /// happen; seeing it means a bug, not a bad frame.
    #[error("Staging overflow: {required} bytes required, capacity is {capacity}")]
    StagingOverflow { required: usize, capacity: usize },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Something unexpected happened
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PassthroughError {
    /// Wraps an error as the failure of a named setup step.
    pub fn setup(step: &'static str, source: PassthroughError) -> Self {
        Self::Setup {
            step,
            source: Box::new(source),
        }
    }

    /// Classifies the error for the main loop.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Setup { .. } | Self::SetupCondition(_) | Self::Config(_) => ErrorClass::Setup,
            Self::StagingOverflow { .. } => ErrorClass::Capacity,
            Self::Frame(FrameErrorKind::TextureExtentMismatch { .. }) => ErrorClass::Capacity,
            Self::OpenXR(OpenXRErrorKind::InstanceLost) | Self::OpenXR(OpenXRErrorKind::SessionLost) => {
                ErrorClass::Protocol
            }
            Self::Capture(CaptureErrorKind::Disconnected) => ErrorClass::Setup,
            _ => ErrorClass::Transient,
        }
    }

    /// Returns true if the loop must stop and report this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Setup | ErrorClass::Capacity)
    }
}

// ============================================
// SETUP ERRORS
// ============================================

/// Conditions that can only arise while initializing.
#[derive(Debug, Error)]
pub enum SetupErrorKind {
    /// The OpenXR runtime lacks an extension we need
    #[error("Required OpenXR extension not available: {0}")]
    MissingExtension(&'static str),

    /// The runtime does not expose exactly two views
    #[error("Expected 2 stereo views, runtime reports {0}")]
    UnsupportedViewCount(usize),

    /// None of the colour formats we can write to is offered
    #[error("No supported swapchain colour format among {0:?}")]
    NoSwapchainFormat(Vec<u32>),

    /// No Vulkan memory type satisfies the requested properties
    #[error("No Vulkan memory type for {0}")]
    NoMemoryType(&'static str),

    /// The Vulkan device has no graphics queue
    #[error("No Vulkan graphics queue family")]
    NoGraphicsQueue,

    /// The camera delivered nothing before the startup deadline
    #[error("Capture source produced no frame within {0:?}")]
    CaptureStartTimeout(std::time::Duration),

    /// A stereo frame must split into two equal halves
    #[error("Negotiated capture width {0} is not even")]
    OddCaptureWidth(u32),

    /// The source negotiated a mode with no rows
    #[error("Negotiated capture height is zero")]
    ZeroCaptureHeight,
}

// ============================================
// CAPTURE ERRORS
// ============================================

/// Errors that can occur in a capture source.
#[derive(Debug, Error)]
pub enum CaptureErrorKind {
    /// The device or file could not be opened
    #[error("Failed to open {device}: {reason}")]
    OpenFailed { device: String, reason: String },

    /// The ffmpeg reader process could not be started or died
    #[error("Reader process failed: {0}")]
    ProcessFailed(String),

    /// One MJPEG image could not be decoded
    #[error("JPEG decode failed: {0}")]
    DecodeFailed(String),

    /// The source was read before `open` succeeded
    #[error("Capture source is not open")]
    NotOpen,

    /// The reader thread is gone; no more frames will arrive
    #[error("Capture source disconnected")]
    Disconnected,
}

// ============================================
// FRAME ERRORS
// ============================================

/// Errors about a single captured frame.
#[derive(Debug, Error)]
pub enum FrameErrorKind {
    /// Stereo frames must split into equal halves
    #[error("Frame width {0} is not even")]
    OddWidth(u32),

    /// A frame with no pixels cannot be split
    #[error("Frame {width}x{height} has no pixels")]
    Empty { width: u32, height: u32 },

    /// The frame does not have the negotiated dimensions
    #[error("Frame is {got_width}x{got_height}, expected {expected_width}x{expected_height}")]
    UnexpectedDimensions {
        expected_width: u32,
        expected_height: u32,
        got_width: u32,
        got_height: u32,
    },

    /// The pixel buffer is shorter than width × height × channels
    #[error("Frame buffer holds {got} bytes, {expected} required")]
    Truncated { expected: usize, got: usize },

    /// An eye frame does not match its fixed-size eye texture
    #[error("Eye frame {got_width}x{got_height} does not match texture {width}x{height}")]
    TextureExtentMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
}

// ============================================
// OPENXR ERRORS
// ============================================

/// Errors related to the OpenXR / display runtime.
#[derive(Debug, Error)]
pub enum OpenXRErrorKind {
    /// The OpenXR loader library could not be found
    #[error("OpenXR loader not available: {0}")]
    LoaderUnavailable(String),

    /// A runtime call returned a failure code
    #[error("{call} failed: {message}")]
    Call { call: &'static str, message: String },

    /// The runtime announced instance loss
    #[error("OpenXR instance lost")]
    InstanceLost,

    /// The runtime announced session loss
    #[error("OpenXR session lost")]
    SessionLost,
}

impl OpenXRErrorKind {
    /// Builds a [`OpenXRErrorKind::Call`] from any debuggable result code.
    pub fn call<E: std::fmt::Debug>(call: &'static str, err: E) -> Self {
        Self::Call {
            call,
            message: format!("{err:?}"),
        }
    }
}

// ============================================
// GPU ERRORS
// ============================================

/// Errors related to the GPU device.
#[derive(Debug, Error)]
pub enum GpuErrorKind {
    /// A Vulkan call returned a failure code
    #[error("{call} failed: {message}")]
    Call { call: &'static str, message: String },

    /// Submitted work did not complete in time
    #[error("GPU work did not complete within {0:?}")]
    Timeout(std::time::Duration),

    /// A barrier named an access state the image is not in
    #[error("{slot}: barrier expects {expected}, image is {actual}")]
    InvalidTransition {
        slot: String,
        expected: String,
        actual: String,
    },

    /// A swapchain image index outside the registered list
    #[error("No target image {index} registered for the {eye} eye")]
    UnknownTarget { eye: crate::Eye, index: u32 },

    /// A command referenced an area outside an image
    #[error("Region out of bounds for {0}")]
    OutOfBounds(String),
}

impl GpuErrorKind {
    /// Builds a [`GpuErrorKind::Call`] from any debuggable result code.
    pub fn call<E: std::fmt::Debug>(call: &'static str, err: E) -> Self {
        Self::Call {
            call,
            message: format!("{err:?}"),
        }
    }
}

// ============================================
// RESULT TYPE ALIAS
// ============================================

/// A Result type that uses [`PassthroughError`]
pub type PassthroughResult<T> = Result<T, PassthroughError>;

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PassthroughError::Capture(CaptureErrorKind::NotOpen);
        let message = format!("{}", err);
        assert!(message.contains("Capture"));
        assert!(message.contains("not open"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let app_err: PassthroughError = io_err.into();

        match app_err {
            PassthroughError::Io(_) => {}
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_setup_wrapper_names_step() {
        let err = PassthroughError::setup(
            "Create swapchains",
            SetupErrorKind::NoSwapchainFormat(vec![1, 2]).into(),
        );
        assert!(err.to_string().contains("Create swapchains"));
        assert_eq!(err.class(), ErrorClass::Setup);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_classification() {
        let overflow = PassthroughError::StagingOverflow {
            required: 10,
            capacity: 4,
        };
        assert_eq!(overflow.class(), ErrorClass::Capacity);
        assert!(overflow.is_fatal());

        let acquire: PassthroughError =
            OpenXRErrorKind::call("xrAcquireSwapchainImage", "ERROR_CALL_ORDER_INVALID").into();
        assert_eq!(acquire.class(), ErrorClass::Transient);
        assert!(!acquire.is_fatal());

        let lost: PassthroughError = OpenXRErrorKind::InstanceLost.into();
        assert_eq!(lost.class(), ErrorClass::Protocol);
        assert!(!lost.is_fatal());

        let odd: PassthroughError = FrameErrorKind::OddWidth(3).into();
        assert_eq!(odd.class(), ErrorClass::Transient);
    }
}
