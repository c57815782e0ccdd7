//! # Stereo Passthrough
//!
//! Real-time stereo camera passthrough for an OpenXR head-mounted display.
//! A stereo camera produces one combined left/right frame; each half is
//! uploaded to the GPU and composited into that eye's swapchain image, paced
//! by the runtime's frame loop.
//!
//! ## Architecture Overview
//!
//! The application is structured into independent modules:
//!
//! - `capture`: Camera / still / test-pattern sources and the frame splitter
//! - `session`: Session state machine that gates rendering
//! - `gpu`: Device command seam (Vulkan and software implementations)
//! - `upload`: Staging upload of eye frames into eye textures
//! - `compose`: Per-eye placement of eye textures into swapchain images
//! - `runtime`: Display runtime seam (OpenXR and headless implementations)
//! - `setup`: Ordered initialization pipeline
//! - `telemetry`: Loop statistics and frame timing
//! - `app`: The main loop tying everything together
//! - `config`: Application configuration
//! - `error`: Error types
//!
//! ```text
//!  Capture Source ──► Frame Splitter ──► Upload Pipeline ──► Frame Composer ──► swapchain
//!                                                ▲                  ▲
//!                         Session State Machine ─┴── frame handshake┘
//! ```

// ============================================
// MODULE DECLARATIONS
// ============================================

pub mod app;
pub mod capture;
pub mod compose;
pub mod config;
pub mod error;
pub mod gpu;
pub mod runtime;
pub mod session;
pub mod setup;
pub mod telemetry;
pub mod upload;

// ============================================
// RE-EXPORTS
// ============================================

pub use app::{IterationOutcome, PassthroughLoop};
pub use capture::{CaptureFrame, CaptureSource, EyeFrame};
pub use config::Config;
pub use error::{ErrorClass, PassthroughError, PassthroughResult};
pub use session::{SessionState, SessionStateMachine};

// ============================================
// EYES
// ============================================

/// Number of views composed per frame.
pub const EYE_COUNT: usize = 2;

/// One of the two stereo views.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    /// Left half of the camera frame, first view of the runtime
    Left,
    /// Right half of the camera frame, second view of the runtime
    Right,
}

impl Eye {
    /// Both eyes in view order.
    pub const ALL: [Eye; EYE_COUNT] = [Eye::Left, Eye::Right];

    /// Index into per-eye arrays (0 = left, 1 = right).
    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

impl std::fmt::Display for Eye {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================
// LOGGING
// ============================================

/// Initialize logging for the platform.
///
/// Defaults to `info`; `RUST_LOG` overrides it. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_indices() {
        assert_eq!(Eye::Left.index(), 0);
        assert_eq!(Eye::Right.index(), 1);
        assert_eq!(Eye::ALL.len(), EYE_COUNT);
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
    }
}
