//! # Display Runtime
//!
//! The headset side of the loop: events, frame pacing, poses and the
//! swapchain images we draw into.
//!
//! ## Plain English
//!
//! The runtime tells us when to draw. Each frame goes:
//!
//! ```text
//!   wait_frame ──► begin_frame ──► locate_views ──► (compose both eyes) ──► end_frame
//!       │                                                 │
//!  display time +                              acquire / wait / release
//!  "should render"                              one swapchain image per eye
//! ```
//!
//! [`OpenXrRuntime`] talks to a real headset. [`HeadlessRuntime`] fakes one
//! so the loop can run in tests and on machines without a headset.

mod headless;
mod openxr_runtime;
mod pose;

pub use self::headless::{HeadlessRuntime, SubmittedFrame, TargetFault};
pub use self::openxr_runtime::OpenXrRuntime;
pub(crate) use self::openxr_runtime::EyeSwapchain;
pub use self::pose::{Fov, ViewPose};

use std::time::Duration;

use crate::compose::ComposedView;
use crate::error::PassthroughResult;
use crate::gpu::Extent2D;
use crate::session::{RuntimeEvent, SessionControl};
use crate::{Eye, EYE_COUNT};

/// What `wait_frame` reports about the next frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTiming {
    /// When the frame will be shown (runtime clock, ns)
    pub display_time: i64,
    /// Expected time between frames (ns)
    pub period: i64,
    /// False when the runtime will not show this frame anyway
    pub should_render: bool,
}

impl FrameTiming {
    /// Display refresh rate implied by `period`, if known.
    pub fn refresh_hz(&self) -> Option<f32> {
        (self.period > 0).then(|| 1_000_000_000.0 / self.period as f32)
    }
}

/// A display runtime the main loop can drive.
pub trait DisplayRuntime: SessionControl {
    /// Next queued event, or `None` when the queue is empty.
    fn poll_event(&mut self) -> PassthroughResult<Option<RuntimeEvent>>;

    /// Asks the runtime to wind the session down (Stopping, then Exiting).
    fn request_exit(&mut self) -> PassthroughResult<()>;

    /// Blocks until the runtime wants the next frame.
    fn wait_frame(&mut self) -> PassthroughResult<FrameTiming>;

    fn begin_frame(&mut self) -> PassthroughResult<()>;

    /// Per-eye poses at `display_time`.
    fn locate_views(&mut self, display_time: i64) -> PassthroughResult<[ViewPose; EYE_COUNT]>;

    /// Size of an eye's swapchain images.
    fn target_extent(&self, eye: Eye) -> Extent2D;

    /// Native handles of an eye's swapchain images, in swapchain order.
    fn target_handles(&self, eye: Eye) -> &[u64];

    /// Takes the next swapchain image for `eye`, returning its index.
    fn acquire_target(&mut self, eye: Eye) -> PassthroughResult<u32>;

    /// Waits until the acquired image may be written. `None` waits forever.
    fn wait_target(&mut self, eye: Eye, timeout: Option<Duration>) -> PassthroughResult<()>;

    /// Hands the acquired image back to the compositor.
    fn release_target(&mut self, eye: Eye) -> PassthroughResult<()>;

    /// Submits the frame. Eyes that failed this frame are `None`.
    fn end_frame(&mut self, display_time: i64, views: &[Option<ComposedView>; EYE_COUNT]) -> PassthroughResult<()>;
}

impl<R: DisplayRuntime + ?Sized> SessionControl for Box<R> {
    fn begin_session(&mut self) -> PassthroughResult<()> {
        (**self).begin_session()
    }

    fn end_session(&mut self) -> PassthroughResult<()> {
        (**self).end_session()
    }
}

impl<R: DisplayRuntime + ?Sized> DisplayRuntime for Box<R> {
    fn poll_event(&mut self) -> PassthroughResult<Option<RuntimeEvent>> {
        (**self).poll_event()
    }

    fn request_exit(&mut self) -> PassthroughResult<()> {
        (**self).request_exit()
    }

    fn wait_frame(&mut self) -> PassthroughResult<FrameTiming> {
        (**self).wait_frame()
    }

    fn begin_frame(&mut self) -> PassthroughResult<()> {
        (**self).begin_frame()
    }

    fn locate_views(&mut self, display_time: i64) -> PassthroughResult<[ViewPose; EYE_COUNT]> {
        (**self).locate_views(display_time)
    }

    fn target_extent(&self, eye: Eye) -> Extent2D {
        (**self).target_extent(eye)
    }

    fn target_handles(&self, eye: Eye) -> &[u64] {
        (**self).target_handles(eye)
    }

    fn acquire_target(&mut self, eye: Eye) -> PassthroughResult<u32> {
        (**self).acquire_target(eye)
    }

    fn wait_target(&mut self, eye: Eye, timeout: Option<Duration>) -> PassthroughResult<()> {
        (**self).wait_target(eye, timeout)
    }

    fn release_target(&mut self, eye: Eye) -> PassthroughResult<()> {
        (**self).release_target(eye)
    }

    fn end_frame(&mut self, display_time: i64, views: &[Option<ComposedView>; EYE_COUNT]) -> PassthroughResult<()> {
        (**self).end_frame(display_time, views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_hz() {
        let timing = FrameTiming {
            display_time: 0,
            period: 13_888_889,
            should_render: true,
        };
        let hz = timing.refresh_hz().unwrap();
        assert!((hz - 72.0).abs() < 0.01);

        let unknown = FrameTiming { period: 0, ..timing };
        assert_eq!(unknown.refresh_hz(), None);
    }
}
