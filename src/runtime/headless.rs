//! # Headless Runtime
//!
//! A scripted stand-in for the headset runtime.
//!
//! ## Plain English
//!
//! Events come from a queue we fill ourselves, frames are "displayed" on a
//! fake clock, and swapchain images are just numbers. It checks call order
//! the way a real runtime does (no waiting on an image you never acquired,
//! no ending a frame you never began) and counts everything so tests can
//! ask what happened. Faults can be injected per eye.

use std::collections::VecDeque;
use std::time::Duration;

use glam::{Quat, Vec3};

use crate::compose::ComposedView;
use crate::error::{OpenXRErrorKind, PassthroughResult};
use crate::gpu::Extent2D;
use crate::session::{RuntimeEvent, SessionControl, SessionState};
use crate::{Eye, EYE_COUNT};

use super::{DisplayRuntime, FrameTiming, Fov, ViewPose};

/// 90 Hz
const DEFAULT_PERIOD_NS: i64 = 11_111_111;

/// Half the interpupillary distance, in metres.
const HALF_IPD: f32 = 0.032;

/// A one-shot failure of a swapchain call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetFault {
    Acquire,
    Wait,
    /// The image is still returned, but the call reports failure
    Release,
}

/// What one `end_frame` call submitted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubmittedFrame {
    pub display_time: i64,
    pub views: [Option<ComposedView>; EYE_COUNT],
    /// Whether a projection layer was submitted
    pub has_layer: bool,
}

/// Scripted [`DisplayRuntime`].
#[derive(Debug)]
pub struct HeadlessRuntime {
    events: VecDeque<RuntimeEvent>,
    target_extent: Extent2D,
    handles: [Vec<u64>; EYE_COUNT],
    next_image: [u32; EYE_COUNT],
    held: [Option<u32>; EYE_COUNT],
    waited: [bool; EYE_COUNT],
    ever_released: [bool; EYE_COUNT],
    faults: [Option<TargetFault>; EYE_COUNT],

    should_render: bool,
    fail_next_begin: bool,
    session_running: bool,
    exit_requested: bool,
    frame_begun: bool,
    display_time: i64,
    period: i64,

    frames_waited: u64,
    frames_ended: u64,
    layers_submitted: u64,
    acquired: [u64; EYE_COUNT],
    released: [u64; EYE_COUNT],
    session_begins: u64,
    session_ends: u64,
    last_frame: Option<SubmittedFrame>,
}

impl HeadlessRuntime {
    /// Creates a runtime with `image_count` swapchain images of `target_extent`
    /// per eye and an empty event queue.
    pub fn new(target_extent: Extent2D, image_count: u32) -> Self {
        let handles = |eye: Eye| -> Vec<u64> {
            (0..image_count as u64)
                .map(|i| ((eye.index() as u64 + 1) << 16) | i)
                .collect()
        };
        Self {
            events: VecDeque::new(),
            target_extent,
            handles: [handles(Eye::Left), handles(Eye::Right)],
            next_image: [0; EYE_COUNT],
            held: [None; EYE_COUNT],
            waited: [false; EYE_COUNT],
            ever_released: [false; EYE_COUNT],
            faults: [None; EYE_COUNT],
            should_render: true,
            fail_next_begin: false,
            session_running: false,
            exit_requested: false,
            frame_begun: false,
            display_time: 0,
            period: DEFAULT_PERIOD_NS,
            frames_waited: 0,
            frames_ended: 0,
            layers_submitted: 0,
            acquired: [0; EYE_COUNT],
            released: [0; EYE_COUNT],
            session_begins: 0,
            session_ends: 0,
            last_frame: None,
        }
    }

    /// Like [`HeadlessRuntime::new`], with the usual startup sequence queued
    /// (Idle → Ready → Synchronized → Visible → Focused).
    pub fn started(target_extent: Extent2D, image_count: u32) -> Self {
        let mut runtime = Self::new(target_extent, image_count);
        for state in [
            SessionState::Idle,
            SessionState::Ready,
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
        ] {
            runtime.push_state(state);
        }
        runtime
    }

    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    pub fn push_state(&mut self, state: SessionState) {
        self.push_event(RuntimeEvent::StateChanged(state));
    }

    /// Sets the "should render" flag returned by later `wait_frame` calls.
    pub fn set_should_render(&mut self, should_render: bool) {
        self.should_render = should_render;
    }

    /// Makes the next `begin_session` fail.
    pub fn fail_next_begin(&mut self) {
        self.fail_next_begin = true;
    }

    /// Makes the next `kind` call for `eye` fail.
    pub fn inject_fault(&mut self, eye: Eye, kind: TargetFault) {
        self.faults[eye.index()] = Some(kind);
    }

    pub fn is_session_running(&self) -> bool {
        self.session_running
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn frames_waited(&self) -> u64 {
        self.frames_waited
    }

    pub fn frames_ended(&self) -> u64 {
        self.frames_ended
    }

    pub fn layers_submitted(&self) -> u64 {
        self.layers_submitted
    }

    pub fn acquired(&self, eye: Eye) -> u64 {
        self.acquired[eye.index()]
    }

    pub fn released(&self, eye: Eye) -> u64 {
        self.released[eye.index()]
    }

    /// Image currently acquired and not yet released.
    pub fn held(&self, eye: Eye) -> Option<u32> {
        self.held[eye.index()]
    }

    pub fn session_begins(&self) -> u64 {
        self.session_begins
    }

    pub fn session_ends(&self) -> u64 {
        self.session_ends
    }

    pub fn last_frame(&self) -> Option<&SubmittedFrame> {
        self.last_frame.as_ref()
    }

    fn take_fault(&mut self, eye: Eye, kind: TargetFault) -> bool {
        let slot = &mut self.faults[eye.index()];
        if *slot == Some(kind) {
            *slot = None;
            return true;
        }
        false
    }
}

fn failure(call: &'static str, message: impl Into<String>) -> OpenXRErrorKind {
    OpenXRErrorKind::Call {
        call,
        message: message.into(),
    }
}

fn call_order(call: &'static str) -> OpenXRErrorKind {
    failure(call, "ERROR_CALL_ORDER_INVALID")
}

impl SessionControl for HeadlessRuntime {
    fn begin_session(&mut self) -> PassthroughResult<()> {
        if std::mem::take(&mut self.fail_next_begin) {
            return Err(failure("xrBeginSession", "ERROR_RUNTIME_FAILURE (injected)").into());
        }
        if self.session_running {
            return Err(failure("xrBeginSession", "ERROR_SESSION_RUNNING").into());
        }
        self.session_running = true;
        self.session_begins += 1;
        Ok(())
    }

    fn end_session(&mut self) -> PassthroughResult<()> {
        if !self.session_running {
            return Err(failure("xrEndSession", "ERROR_SESSION_NOT_RUNNING").into());
        }
        self.session_running = false;
        self.session_ends += 1;
        self.push_state(SessionState::Idle);
        if self.exit_requested {
            self.push_state(SessionState::Exiting);
        }
        Ok(())
    }
}

impl DisplayRuntime for HeadlessRuntime {
    fn poll_event(&mut self) -> PassthroughResult<Option<RuntimeEvent>> {
        Ok(self.events.pop_front())
    }

    fn request_exit(&mut self) -> PassthroughResult<()> {
        if self.exit_requested {
            return Ok(());
        }
        self.exit_requested = true;
        if self.session_running {
            self.push_state(SessionState::Stopping);
        } else {
            self.push_state(SessionState::Exiting);
        }
        Ok(())
    }

    fn wait_frame(&mut self) -> PassthroughResult<FrameTiming> {
        if !self.session_running {
            return Err(failure("xrWaitFrame", "ERROR_SESSION_NOT_RUNNING").into());
        }
        self.frames_waited += 1;
        self.display_time += self.period;
        Ok(FrameTiming {
            display_time: self.display_time,
            period: self.period,
            should_render: self.should_render,
        })
    }

    fn begin_frame(&mut self) -> PassthroughResult<()> {
        if !self.session_running {
            return Err(failure("xrBeginFrame", "ERROR_SESSION_NOT_RUNNING").into());
        }
        self.frame_begun = true;
        Ok(())
    }

    fn locate_views(&mut self, display_time: i64) -> PassthroughResult<[ViewPose; EYE_COUNT]> {
        // Slow head turn so orientation logs have something to show
        let yaw = (display_time as f64 / 1e9 * 10.0).to_radians() as f32;
        let orientation = Quat::from_rotation_y(yaw);
        let fov = Fov::symmetric(90.0);
        Ok([
            ViewPose::new(orientation, Vec3::new(-HALF_IPD, 0.0, 0.0), fov),
            ViewPose::new(orientation, Vec3::new(HALF_IPD, 0.0, 0.0), fov),
        ])
    }

    fn target_extent(&self, _eye: Eye) -> Extent2D {
        self.target_extent
    }

    fn target_handles(&self, eye: Eye) -> &[u64] {
        &self.handles[eye.index()]
    }

    fn acquire_target(&mut self, eye: Eye) -> PassthroughResult<u32> {
        if self.take_fault(eye, TargetFault::Acquire) {
            return Err(failure("xrAcquireSwapchainImage", "ERROR_RUNTIME_FAILURE (injected)").into());
        }
        let i = eye.index();
        if self.held[i].is_some() {
            return Err(call_order("xrAcquireSwapchainImage").into());
        }
        let count = self.handles[i].len() as u32;
        if count == 0 {
            return Err(failure("xrAcquireSwapchainImage", "no images").into());
        }
        let index = self.next_image[i];
        self.next_image[i] = (index + 1) % count;
        self.held[i] = Some(index);
        self.waited[i] = false;
        self.acquired[i] += 1;
        Ok(index)
    }

    fn wait_target(&mut self, eye: Eye, timeout: Option<Duration>) -> PassthroughResult<()> {
        if self.take_fault(eye, TargetFault::Wait) {
            let message = format!("TIMEOUT_EXPIRED after {:?} (injected)", timeout);
            return Err(failure("xrWaitSwapchainImage", message).into());
        }
        let i = eye.index();
        if self.held[i].is_none() {
            return Err(call_order("xrWaitSwapchainImage").into());
        }
        self.waited[i] = true;
        Ok(())
    }

    fn release_target(&mut self, eye: Eye) -> PassthroughResult<()> {
        let i = eye.index();
        if self.held[i].is_none() || !self.waited[i] {
            return Err(call_order("xrReleaseSwapchainImage").into());
        }
        self.held[i] = None;
        self.waited[i] = false;
        if self.take_fault(eye, TargetFault::Release) {
            return Err(failure("xrReleaseSwapchainImage", "ERROR_RUNTIME_FAILURE (injected)").into());
        }
        self.ever_released[i] = true;
        self.released[i] += 1;
        Ok(())
    }

    fn end_frame(&mut self, display_time: i64, views: &[Option<ComposedView>; EYE_COUNT]) -> PassthroughResult<()> {
        if !std::mem::take(&mut self.frame_begun) {
            return Err(call_order("xrEndFrame").into());
        }
        let has_layer = views.iter().any(Option::is_some) && self.ever_released.iter().all(|&r| r);
        if has_layer {
            self.layers_submitted += 1;
        }
        self.frames_ended += 1;
        self.last_frame = Some(SubmittedFrame {
            display_time,
            views: *views,
            has_layer,
        });
        Ok(())
    }
}

// ============================================
// TESTS
// ============================================
