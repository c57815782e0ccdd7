//! # Passthrough Loop
//!
//! The single controlling loop: events, gating, capture, upload, frame
//! handshake and composition, strictly in that order.
//!
//! ## Plain English
//!
//! One trip round the loop:
//!
//! ```text
//!   drain runtime events ──► session state machine
//!          │
//!          ├─ Exiting / LossPending? ──► stop
//!          ├─ not Ready/Focused?     ──► short sleep, go again
//!          ▼
//!   grab newest camera frame ── none? ──► short sleep, go again
//!          │
//!   upload left eye, upload right eye ── failed? ──► drop this frame
//!          │
//!   wait_frame / begin_frame
//!          │
//!   should render? ──► compose left, compose right (each may fail alone)
//!          │
//!   end_frame
//! ```
//!
//! Nothing here runs in parallel. Every failure is either contained inside
//! the trip (counted, logged now and then) or is fatal and ends the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::capture::{split_stereo, CaptureFrame, CaptureMode, CaptureSource};
use crate::compose::{ComposedView, FrameComposer};
use crate::config::Config;
use crate::error::{ErrorClass, FrameErrorKind, PassthroughError, PassthroughResult};
use crate::gpu::{Extent2D, GpuDevice};
use crate::runtime::{DisplayRuntime, FrameTiming, ViewPose};
use crate::session::{RuntimeEvent, SessionAction, SessionState, SessionStateMachine};
use crate::telemetry::{Failure, FrameTimer, LoopStats, Stage};
use crate::upload::UploadPipeline;
use crate::{Eye, EYE_COUNT};

/// What one loop iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The session reached a terminal state (or we stopped before it began)
    Exit(SessionState),
    /// Not in a renderable state; slept
    Idle,
    /// The capture source had nothing new; the rest was skipped
    NoFrame,
    /// The frame was dropped before the handshake (bad frame, upload failure)
    Dropped,
    /// The handshake ran but nothing was composed
    NotRendered,
    /// At least one eye was composed and submitted
    Rendered { eyes: usize },
}

/// The main loop over a display runtime, a GPU device and a capture source.
///
/// ## Plain English
///
/// Owns everything for the life of the app. Fields drop top to bottom:
/// the capture source stops first, then the runtime (and its session), and
/// the GPU device last, since the session was created on top of it.
pub struct PassthroughLoop<R, D, C>
where
    R: DisplayRuntime,
    D: GpuDevice,
    C: CaptureSource,
{
    config: Config,
    capture_mode: CaptureMode,
    session: SessionStateMachine,
    upload: UploadPipeline,
    composer: FrameComposer,
    stats: LoopStats,
    timer: FrameTimer,
    stop: Option<Arc<AtomicBool>>,
    exit_requested: bool,
    last_refresh_hz: Option<f32>,

    capture: C,
    runtime: R,
    device: D,
}

impl<R, D, C> PassthroughLoop<R, D, C>
where
    R: DisplayRuntime,
    D: GpuDevice,
    C: CaptureSource,
{
    /// Assembles the loop from set-up parts.
    ///
    /// `capture` must already be open in `capture_mode`, and `device`'s eye
    /// textures must be exactly one eye of that mode.
    pub fn new(config: Config, capture_mode: CaptureMode, capture: C, runtime: R, device: D) -> PassthroughResult<Self> {
        crate::setup::validate_config(&config)?;

        let eye = Extent2D::new(capture_mode.eye_width(), capture_mode.height);
        let textures = device.eye_extent();
        if textures != eye {
            return Err(PassthroughError::setup(
                "size eye textures",
                FrameErrorKind::TextureExtentMismatch {
                    width: textures.width,
                    height: textures.height,
                    got_width: eye.width,
                    got_height: eye.height,
                }
                .into(),
            ));
        }

        Ok(Self {
            capture_mode,
            session: SessionStateMachine::new(),
            upload: UploadPipeline::new(eye),
            composer: FrameComposer::from_config(&config),
            stats: LoopStats::new(config.log_every_n),
            timer: FrameTimer::new(config.timing_window),
            stop: None,
            exit_requested: false,
            last_refresh_hz: None,
            capture,
            runtime,
            device,
            config,
        })
    }

    /// Stops the loop (through a clean session shutdown) once `flag` is set.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn session(&self) -> &SessionStateMachine {
        &self.session
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn upload(&self) -> &UploadPipeline {
        &self.upload
    }

    pub fn composer(&self) -> &FrameComposer {
        &self.composer
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.capture_mode
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Runs until the session ends or a fatal error occurs.
    pub fn run(&mut self) -> PassthroughResult<SessionState> {
        log::info!("Entering passthrough loop ({})", self.capture.describe());

        let result = loop {
            match self.run_iteration() {
                Ok(IterationOutcome::Exit(state)) => break Ok(state),
                Ok(_) => {}
                Err(e) => {
                    log::error!("Fatal error in passthrough loop: {}", e);
                    break Err(e);
                }
            }
        };

        self.capture.close();
        log::info!("Loop finished: {}", self.stats);
        result
    }

    /// Runs one iteration of the loop.
    pub fn run_iteration(&mut self) -> PassthroughResult<IterationOutcome> {
        self.stats.record_iteration();

        // ----------------------------------------
        // Events and gating
        // ----------------------------------------
        if let Some(outcome) = self.drain_events()? {
            return Ok(outcome);
        }
        if self.session.is_terminal() {
            return Ok(IterationOutcome::Exit(self.session.state()));
        }
        if let Some(outcome) = self.handle_stop_request() {
            return Ok(outcome);
        }
        if !self.session.is_renderable() {
            self.idle();
            return Ok(IterationOutcome::Idle);
        }

        // ----------------------------------------
        // Capture and upload
        // ----------------------------------------
        let capture_started = Instant::now();
        let uploaded = match self.capture.try_read_frame() {
            Ok(Some(frame)) => {
                self.timer.record(Stage::Capture, capture_started.elapsed());
                let upload_started = Instant::now();
                let result = upload_frame(frame, &self.capture_mode, &mut self.upload, &mut self.device);
                if result.is_ok() {
                    self.timer.record(Stage::Upload, upload_started.elapsed());
                }
                Some(result)
            }
            Ok(None) => None,
            Err(e) => Some(Err((Failure::CaptureError, e))),
        };

        match uploaded {
            None => {
                if self.stats.record(Failure::MissedCapture) {
                    log::debug!(
                        "No new capture frame ({} so far)",
                        self.stats.count(Failure::MissedCapture)
                    );
                }
                self.idle();
                return Ok(IterationOutcome::NoFrame);
            }
            Some(Err((failure, e))) => {
                self.contain(failure, e)?;
                self.idle();
                return Ok(IterationOutcome::Dropped);
            }
            Some(Ok(())) => {}
        }

        // ----------------------------------------
        // Frame handshake and composition
        // ----------------------------------------
        let timing = match self.begin_frame() {
            Ok(timing) => timing,
            Err(e) => {
                return match self.contain(Failure::Handshake, e)? {
                    Some(outcome) => Ok(outcome),
                    None => Ok(IterationOutcome::Dropped),
                };
            }
        };

        let mut views: [Option<ComposedView>; EYE_COUNT] = [None; EYE_COUNT];
        let compose = self.session.should_compose(timing.should_render);
        if compose {
            let compose_started = Instant::now();
            if let Some(outcome) = self.compose_eyes(&timing, &mut views)? {
                return Ok(outcome);
            }
            self.timer.record(Stage::Compose, compose_started.elapsed());
        }

        if let Err(e) = self.runtime.end_frame(timing.display_time, &views) {
            if let Some(outcome) = self.contain(Failure::Handshake, e)? {
                return Ok(outcome);
            }
        }

        let eyes = views.iter().filter(|v| v.is_some()).count();
        if eyes == 0 {
            self.stats.record_not_rendered();
            return Ok(IterationOutcome::NotRendered);
        }

        self.stats.record_rendered();
        self.timer.mark_frame(Instant::now());
        let rendered = self.stats.frames_rendered();
        if rendered % u64::from(self.config.stats_interval_frames.max(1)) == 0 {
            log::info!("Frame {}: {}", rendered, self.timer.summary());
        }
        Ok(IterationOutcome::Rendered { eyes })
    }

    // ============================================
    // ITERATION STEPS
    // ============================================

    /// Polls until the queue is empty, feeding the state machine.
    fn drain_events(&mut self) -> PassthroughResult<Option<IterationOutcome>> {
        loop {
            let event = match self.runtime.poll_event() {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(None),
                Err(e) => {
                    if let Some(outcome) = self.contain(Failure::Handshake, e)? {
                        return Ok(Some(outcome));
                    }
                    return Ok(None);
                }
            };
            self.apply_event(event);
            if self.session.is_terminal() {
                return Ok(Some(IterationOutcome::Exit(self.session.state())));
            }
        }
    }

    fn apply_event(&mut self, event: RuntimeEvent) {
        let winding_down = matches!(
            event,
            RuntimeEvent::InstanceLossPending
                | RuntimeEvent::StateChanged(
                    SessionState::Stopping | SessionState::Exiting | SessionState::LossPending
                )
        );
        if winding_down {
            self.composer.release_pending(&mut self.runtime);
        }

        // The machine logs transitions itself
        if self.session.apply(event, &mut self.runtime) == SessionAction::BeginFailed {
            log::warn!("Waiting for the runtime to move the session on");
        }
    }

    /// Asks the runtime to wind down once stopped or out of frames.
    ///
    /// The iteration that sends the request renders nothing. Later ones keep
    /// the frame loop going until `Stopping` arrives.
    fn handle_stop_request(&mut self) -> Option<IterationOutcome> {
        if self.exit_requested {
            return None;
        }
        let stop_flag = self.stop.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed));
        let frames_done = self
            .config
            .max_frames
            .is_some_and(|max| self.stats.frames_rendered() >= max);
        if !stop_flag && !frames_done {
            return None;
        }

        self.exit_requested = true;
        log::info!(
            "Stopping ({})",
            if stop_flag { "stop requested" } else { "frame limit reached" }
        );
        if !self.session.is_running() {
            // Nothing to wind down
            return Some(IterationOutcome::Exit(self.session.state()));
        }
        match self.runtime.request_exit() {
            Ok(()) => Some(IterationOutcome::Idle),
            Err(e) => {
                log::warn!("Runtime refused exit request: {}", e);
                Some(IterationOutcome::Exit(self.session.state()))
            }
        }
    }

    /// wait_frame then begin_frame, logging refresh-rate changes.
    fn begin_frame(&mut self) -> PassthroughResult<FrameTiming> {
        let timing = self.runtime.wait_frame()?;
        if let Some(hz) = timing.refresh_hz() {
            let changed = match self.last_refresh_hz {
                Some(prev) => (prev - hz).abs() > 0.1,
                None => true,
            };
            if changed {
                log::info!("Display refresh rate {:.1} Hz", hz);
                self.last_refresh_hz = Some(hz);
            }
        }
        self.runtime.begin_frame()?;
        Ok(timing)
    }

    /// Locates views and composes both eyes; a failing eye is skipped.
    fn compose_eyes(
        &mut self,
        timing: &FrameTiming,
        views: &mut [Option<ComposedView>; EYE_COUNT],
    ) -> PassthroughResult<Option<IterationOutcome>> {
        match self.runtime.locate_views(timing.display_time) {
            Ok(poses) => self.log_pose(&poses),
            Err(e) => return self.contain(Failure::Handshake, e),
        }

        for eye in Eye::ALL {
            let state = self.upload.texture_state(eye);
            match self
                .composer
                .compose_eye(eye, timing.display_time, state, &mut self.runtime, &mut self.device)
            {
                Ok(view) => views[eye.index()] = Some(view),
                Err(e) => {
                    // Whatever the batch did to the texture, the next upload starts clean.
                    self.upload.invalidate(eye);
                    if let Some(outcome) = self.contain(Failure::Compose(eye), e)? {
                        return Ok(Some(outcome));
                    }
                }
            }
        }
        Ok(None)
    }

    fn log_pose(&self, poses: &[ViewPose; EYE_COUNT]) {
        let next = self.stats.frames_rendered() + 1;
        if next % u64::from(self.config.pose_log_interval.max(1)) == 0 {
            let (roll, pitch, yaw) = poses[0].roll_pitch_yaw_degrees();
            log::debug!("Head RPY: R={:.1}° P={:.1}° Y={:.1}°", roll, pitch, yaw);
        }
    }

    /// Decides what a failure means for the loop.
    ///
    /// Transient failures are counted and logged now and then. Protocol
    /// failures drive the session to `LossPending` and end the loop. Setup
    /// and capacity failures are returned as errors.
    fn contain(&mut self, failure: Failure, err: PassthroughError) -> PassthroughResult<Option<IterationOutcome>> {
        match err.class() {
            ErrorClass::Transient => {
                if self.stats.record(failure) {
                    log::warn!(
                        "{} (#{}): {}",
                        failure,
                        self.stats.count(failure),
                        err
                    );
                }
                Ok(None)
            }
            ErrorClass::Protocol => {
                log::error!("Runtime lost: {}", err);
                self.composer.release_pending(&mut self.runtime);
                self.session
                    .apply(RuntimeEvent::StateChanged(SessionState::LossPending), &mut self.runtime);
                Ok(Some(IterationOutcome::Exit(self.session.state())))
            }
            ErrorClass::Setup | ErrorClass::Capacity => Err(err),
        }
    }

    fn idle(&self) {
        if !self.config.idle_sleep.is_zero() {
            thread::sleep(self.config.idle_sleep);
        }
    }
}

/// Checks a captured frame against the negotiated mode, splits it and
/// uploads both eyes.
fn upload_frame<D: GpuDevice + ?Sized>(
    frame: &CaptureFrame,
    mode: &CaptureMode,
    upload: &mut UploadPipeline,
    device: &mut D,
) -> Result<(), (Failure, PassthroughError)> {
    if frame.width() != mode.width || frame.height() != mode.height {
        let err = FrameErrorKind::UnexpectedDimensions {
            expected_width: mode.width,
            expected_height: mode.height,
            got_width: frame.width(),
            got_height: frame.height(),
        };
        return Err((Failure::RejectedFrame, err.into()));
    }

    let pair = split_stereo(frame).map_err(|e| (Failure::RejectedFrame, e))?;
    for eye in Eye::ALL {
        upload
            .upload(device, pair.get(eye))
            .map_err(|e| (Failure::Upload, e))?;
    }
    Ok(())
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TestPatternSource;
    use crate::gpu::{PixelOrder, SoftwareDevice};
    use crate::runtime::HeadlessRuntime;
    use crate::setup::open_capture;

    type TestLoop = PassthroughLoop<HeadlessRuntime, SoftwareDevice, TestPatternSource>;

    fn build(drop_every: Option<u32>, max_frames: Option<u64>) -> TestLoop {
        let mut config = Config::headless();
        config.requested_width = 16;
        config.requested_height = 4;
        config.headless_target = (12, 8);
        config.max_frames = max_frames;

        let mut capture = TestPatternSource::new(drop_every);
        let mode = open_capture(&mut capture, &config).unwrap();
        let runtime = HeadlessRuntime::started(Extent2D::new(12, 8), 3);
        let mut device = SoftwareDevice::new(Extent2D::new(8, 4), PixelOrder::Rgba);
        for eye in Eye::ALL {
            device
                .register_targets(eye, runtime.target_handles(eye), Extent2D::new(12, 8))
                .unwrap();
        }
        PassthroughLoop::new(config, mode, capture, runtime, device).unwrap()
    }

    #[test]
    fn test_first_iteration_renders_both_eyes() {
        let mut app = build(None, None);
        assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });
        assert_eq!(app.session().state(), SessionState::Focused);
        assert_eq!(app.stats().frames_rendered(), 1);
        assert_eq!(app.runtime().layers_submitted(), 1);
    }

    #[test]
    fn test_missing_frame_skips_everything() {
        let mut app = build(Some(2), None);
        assert!(matches!(app.run_iteration().unwrap(), IterationOutcome::Rendered { .. }));
        let waited = app.runtime().frames_waited();

        assert_eq!(app.run_iteration().unwrap(), IterationOutcome::NoFrame);
        assert_eq!(app.stats().frames_rendered(), 1);
        assert_eq!(app.runtime().frames_waited(), waited);
        assert_eq!(app.stats().count(Failure::MissedCapture), 1);

        assert!(matches!(app.run_iteration().unwrap(), IterationOutcome::Rendered { .. }));
    }

    #[test]
    fn test_mismatched_device_is_rejected() {
        let config = Config::headless();
        let mut capture = TestPatternSource::new(None);
        let mode = open_capture(&mut capture, &config).unwrap();
        let runtime = HeadlessRuntime::started(Extent2D::new(12, 8), 3);
        let device = SoftwareDevice::new(Extent2D::new(8, 4), PixelOrder::Rgba);

        let err = PassthroughLoop::new(config, mode, capture, runtime, device)
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_max_frames_winds_down_session() {
        let mut app = build(None, Some(3));
        let state = app.run().unwrap();
        assert_eq!(state, SessionState::Exiting);
        assert_eq!(app.stats().frames_rendered(), 3);
        assert_eq!(app.runtime().session_ends(), 1);
        assert!(!app.session().is_running());
    }

    #[test]
    fn test_stop_flag_before_session_starts() {
        let mut config = Config::headless();
        config.requested_width = 16;
        config.requested_height = 4;
        let mut capture = TestPatternSource::new(None);
        let mode = open_capture(&mut capture, &config).unwrap();
        // No startup events: the session never begins
        let runtime = HeadlessRuntime::new(Extent2D::new(12, 8), 3);
        let device = SoftwareDevice::new(Extent2D::new(8, 4), PixelOrder::Rgba);
        let flag = Arc::new(AtomicBool::new(false));
        let mut app = PassthroughLoop::new(config, mode, capture, runtime, device)
            .unwrap()
            .with_stop_flag(flag.clone());

        assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Idle);
        flag.store(true, Ordering::Relaxed);
        assert_eq!(
            app.run_iteration().unwrap(),
            IterationOutcome::Exit(SessionState::Unknown)
        );
    }
}
