//! # OpenXR Runtime
//!
//! [`DisplayRuntime`] for a real headset through the `openxr` crate, with a
//! Vulkan graphics binding.
//!
//! ## Plain English
//!
//! OpenXR hands us three things once the session exists: a queue of events,
//! a frame waiter/stream pair for pacing, and one swapchain per eye. This
//! wrapper turns those into the small vocabulary the main loop speaks.
//!
//! The projection layer sent at end-frame always shows the full swapchain
//! image. It is only sent after both swapchains have released at least one
//! image; before that the compositor would be pointed at images we never
//! wrote.

use std::ptr;
use std::time::Duration;

use glam::{Quat, Vec3};
use openxr as xr;

use crate::compose::ComposedView;
use crate::error::{OpenXRErrorKind, PassthroughResult};
use crate::gpu::Extent2D;
use crate::session::{RuntimeEvent, SessionControl, SessionState};
use crate::{Eye, EYE_COUNT};

use super::{DisplayRuntime, FrameTiming, Fov, ViewPose};

const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// One eye's swapchain and what we know about it.
pub(crate) struct EyeSwapchain {
    pub(crate) swapchain: xr::Swapchain<xr::Vulkan>,
    pub(crate) extent: Extent2D,
    pub(crate) handles: Vec<u64>,
}

/// OpenXR session, frame loop and swapchains.
pub struct OpenXrRuntime {
    swapchains: Vec<EyeSwapchain>,
    space: xr::Space,
    frame_stream: xr::FrameStream<xr::Vulkan>,
    frame_waiter: xr::FrameWaiter,
    session: xr::Session<xr::Vulkan>,
    instance: xr::Instance,

    event_buffer: xr::EventDataBuffer,
    /// Views located for the frame in flight
    views: Vec<xr::View>,
    ever_released: [bool; EYE_COUNT],
}

impl OpenXrRuntime {
    pub(crate) fn new(
        instance: xr::Instance,
        session: xr::Session<xr::Vulkan>,
        frame_waiter: xr::FrameWaiter,
        frame_stream: xr::FrameStream<xr::Vulkan>,
        space: xr::Space,
        swapchains: Vec<EyeSwapchain>,
    ) -> Self {
        Self {
            swapchains,
            space,
            frame_stream,
            frame_waiter,
            session,
            instance,
            event_buffer: xr::EventDataBuffer::new(),
            views: Vec::with_capacity(EYE_COUNT),
            ever_released: [false; EYE_COUNT],
        }
    }

    fn swapchain(&mut self, eye: Eye) -> &mut xr::Swapchain<xr::Vulkan> {
        &mut self.swapchains[eye.index()].swapchain
    }

    /// Waits on the acquired image, reporting a timeout as an error.
    ///
    /// `xrWaitSwapchainImage` signals a timeout with a success code, which
    /// the safe wrapper would swallow, so this goes through the raw call.
    fn wait_image_raw(&self, eye: Eye, timeout: xr::Duration) -> PassthroughResult<()> {
        let info = xr::sys::SwapchainImageWaitInfo {
            ty: xr::sys::SwapchainImageWaitInfo::TYPE,
            next: ptr::null(),
            timeout,
        };
        let handle = self.swapchains[eye.index()].swapchain.as_raw();
        let result = unsafe { (self.instance.fp().wait_swapchain_image)(handle, &info) };
        if result == xr::sys::Result::TIMEOUT_EXPIRED {
            return Err(OpenXRErrorKind::call("xrWaitSwapchainImage", result).into());
        }
        if result.into_raw() < 0 {
            return Err(map_xr_error("xrWaitSwapchainImage", result).into());
        }
        Ok(())
    }
}

/// Maps an OpenXR state to ours.
fn map_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

/// Loss codes become protocol errors; the rest are plain call failures.
fn map_xr_error(call: &'static str, result: xr::sys::Result) -> OpenXRErrorKind {
    match result {
        xr::sys::Result::ERROR_INSTANCE_LOST => OpenXRErrorKind::InstanceLost,
        xr::sys::Result::ERROR_SESSION_LOST => OpenXRErrorKind::SessionLost,
        other => OpenXRErrorKind::call(call, other),
    }
}

fn to_view_pose(view: &xr::View) -> ViewPose {
    let o = view.pose.orientation;
    let p = view.pose.position;
    ViewPose::new(
        Quat::from_xyzw(o.x, o.y, o.z, o.w),
        Vec3::new(p.x, p.y, p.z),
        Fov {
            angle_left: view.fov.angle_left,
            angle_right: view.fov.angle_right,
            angle_up: view.fov.angle_up,
            angle_down: view.fov.angle_down,
        },
    )
}

impl SessionControl for OpenXrRuntime {
    fn begin_session(&mut self) -> PassthroughResult<()> {
        self.session
            .begin(VIEW_TYPE)
            .map_err(|e| map_xr_error("xrBeginSession", e))?;
        log::info!("OpenXR session begun");
        Ok(())
    }

    fn end_session(&mut self) -> PassthroughResult<()> {
        self.session.end().map_err(|e| map_xr_error("xrEndSession", e))?;
        log::info!("OpenXR session ended");
        Ok(())
    }
}

impl DisplayRuntime for OpenXrRuntime {
    fn poll_event(&mut self) -> PassthroughResult<Option<RuntimeEvent>> {
        let event = self
            .instance
            .poll_event(&mut self.event_buffer)
            .map_err(|e| map_xr_error("xrPollEvent", e))?;

        Ok(event.map(|event| match event {
            xr::Event::SessionStateChanged(e) => RuntimeEvent::StateChanged(map_state(e.state())),
            xr::Event::InstanceLossPending(_) => RuntimeEvent::InstanceLossPending,
            xr::Event::EventsLost(e) => RuntimeEvent::EventsLost(e.lost_event_count()),
            _ => RuntimeEvent::Other,
        }))
    }

    fn request_exit(&mut self) -> PassthroughResult<()> {
        self.session
            .request_exit()
            .map_err(|e| map_xr_error("xrRequestExitSession", e))?;
        Ok(())
    }

    fn wait_frame(&mut self) -> PassthroughResult<FrameTiming> {
        let state = self
            .frame_waiter
            .wait()
            .map_err(|e| map_xr_error("xrWaitFrame", e))?;
        Ok(FrameTiming {
            display_time: state.predicted_display_time.as_nanos(),
            period: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> PassthroughResult<()> {
        self.views.clear();
        self.frame_stream
            .begin()
            .map_err(|e| map_xr_error("xrBeginFrame", e))?;
        Ok(())
    }

    fn locate_views(&mut self, display_time: i64) -> PassthroughResult<[ViewPose; EYE_COUNT]> {
        let (_flags, views) = self
            .session
            .locate_views(VIEW_TYPE, xr::Time::from_nanos(display_time), &self.space)
            .map_err(|e| map_xr_error("xrLocateViews", e))?;
        if views.len() != EYE_COUNT {
            return Err(OpenXRErrorKind::Call {
                call: "xrLocateViews",
                message: format!("expected {} views, got {}", EYE_COUNT, views.len()),
            }
            .into());
        }
        let poses = [to_view_pose(&views[0]), to_view_pose(&views[1])];
        self.views = views;
        Ok(poses)
    }

    fn target_extent(&self, eye: Eye) -> Extent2D {
        self.swapchains[eye.index()].extent
    }

    fn target_handles(&self, eye: Eye) -> &[u64] {
        &self.swapchains[eye.index()].handles
    }

    fn acquire_target(&mut self, eye: Eye) -> PassthroughResult<u32> {
        self.swapchain(eye)
            .acquire_image()
            .map_err(|e| map_xr_error("xrAcquireSwapchainImage", e).into())
    }

    fn wait_target(&mut self, eye: Eye, timeout: Option<Duration>) -> PassthroughResult<()> {
        let timeout = match timeout {
            Some(t) => xr::Duration::from_nanos(t.as_nanos().min(i64::MAX as u128) as i64),
            None => xr::Duration::INFINITE,
        };
        self.wait_image_raw(eye, timeout)
    }

    fn release_target(&mut self, eye: Eye) -> PassthroughResult<()> {
        self.swapchain(eye)
            .release_image()
            .map_err(|e| map_xr_error("xrReleaseSwapchainImage", e))?;
        self.ever_released[eye.index()] = true;
        Ok(())
    }

    fn end_frame(&mut self, display_time: i64, views: &[Option<ComposedView>; EYE_COUNT]) -> PassthroughResult<()> {
        let time = xr::Time::from_nanos(display_time);
        let submit = views.iter().any(Option::is_some)
            && self.ever_released.iter().all(|&r| r)
            && self.views.len() == EYE_COUNT;

        if !submit {
            self.frame_stream
                .end(time, xr::EnvironmentBlendMode::OPAQUE, &[])
                .map_err(|e| map_xr_error("xrEndFrame", e))?;
            return Ok(());
        }

        // An eye that failed this frame shows its last released image.
        let layer_views: Vec<xr::CompositionLayerProjectionView<xr::Vulkan>> = Eye::ALL
            .iter()
            .map(|eye| {
                let i = eye.index();
                let target = &self.swapchains[i];
                let rect = xr::Rect2Di {
                    offset: xr::Offset2Di { x: 0, y: 0 },
                    extent: xr::Extent2Di {
                        width: target.extent.width as i32,
                        height: target.extent.height as i32,
                    },
                };
                xr::CompositionLayerProjectionView::new()
                    .pose(self.views[i].pose)
                    .fov(self.views[i].fov)
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(&target.swapchain)
                            .image_array_index(0)
                            .image_rect(rect),
                    )
            })
            .collect();

        let layer = xr::CompositionLayerProjection::new()
            .space(&self.space)
            .views(&layer_views);
        let layers: [&xr::CompositionLayerBase<xr::Vulkan>; 1] = [&layer];

        self.frame_stream
            .end(time, xr::EnvironmentBlendMode::OPAQUE, &layers)
            .map_err(|e| map_xr_error("xrEndFrame", e))?;
        Ok(())
    }
}

// ============================================
// TESTS
// ============================================
