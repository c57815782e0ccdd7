//! # Frame Composer
//!
//! Places each eye texture into that eye's swapchain image.
//!
//! ## Plain English
//!
//! For one eye:
//! 1. Borrow an image from the headset's swapchain and wait until the
//!    compositor is done reading it.
//! 2. Paint it with the background colour.
//! 3. Stretch the eye texture into a centered rectangle on it.
//! 4. Hand the image back.
//!
//! If borrowing or waiting fails, only this eye is skipped. An image whose
//! wait timed out is still ours, so the next frame waits on it again
//! instead of borrowing another one.

mod placement;

pub use placement::{centered_placement, CompositeMode};

use std::time::Duration;

use crate::config::Config;
use crate::error::{GpuErrorKind, PassthroughResult};
use crate::gpu::{Extent2D, GpuCommand, GpuDevice, ImageAccess, ImageSlot, Rect};
use crate::runtime::DisplayRuntime;
use crate::{Eye, EYE_COUNT};

/// Result of composing one eye, consumed by the end-frame handshake.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComposedView {
    pub eye: Eye,
    /// Swapchain image written this frame
    pub image_index: u32,
    /// Full extent of the swapchain image
    pub target_extent: Extent2D,
    /// Where the eye texture was placed
    pub placement: Rect,
    /// Predicted display time the frame was composed for (ns)
    pub display_time: i64,
}

/// Composes eye textures into swapchain images.
#[derive(Debug)]
pub struct FrameComposer {
    mode: CompositeMode,
    clear_color: [f32; 4],
    wait_timeout: Option<Duration>,
    /// Acquired images whose wait failed, still owed a wait and a release
    pending: [Option<u32>; EYE_COUNT],
    composed: [u64; EYE_COUNT],
    failed: [u64; EYE_COUNT],
}

impl FrameComposer {
    pub fn new(mode: CompositeMode, clear_color: [f32; 4], wait_timeout: Option<Duration>) -> Self {
        Self {
            mode,
            clear_color,
            wait_timeout,
            pending: [None; EYE_COUNT],
            composed: [0; EYE_COUNT],
            failed: [0; EYE_COUNT],
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.composite_mode, config.clear_color, config.target_wait_timeout)
    }

    pub fn mode(&self) -> CompositeMode {
        self.mode
    }

    /// Swapchain image acquired for `eye` whose wait has not succeeded yet.
    pub fn pending_target(&self, eye: Eye) -> Option<u32> {
        self.pending[eye.index()]
    }

    pub fn composed(&self, eye: Eye) -> u64 {
        self.composed[eye.index()]
    }

    pub fn failed(&self, eye: Eye) -> u64 {
        self.failed[eye.index()]
    }

    /// Hands back images still held after a failed wait.
    ///
    /// Each one gets one more wait and is then released, so the swapchain is
    /// never torn down with an image acquired. An image whose wait fails
    /// again is forgotten. Returns how many were released.
    pub fn release_pending<R: DisplayRuntime + ?Sized>(&mut self, runtime: &mut R) -> usize {
        let mut released = 0;
        for eye in Eye::ALL {
            let Some(index) = self.pending[eye.index()].take() else {
                continue;
            };
            let result = runtime
                .wait_target(eye, self.wait_timeout)
                .and_then(|()| runtime.release_target(eye));
            match result {
                Ok(()) => {
                    log::debug!("Released pending {} target #{}", eye, index);
                    released += 1;
                }
                Err(e) => log::warn!("Dropping pending {} target #{}: {}", eye, index, e),
            }
        }
        released
    }

    /// Composes `eye` for the frame displayed at `display_time`.
    ///
    /// `texture_state` is the eye texture's tracked state; it must be
    /// shader-readable, i.e. hold a completed upload. On success the texture
    /// is shader-readable again and the target has been released.
    pub fn compose_eye<R, D>(
        &mut self,
        eye: Eye,
        display_time: i64,
        texture_state: ImageAccess,
        runtime: &mut R,
        device: &mut D,
    ) -> PassthroughResult<ComposedView>
    where
        R: DisplayRuntime + ?Sized,
        D: GpuDevice + ?Sized,
    {
        let result = self.compose_inner(eye, display_time, texture_state, runtime, device);
        match result {
            Ok(_) => self.composed[eye.index()] += 1,
            Err(_) => self.failed[eye.index()] += 1,
        }
        result
    }

    fn compose_inner<R, D>(
        &mut self,
        eye: Eye,
        display_time: i64,
        texture_state: ImageAccess,
        runtime: &mut R,
        device: &mut D,
    ) -> PassthroughResult<ComposedView>
    where
        R: DisplayRuntime + ?Sized,
        D: GpuDevice + ?Sized,
    {
        let texture = ImageSlot::EyeTexture(eye);
        if texture_state != ImageAccess::ShaderRead {
            return Err(GpuErrorKind::InvalidTransition {
                slot: texture.to_string(),
                expected: ImageAccess::ShaderRead.to_string(),
                actual: texture_state.to_string(),
            }
            .into());
        }

        let image_index = match self.pending[eye.index()].take() {
            Some(index) => {
                log::debug!("Re-waiting on pending {} target #{}", eye, index);
                index
            }
            None => runtime.acquire_target(eye)?,
        };
        if let Err(e) = runtime.wait_target(eye, self.wait_timeout) {
            self.pending[eye.index()] = Some(image_index);
            return Err(e);
        }

        let target_extent = runtime.target_extent(eye);
        let source = device.eye_extent();
        let placement = centered_placement(source, target_extent, self.mode);
        let commands = self.commands(eye, image_index, source, placement);

        // The image is ours until released, whatever the GPU did.
        let executed = device.execute(&commands);
        let released = runtime.release_target(eye);
        executed?;
        released?;

        Ok(ComposedView {
            eye,
            image_index,
            target_extent,
            placement,
            display_time,
        })
    }

    fn commands(&self, eye: Eye, image_index: u32, source: Extent2D, placement: Rect) -> Vec<GpuCommand> {
        let texture = ImageSlot::EyeTexture(eye);
        let target = ImageSlot::Target {
            eye,
            index: image_index,
        };

        let mut commands = Vec::with_capacity(6);
        // Previous contents are overwritten by the clear, so discard them.
        commands.push(GpuCommand::Barrier {
            slot: target,
            from: ImageAccess::Undefined,
            to: ImageAccess::TransferDst,
        });
        commands.push(GpuCommand::Clear {
            slot: target,
            color: self.clear_color,
        });
        commands.push(GpuCommand::Barrier {
            slot: texture,
            from: ImageAccess::ShaderRead,
            to: ImageAccess::TransferSrc,
        });
        if placement.width > 0 && placement.height > 0 {
            commands.push(GpuCommand::Blit {
                src: texture,
                src_rect: source.full_rect(),
                dst: target,
                dst_rect: placement,
            });
        }
        commands.push(GpuCommand::Barrier {
            slot: target,
            from: ImageAccess::TransferDst,
            to: ImageAccess::ColorAttachment,
        });
        commands.push(GpuCommand::Barrier {
            slot: texture,
            from: ImageAccess::TransferSrc,
            to: ImageAccess::ShaderRead,
        });
        commands
    }
}

// ============================================
// TESTS
// ============================================
