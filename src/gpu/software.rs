//! # Software Device
//!
//! A CPU stand-in for the GPU that follows the same rules as the real one.
//!
//! ## Plain English
//!
//! Images are plain byte arrays. Each one remembers which access state it
//! is in, and a command that finds an image in the wrong state fails, just
//! like a validation layer would complain on real hardware. Blits use
//! nearest-neighbour sampling, which keeps results exact for tests.

use std::time::Duration;

use crate::error::{GpuErrorKind, PassthroughResult};
use crate::Eye;

use super::{Extent2D, GpuCommand, GpuDevice, ImageAccess, ImageSlot, PixelOrder, Rect};

/// One CPU-side image.
#[derive(Debug)]
struct SoftImage {
    extent: Extent2D,
    pixels: Vec<u8>,
    access: ImageAccess,
}

impl SoftImage {
    fn new(extent: Extent2D) -> Self {
        Self {
            extent,
            pixels: vec![0; extent.rgba_len()],
            access: ImageAccess::Undefined,
        }
    }

    fn stride(&self) -> usize {
        self.extent.width as usize * 4
    }

    fn expect_access(&self, slot: ImageSlot, expected: ImageAccess) -> PassthroughResult<()> {
        if self.access != expected {
            return Err(GpuErrorKind::InvalidTransition {
                slot: slot.to_string(),
                expected: expected.to_string(),
                actual: self.access.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn expect_region(&self, slot: ImageSlot, rect: &Rect) -> PassthroughResult<()> {
        if !self.extent.contains(rect) {
            return Err(GpuErrorKind::OutOfBounds(format!("{} ({:?} in {})", slot, rect, self.extent)).into());
        }
        Ok(())
    }
}

/// CPU implementation of [`GpuDevice`].
#[derive(Debug)]
pub struct SoftwareDevice {
    eye_extent: Extent2D,
    order: PixelOrder,
    staging: Vec<u8>,
    textures: [SoftImage; 2],
    targets: [Vec<SoftImage>; 2],
    /// Fail the next batch after this many commands have been applied
    fail_after: Option<usize>,
    /// Time the next batch out, leaving it "running" for this many waits
    time_out_next: Option<u32>,
    /// Waits a timed-out batch still needs before it finishes
    busy_waits: Option<u32>,
    batches: u64,
    commands: u64,
}

impl SoftwareDevice {
    /// Creates a device with eye textures (and staging) of `eye_extent`.
    pub fn new(eye_extent: Extent2D, order: PixelOrder) -> Self {
        Self {
            eye_extent,
            order,
            staging: vec![0; eye_extent.rgba_len()],
            textures: [SoftImage::new(eye_extent), SoftImage::new(eye_extent)],
            targets: [Vec::new(), Vec::new()],
            fail_after: None,
            time_out_next: None,
            busy_waits: None,
            batches: 0,
            commands: 0,
        }
    }

    /// Makes the next `execute` fail after applying `commands` commands.
    ///
    /// Used to reproduce a transfer that dies halfway through.
    pub fn fail_next_batch_after(&mut self, commands: usize) {
        self.fail_after = Some(commands);
    }

    /// Makes the next `execute` apply its commands but report a timeout, as
    /// if the fence had not signalled. The batch then counts as still
    /// running for `waits` more waits before it finishes.
    pub fn time_out_next_batch(&mut self, waits: u32) {
        self.time_out_next = Some(waits);
    }

    /// Whether a timed-out batch is still "running".
    pub fn is_busy(&self) -> bool {
        self.busy_waits.is_some()
    }

    /// Current contents of the staging buffer.
    pub fn staging(&self) -> &[u8] {
        &self.staging
    }

    /// Current contents of an eye texture.
    pub fn texture_pixels(&self, eye: Eye) -> &[u8] {
        &self.textures[eye.index()].pixels
    }

    /// Current contents of a swapchain image.
    pub fn target_pixels(&self, eye: Eye, index: u32) -> Option<&[u8]> {
        self.targets[eye.index()]
            .get(index as usize)
            .map(|image| image.pixels.as_slice())
    }

    /// Tracked access state of an image.
    pub fn access(&self, slot: ImageSlot) -> Option<ImageAccess> {
        self.image(slot).ok().map(|image| image.access)
    }

    pub fn target_count(&self, eye: Eye) -> usize {
        self.targets[eye.index()].len()
    }

    /// Batches executed successfully.
    pub fn batches_executed(&self) -> u64 {
        self.batches
    }

    /// Commands applied, including those of failed batches.
    pub fn commands_executed(&self) -> u64 {
        self.commands
    }

    fn image(&self, slot: ImageSlot) -> PassthroughResult<&SoftImage> {
        match slot {
            ImageSlot::EyeTexture(eye) => Ok(&self.textures[eye.index()]),
            ImageSlot::Target { eye, index } => self.targets[eye.index()]
                .get(index as usize)
                .ok_or_else(|| GpuErrorKind::UnknownTarget { eye, index }.into()),
        }
    }

    fn image_mut(&mut self, slot: ImageSlot) -> PassthroughResult<&mut SoftImage> {
        match slot {
            ImageSlot::EyeTexture(eye) => Ok(&mut self.textures[eye.index()]),
            ImageSlot::Target { eye, index } => self.targets[eye.index()]
                .get_mut(index as usize)
                .ok_or_else(|| GpuErrorKind::UnknownTarget { eye, index }.into()),
        }
    }

    fn apply(&mut self, command: &GpuCommand) -> PassthroughResult<()> {
        match *command {
            GpuCommand::Barrier { slot, from, to } => {
                let image = self.image_mut(slot)?;
                // Undefined means "whatever it was, discard it".
                if from != ImageAccess::Undefined {
                    image.expect_access(slot, from)?;
                }
                image.access = to;
            }

            GpuCommand::CopyStagingToImage { slot, extent } => {
                let needed = extent.rgba_len();
                if needed > self.staging.len() {
                    return Err(crate::PassthroughError::StagingOverflow {
                        required: needed,
                        capacity: self.staging.len(),
                    });
                }
                let staging = std::mem::take(&mut self.staging);
                let result = (|| -> PassthroughResult<()> {
                    let image = self.image_mut(slot)?;
                    image.expect_access(slot, ImageAccess::TransferDst)?;
                    image.expect_region(slot, &extent.full_rect())?;
                    let row_len = extent.width as usize * 4;
                    let stride = image.stride();
                    for (y, src) in staging[..needed].chunks_exact(row_len.max(1)).enumerate() {
                        let start = y * stride;
                        image.pixels[start..start + row_len].copy_from_slice(src);
                    }
                    Ok(())
                })();
                self.staging = staging;
                result?;
            }

            GpuCommand::Clear { slot, color } => {
                let value = self.order.arrange(color);
                let image = self.image_mut(slot)?;
                image.expect_access(slot, ImageAccess::TransferDst)?;
                for px in image.pixels.chunks_exact_mut(4) {
                    px.copy_from_slice(&value);
                }
            }

            GpuCommand::Blit {
                src,
                src_rect,
                dst,
                dst_rect,
            } => {
                if src == dst {
                    return Err(GpuErrorKind::OutOfBounds(format!("{} blits onto itself", src)).into());
                }
                {
                    let source = self.image(src)?;
                    source.expect_access(src, ImageAccess::TransferSrc)?;
                    source.expect_region(src, &src_rect)?;
                }
                let src_stride = self.image(src)?.stride();
                let source = std::mem::take(&mut self.image_mut(src)?.pixels);
                let result = (|| -> PassthroughResult<()> {
                    let target = self.image_mut(dst)?;
                    target.expect_access(dst, ImageAccess::TransferDst)?;
                    target.expect_region(dst, &dst_rect)?;
                    blit_nearest(&source, src_stride, src_rect, target, dst_rect);
                    Ok(())
                })();
                self.image_mut(src)?.pixels = source;
                result?;
            }
        }
        Ok(())
    }
}

/// Reported by simulated fence timeouts.
const SIMULATED_TIMEOUT: Duration = Duration::from_millis(500);

fn injected_loss() -> crate::PassthroughError {
    GpuErrorKind::Call {
        call: "vkQueueSubmit",
        message: "ERROR_DEVICE_LOST (injected)".into(),
    }
    .into()
}

/// Nearest-neighbour scale of `src_rect` onto `dst_rect`, sampling pixel centres.
fn blit_nearest(source: &[u8], src_stride: usize, src_rect: Rect, target: &mut SoftImage, dst_rect: Rect) {
    if dst_rect.width == 0 || dst_rect.height == 0 || src_rect.width == 0 || src_rect.height == 0 {
        return;
    }
    let dst_stride = target.stride();
    let sample = |d: u32, src_len: u32, dst_len: u32| -> usize {
        ((2 * d as u64 + 1) * src_len as u64 / (2 * dst_len as u64)) as usize
    };

    for dy in 0..dst_rect.height {
        let sy = src_rect.y as usize + sample(dy, src_rect.height, dst_rect.height);
        let dst_row = (dst_rect.y + dy) as usize * dst_stride;
        for dx in 0..dst_rect.width {
            let sx = src_rect.x as usize + sample(dx, src_rect.width, dst_rect.width);
            let s = sy * src_stride + sx * 4;
            let d = dst_row + (dst_rect.x + dx) as usize * 4;
            target.pixels[d..d + 4].copy_from_slice(&source[s..s + 4]);
        }
    }
}

impl GpuDevice for SoftwareDevice {
    fn eye_extent(&self) -> Extent2D {
        self.eye_extent
    }

    fn pixel_order(&self) -> PixelOrder {
        self.order
    }

    fn staging_mut(&mut self) -> &mut [u8] {
        &mut self.staging
    }

    fn wait_idle(&mut self) -> PassthroughResult<()> {
        match self.busy_waits {
            None => Ok(()),
            Some(0) => {
                self.busy_waits = None;
                Ok(())
            }
            Some(n) => {
                self.busy_waits = Some(n - 1);
                Err(GpuErrorKind::Timeout(SIMULATED_TIMEOUT).into())
            }
        }
    }

    fn execute(&mut self, commands: &[GpuCommand]) -> PassthroughResult<()> {
        self.wait_idle()?;
        let fail_after = self.fail_after.take();

        for (i, command) in commands.iter().enumerate() {
            if fail_after == Some(i) {
                return Err(injected_loss());
            }
            self.apply(command)?;
            self.commands += 1;
        }
        if fail_after.is_some_and(|n| n >= commands.len()) {
            return Err(injected_loss());
        }

        if let Some(waits) = self.time_out_next.take() {
            self.busy_waits = Some(waits);
            return Err(GpuErrorKind::Timeout(SIMULATED_TIMEOUT).into());
        }

        self.batches += 1;
        Ok(())
    }

    fn register_targets(&mut self, eye: Eye, handles: &[u64], extent: Extent2D) -> PassthroughResult<()> {
        self.targets[eye.index()] = handles.iter().map(|_| SoftImage::new(extent)).collect();
        log::debug!("Registered {} {} targets of {}", handles.len(), eye, extent);
        Ok(())
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn barrier(slot: ImageSlot, from: ImageAccess, to: ImageAccess) -> GpuCommand {
        GpuCommand::Barrier { slot, from, to }
    }

    #[test]
    fn test_wrong_state_is_rejected() {
        let mut device = SoftwareDevice::new(Extent2D::new(2, 2), PixelOrder::Rgba);
        let slot = ImageSlot::EyeTexture(Eye::Left);

        let copy = GpuCommand::CopyStagingToImage {
            slot,
            extent: Extent2D::new(2, 2),
        };
        assert!(device.execute(&[copy]).is_err());

        let wrong_from = barrier(slot, ImageAccess::ShaderRead, ImageAccess::TransferDst);
        assert!(device.execute(&[wrong_from]).is_err());

        let discard = barrier(slot, ImageAccess::Undefined, ImageAccess::TransferDst);
        assert!(device.execute(&[discard, copy]).is_ok());
        assert_eq!(device.access(slot), Some(ImageAccess::TransferDst));
    }

    #[test]
    fn test_copy_and_clear() {
        let mut device = SoftwareDevice::new(Extent2D::new(2, 1), PixelOrder::Bgra);
        device.staging_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let slot = ImageSlot::EyeTexture(Eye::Right);

        device
            .execute(&[
                barrier(slot, ImageAccess::Undefined, ImageAccess::TransferDst),
                GpuCommand::CopyStagingToImage {
                    slot,
                    extent: Extent2D::new(2, 1),
                },
            ])
            .unwrap();
        assert_eq!(device.texture_pixels(Eye::Right), &[1, 2, 3, 4, 5, 6, 7, 8]);

        device
            .execute(&[GpuCommand::Clear {
                slot,
                color: [1.0, 0.0, 0.0, 1.0],
            }])
            .unwrap();
        assert_eq!(device.texture_pixels(Eye::Right), &[0, 0, 255, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn test_blit_scales_nearest() {
        let mut device = SoftwareDevice::new(Extent2D::new(2, 1), PixelOrder::Rgba);
        device.register_targets(Eye::Left, &[10], Extent2D::new(4, 2)).unwrap();
        device.staging_mut().copy_from_slice(&[10, 10, 10, 255, 20, 20, 20, 255]);

        let texture = ImageSlot::EyeTexture(Eye::Left);
        let target = ImageSlot::Target { eye: Eye::Left, index: 0 };
        device
            .execute(&[
                barrier(texture, ImageAccess::Undefined, ImageAccess::TransferDst),
                GpuCommand::CopyStagingToImage {
                    slot: texture,
                    extent: Extent2D::new(2, 1),
                },
                barrier(texture, ImageAccess::TransferDst, ImageAccess::TransferSrc),
                barrier(target, ImageAccess::Undefined, ImageAccess::TransferDst),
                GpuCommand::Blit {
                    src: texture,
                    src_rect: Extent2D::new(2, 1).full_rect(),
                    dst: target,
                    dst_rect: Extent2D::new(4, 2).full_rect(),
                },
            ])
            .unwrap();

        let pixels = device.target_pixels(Eye::Left, 0).unwrap();
        let reds: Vec<u8> = pixels.chunks_exact(4).map(|px| px[0]).collect();
        assert_eq!(reds, vec![10, 10, 20, 20, 10, 10, 20, 20]);
        // The texture survives the blit
        assert_eq!(device.texture_pixels(Eye::Left)[4], 20);
    }

    #[test]
    fn test_unknown_target() {
        let mut device = SoftwareDevice::new(Extent2D::new(1, 1), PixelOrder::Rgba);
        let target = ImageSlot::Target { eye: Eye::Right, index: 3 };
        assert!(device
            .execute(&[barrier(target, ImageAccess::Undefined, ImageAccess::TransferDst)])
            .is_err());
    }

    #[test]
    fn test_injected_failure_applies_prefix() {
        let mut device = SoftwareDevice::new(Extent2D::new(1, 1), PixelOrder::Rgba);
        let slot = ImageSlot::EyeTexture(Eye::Left);
        device.fail_next_batch_after(1);

        let result = device.execute(&[
            barrier(slot, ImageAccess::Undefined, ImageAccess::TransferDst),
            barrier(slot, ImageAccess::TransferDst, ImageAccess::ShaderRead),
        ]);
        assert!(result.is_err());
        assert_eq!(device.access(slot), Some(ImageAccess::TransferDst));
        assert_eq!(device.batches_executed(), 0);

        // Injection is one-shot
        assert!(device
            .execute(&[barrier(slot, ImageAccess::TransferDst, ImageAccess::ShaderRead)])
            .is_ok());
    }
}
