//! # Upload Pipeline
//!
//! Moves one eye's pixels from the captured frame into that eye's texture.
//!
//! ## Plain English
//!
//! 1. Convert the eye's BGR pixels to the texture's 4-byte layout, writing
//!    straight into the staging buffer (shared memory the GPU can read).
//! 2. Tell the GPU: get the texture ready to be written, copy staging into
//!    it, then make it readable again.
//! 3. Wait until the GPU is done, because the staging buffer gets reused
//!    for the other eye right after.
//!
//! The pipeline remembers what state each texture was left in. If a
//! transfer fails we no longer know, so the texture is marked
//! "undefined" and the next upload starts from scratch.

mod convert;

pub use convert::convert_eye;

use crate::capture::EyeFrame;
use crate::error::{FrameErrorKind, PassthroughError, PassthroughResult};
use crate::gpu::{Extent2D, GpuCommand, GpuDevice, ImageAccess, ImageSlot};
use crate::{Eye, EYE_COUNT};

/// Uploads eye frames into the device's fixed-size eye textures.
#[derive(Debug)]
pub struct UploadPipeline {
    extent: Extent2D,
    /// Access state each texture was left in by the last operation
    texture_state: [ImageAccess; EYE_COUNT],
    uploads: u64,
    failures: u64,
}

impl UploadPipeline {
    /// Creates a pipeline for textures of `extent`.
    pub fn new(extent: Extent2D) -> Self {
        Self {
            extent,
            texture_state: [ImageAccess::Undefined; EYE_COUNT],
            uploads: 0,
            failures: 0,
        }
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Tracked access state of an eye texture.
    pub fn texture_state(&self, eye: Eye) -> ImageAccess {
        self.texture_state[eye.index()]
    }

    /// Forgets what state an eye texture is in.
    ///
    /// Called after any failed GPU batch touching the texture.
    pub fn invalidate(&mut self, eye: Eye) {
        self.texture_state[eye.index()] = ImageAccess::Undefined;
    }

    /// Successful uploads so far.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Failed uploads so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Uploads one eye frame into `frame.eye()`'s texture.
    ///
    /// Blocks until the transfer completes. On success the texture is
    /// shader-readable and holds exactly this frame.
    pub fn upload<D: GpuDevice + ?Sized>(&mut self, device: &mut D, frame: &EyeFrame<'_>) -> PassthroughResult<()> {
        let eye = frame.eye();
        let extent = Extent2D::new(frame.width(), frame.height());
        if extent != self.extent {
            return Err(FrameErrorKind::TextureExtentMismatch {
                width: self.extent.width,
                height: self.extent.height,
                got_width: extent.width,
                got_height: extent.height,
            }
            .into());
        }

        // A timed-out batch may still be reading staging
        if let Err(e) = device.wait_idle() {
            self.failures += 1;
            return Err(e);
        }

        let order = device.pixel_order();
        let staging = device.staging_mut();
        let needed = frame.rgba_len();
        if needed > staging.len() {
            // Eye size is fixed at startup to match staging; getting here is a bug.
            return Err(PassthroughError::StagingOverflow {
                required: needed,
                capacity: staging.len(),
            });
        }
        convert_eye(frame, &mut staging[..needed], order);

        let slot = ImageSlot::EyeTexture(eye);
        let commands = [
            GpuCommand::Barrier {
                slot,
                from: self.texture_state(eye),
                to: ImageAccess::TransferDst,
            },
            GpuCommand::CopyStagingToImage { slot, extent },
            GpuCommand::Barrier {
                slot,
                from: ImageAccess::TransferDst,
                to: ImageAccess::ShaderRead,
            },
        ];

        match device.execute(&commands) {
            Ok(()) => {
                self.texture_state[eye.index()] = ImageAccess::ShaderRead;
                self.uploads += 1;
                Ok(())
            }
            Err(e) => {
                // The batch may have stopped anywhere; assume nothing.
                self.invalidate(eye);
                self.failures += 1;
                Err(e)
            }
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{split_stereo, CaptureFrame};
    use crate::gpu::{PixelOrder, SoftwareDevice};

    fn stereo_frame(width: u32, height: u32, seed: u8) -> CaptureFrame {
        let data = (0..width * height * 3)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect();
        CaptureFrame::new(data, width, height, seed as u64).unwrap()
    }

    #[test]
    fn test_upload_fills_texture() {
        let frame = stereo_frame(8, 3, 1);
        let pair = split_stereo(&frame).unwrap();
        let mut device = SoftwareDevice::new(Extent2D::new(4, 3), PixelOrder::Rgba);
        let mut pipeline = UploadPipeline::new(Extent2D::new(4, 3));

        pipeline.upload(&mut device, &pair.left).unwrap();
        pipeline.upload(&mut device, &pair.right).unwrap();

        let [b, g, r] = pair.right.pixel(3, 2);
        let texel = &device.texture_pixels(Eye::Right)[(2 * 4 + 3) * 4..][..4];
        assert_eq!(texel, &[r, g, b, 255]);
        assert_eq!(pipeline.texture_state(Eye::Left), ImageAccess::ShaderRead);
        assert_eq!(device.access(ImageSlot::EyeTexture(Eye::Right)), Some(ImageAccess::ShaderRead));
        assert_eq!(pipeline.uploads(), 2);
    }

    #[test]
    fn test_upload_is_idempotent() {
        let frame = stereo_frame(8, 3, 9);
        let pair = split_stereo(&frame).unwrap();
        let mut device = SoftwareDevice::new(Extent2D::new(4, 3), PixelOrder::Bgra);
        let mut pipeline = UploadPipeline::new(Extent2D::new(4, 3));

        pipeline.upload(&mut device, &pair.left).unwrap();
        let first = device.texture_pixels(Eye::Left).to_vec();
        pipeline.upload(&mut device, &pair.left).unwrap();

        assert_eq!(device.texture_pixels(Eye::Left), first.as_slice());
    }

    #[test]
    fn test_wrong_extent_is_rejected() {
        let frame = stereo_frame(8, 3, 0);
        let pair = split_stereo(&frame).unwrap();
        let mut device = SoftwareDevice::new(Extent2D::new(4, 3), PixelOrder::Rgba);
        let mut pipeline = UploadPipeline::new(Extent2D::new(5, 3));

        let err = pipeline.upload(&mut device, &pair.left).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(device.batches_executed(), 0);
    }

    #[test]
    fn test_undersized_staging_fails_loudly() {
        let frame = stereo_frame(8, 3, 0);
        let pair = split_stereo(&frame).unwrap();
        // Device built for a smaller eye than the pipeline expects
        let mut device = SoftwareDevice::new(Extent2D::new(2, 3), PixelOrder::Rgba);
        let mut pipeline = UploadPipeline::new(Extent2D::new(4, 3));

        let err = pipeline.upload(&mut device, &pair.left).unwrap_err();
        assert!(matches!(err, PassthroughError::StagingOverflow { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_staging_untouched_while_timed_out_batch_runs() {
        let first = stereo_frame(8, 3, 1);
        let second = stereo_frame(8, 3, 2);
        let third = stereo_frame(8, 3, 3);
        let mut device = SoftwareDevice::new(Extent2D::new(4, 3), PixelOrder::Rgba);
        let mut pipeline = UploadPipeline::new(Extent2D::new(4, 3));

        // The fence does not signal in time; the copy is still "running"
        device.time_out_next_batch(1);
        let err = pipeline.upload(&mut device, &split_stereo(&first).unwrap().left).unwrap_err();
        assert!(!err.is_fatal());
        assert!(device.is_busy());
        let in_flight = device.staging().to_vec();

        // Still running: the next frame must not land in staging
        assert!(pipeline.upload(&mut device, &split_stereo(&second).unwrap().left).is_err());
        assert_eq!(device.staging(), in_flight.as_slice());
        assert_eq!(pipeline.failures(), 2);

        // Drained: uploads resume from a clean state
        let pair = split_stereo(&third).unwrap();
        pipeline.upload(&mut device, &pair.left).unwrap();
        assert!(!device.is_busy());
        assert_ne!(device.staging(), in_flight.as_slice());
        let [b, g, r] = pair.left.pixel(0, 0);
        assert_eq!(&device.texture_pixels(Eye::Left)[..4], &[r, g, b, 255]);
        assert_eq!(pipeline.texture_state(Eye::Left), ImageAccess::ShaderRead);
    }

    #[test]
    fn test_failed_transfer_resets_tracked_state() {
        let frame = stereo_frame(8, 3, 4);
        let pair = split_stereo(&frame).unwrap();
        let mut device = SoftwareDevice::new(Extent2D::new(4, 3), PixelOrder::Rgba);
        let mut pipeline = UploadPipeline::new(Extent2D::new(4, 3));

        pipeline.upload(&mut device, &pair.left).unwrap();
        device.fail_next_batch_after(2);
        assert!(pipeline.upload(&mut device, &pair.left).is_err());
        assert_eq!(pipeline.texture_state(Eye::Left), ImageAccess::Undefined);
        assert_eq!(pipeline.failures(), 1);

        // Device is stuck in TransferDst; the next upload discards from Undefined.
        assert_eq!(device.access(ImageSlot::EyeTexture(Eye::Left)), Some(ImageAccess::TransferDst));
        pipeline.upload(&mut device, &pair.left).unwrap();
        assert_eq!(pipeline.texture_state(Eye::Left), ImageAccess::ShaderRead);
    }
}
