//! # GPU Device Module
//!
//! The boundary between the frame pipeline and the graphics device.
//!
//! ## Plain English
//!
//! The upload and compose steps don't talk to Vulkan directly. They write a
//! short list of instructions ("move this image into copy-destination mode",
//! "copy the staging buffer into it", "stretch it onto the headset image")
//! and hand the list to a [`GpuDevice`]. The real device turns the list into
//! a Vulkan command buffer; the software device carries it out on byte
//! arrays so tests can look at the pixels.
//!
//! Every image has an *access state* (what it is currently being used for).
//! Moving between states needs a barrier, and the device refuses work on an
//! image that is in the wrong state.

mod software;
mod vulkan;

pub use software::SoftwareDevice;
pub use vulkan::{choose_swapchain_format, VulkanBootstrap, VulkanDevice};

use std::fmt;

use crate::error::PassthroughResult;
use crate::Eye;

// ============================================
// GEOMETRY
// ============================================

/// Width and height of an image, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes at 4 bytes per pixel.
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// The whole image as a rectangle.
    pub fn full_rect(&self) -> Rect {
        Rect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }

    pub fn contains(&self, rect: &Rect) -> bool {
        rect.x as u64 + rect.width as u64 <= self.width as u64
            && rect.y as u64 + rect.height as u64 <= self.height as u64
    }
}

impl fmt::Display for Extent2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned region of an image. Offsets are never negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn extent(&self) -> Extent2D {
        Extent2D::new(self.width, self.height)
    }
}

/// Byte order of 4-channel pixels in the eye textures and swapchain images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelOrder {
    Rgba,
    Bgra,
}

impl PixelOrder {
    /// Orders a normalized RGBA colour for this layout.
    pub fn arrange(&self, rgba: [f32; 4]) -> [u8; 4] {
        let [r, g, b, a] = rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        match self {
            Self::Rgba => [r, g, b, a],
            Self::Bgra => [b, g, r, a],
        }
    }
}

// ============================================
// COMMANDS
// ============================================

/// What an image is currently used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageAccess {
    /// Contents are unknown and may be discarded
    Undefined,
    /// Being written by a copy, clear or blit
    TransferDst,
    /// Being read by a blit
    TransferSrc,
    /// Ready to be sampled
    ShaderRead,
    /// Handed back to the compositor as a colour attachment
    ColorAttachment,
}

impl fmt::Display for ImageAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "undefined",
            Self::TransferDst => "transfer-dst",
            Self::TransferSrc => "transfer-src",
            Self::ShaderRead => "shader-read",
            Self::ColorAttachment => "color-attachment",
        };
        f.write_str(name)
    }
}

/// An image the pipeline can address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageSlot {
    /// The fixed-size texture holding one eye's latest upload
    EyeTexture(Eye),
    /// One image of an eye's swapchain
    Target { eye: Eye, index: u32 },
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EyeTexture(eye) => write!(f, "{} eye texture", eye),
            Self::Target { eye, index } => write!(f, "{} target #{}", eye, index),
        }
    }
}

/// One instruction for the device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GpuCommand {
    /// Moves an image between access states
    Barrier {
        slot: ImageSlot,
        from: ImageAccess,
        to: ImageAccess,
    },

    /// Copies the start of the staging buffer into a tightly packed region
    /// at the image origin. The image must be in `TransferDst`.
    CopyStagingToImage { slot: ImageSlot, extent: Extent2D },

    /// Fills the whole image with a colour. The image must be in `TransferDst`.
    Clear { slot: ImageSlot, color: [f32; 4] },

    /// Scales `src_rect` of `src` onto `dst_rect` of `dst`.
    /// `src` must be in `TransferSrc`, `dst` in `TransferDst`.
    Blit {
        src: ImageSlot,
        src_rect: Rect,
        dst: ImageSlot,
        dst_rect: Rect,
    },
}

// ============================================
// DEVICE TRAIT
// ============================================

/// A graphics device that owns the staging buffer, the eye textures and the
/// registered swapchain images.
///
/// ## Plain English
///
/// Everything here is allocated once, at a fixed size, when the device is
/// created. Nothing grows later: the staging buffer is exactly one eye's
/// worth of pixels.
pub trait GpuDevice {
    /// Size of each eye texture.
    fn eye_extent(&self) -> Extent2D;

    /// Channel order of the eye textures.
    fn pixel_order(&self) -> PixelOrder;

    /// The persistently mapped staging buffer.
    ///
    /// Only safe to write after [`GpuDevice::wait_idle`] succeeded: a batch
    /// that timed out may still be reading it.
    fn staging_mut(&mut self) -> &mut [u8];

    /// Blocks until no submitted batch is still running.
    ///
    /// Fails with a timeout while a previously timed-out batch is still on
    /// the GPU.
    fn wait_idle(&mut self) -> PassthroughResult<()>;

    /// Records, submits and waits for a batch of commands.
    fn execute(&mut self, commands: &[GpuCommand]) -> PassthroughResult<()>;

    /// Makes an eye's swapchain images addressable as `ImageSlot::Target`.
    ///
    /// `handles` are the runtime's native image handles in swapchain order.
    fn register_targets(&mut self, eye: Eye, handles: &[u64], extent: Extent2D) -> PassthroughResult<()>;

    /// Capacity of the staging buffer in bytes.
    fn staging_capacity(&mut self) -> usize {
        self.staging_mut().len()
    }
}

impl<D: GpuDevice + ?Sized> GpuDevice for Box<D> {
    fn eye_extent(&self) -> Extent2D {
        (**self).eye_extent()
    }

    fn pixel_order(&self) -> PixelOrder {
        (**self).pixel_order()
    }

    fn staging_mut(&mut self) -> &mut [u8] {
        (**self).staging_mut()
    }

    fn wait_idle(&mut self) -> PassthroughResult<()> {
        (**self).wait_idle()
    }

    fn execute(&mut self, commands: &[GpuCommand]) -> PassthroughResult<()> {
        (**self).execute(commands)
    }

    fn register_targets(&mut self, eye: Eye, handles: &[u64], extent: Extent2D) -> PassthroughResult<()> {
        (**self).register_targets(eye, handles, extent)
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_contains() {
        let extent = Extent2D::new(2468, 2740);
        assert!(extent.contains(&extent.full_rect()));
        assert!(extent.contains(&Rect {
            x: 434,
            y: 770,
            width: 1600,
            height: 1200,
        }));
        assert!(!extent.contains(&Rect {
            x: 1000,
            y: 0,
            width: 1600,
            height: 1,
        }));
    }

    #[test]
    fn test_pixel_order_arrange() {
        assert_eq!(PixelOrder::Rgba.arrange([1.0, 0.0, 0.5, 1.0]), [255, 0, 128, 255]);
        assert_eq!(PixelOrder::Bgra.arrange([1.0, 0.0, 0.5, 1.0]), [128, 0, 255, 255]);
    }

    #[test]
    fn test_slot_display() {
        assert_eq!(ImageSlot::EyeTexture(Eye::Left).to_string(), "left eye texture");
        assert_eq!(
            ImageSlot::Target {
                eye: Eye::Right,
                index: 2
            }
            .to_string(),
            "right target #2"
        );
    }
}
