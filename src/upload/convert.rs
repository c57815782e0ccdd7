//! BGR → 4-channel pixel conversion.
//!
//! Rows are independent, so they are converted in parallel and written
//! straight into the destination (normally the mapped staging buffer).

use rayon::prelude::*;

use crate::capture::{EyeFrame, CAPTURE_CHANNELS};
use crate::gpu::PixelOrder;

/// Converts one eye from packed BGR into `out` as RGBA or BGRA, alpha 255.
///
/// `out` must hold exactly `width * height * 4` bytes.
pub fn convert_eye(frame: &EyeFrame<'_>, out: &mut [u8], order: PixelOrder) {
    let row_bytes = frame.width() as usize * 4;
    if row_bytes == 0 || frame.height() == 0 {
        return;
    }
    debug_assert_eq!(out.len(), frame.rgba_len());

    out.par_chunks_exact_mut(row_bytes)
        .enumerate()
        .for_each(|(y, dst)| {
            let src = frame.row(y as u32);
            convert_row(src, dst, order);
        });
}

#[inline]
fn convert_row(src: &[u8], dst: &mut [u8], order: PixelOrder) {
    let pixels = dst.chunks_exact_mut(4).zip(src.chunks_exact(CAPTURE_CHANNELS));
    match order {
        PixelOrder::Rgba => {
            for (d, s) in pixels {
                d.copy_from_slice(&[s[2], s[1], s[0], 0xFF]);
            }
        }
        PixelOrder::Bgra => {
            for (d, s) in pixels {
                d.copy_from_slice(&[s[0], s[1], s[2], 0xFF]);
            }
        }
    }
}
