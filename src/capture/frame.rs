//! # Captured Frame Types
//!
//! Structures for representing stereo camera frames and the per-eye views
//! over them.

use std::time::Instant;

use crate::error::{FrameErrorKind, PassthroughResult};
use crate::Eye;

/// Bytes per pixel of a captured frame (BGR)
pub const CAPTURE_CHANNELS: usize = 3;

// ============================================
// CAPTURE FRAME
// ============================================

/// One side-by-side stereo frame from the capture source.
///
/// ## Plain English
///
/// The camera has two lenses but delivers a single, double-width picture:
/// the left eye's view on the left, the right eye's on the right. This is
/// that picture, stored as tightly packed BGR rows.
///
/// The source keeps ownership and overwrites it on the next read, so the
/// loop only ever borrows it for one iteration.
#[derive(Clone, Debug)]
pub struct CaptureFrame {
    /// Packed BGR pixels, `width * height * 3` bytes
    data: Vec<u8>,

    /// Combined width in pixels (both eyes)
    width: u32,

    /// Height in pixels
    height: u32,

    /// Monotonic frame number assigned by the source
    sequence: u64,

    /// When the source finished producing the frame
    captured_at: Instant,
}

impl CaptureFrame {
    /// Wraps a packed BGR buffer.
    ///
    /// Fails if the buffer is shorter than `width * height * 3`; extra
    /// trailing bytes are dropped.
    pub fn new(mut data: Vec<u8>, width: u32, height: u32, sequence: u64) -> PassthroughResult<Self> {
        let expected = packed_len(width, height);
        if data.len() < expected {
            return Err(FrameErrorKind::Truncated {
                expected,
                got: data.len(),
            }
            .into());
        }
        data.truncate(expected);

        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Combined width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Raw packed BGR bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * CAPTURE_CHANNELS
    }

    /// Reuses this frame's allocation for new content of the same size.
    ///
    /// Sources that deliver frames continuously call this instead of
    /// allocating a fresh buffer every time.
    pub(crate) fn refill(&mut self, sequence: u64, fill: impl FnOnce(&mut [u8])) {
        fill(&mut self.data);
        self.sequence = sequence;
        self.captured_at = Instant::now();
    }
}

fn packed_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CAPTURE_CHANNELS
}

// ============================================
// EYE FRAME
// ============================================

/// A borrowed view of one eye's half of a [`CaptureFrame`].
///
/// ## Plain English
///
/// Cutting the picture in two would mean copying ~5 MB per eye. Instead an
/// eye frame just remembers where its half starts and how far apart the
/// rows are, and reads straight out of the parent frame.
#[derive(Clone, Copy, Debug)]
pub struct EyeFrame<'a> {
    /// Parent bytes starting at this eye's first pixel
    data: &'a [u8],
    width: u32,
    height: u32,
    /// Bytes between row starts in the parent
    stride: usize,
    eye: Eye,
}

impl<'a> EyeFrame<'a> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn eye(&self) -> Eye {
        self.eye
    }

    /// Bytes of packed BGR content in one row of this view.
    pub fn row_len(&self) -> usize {
        self.width as usize * CAPTURE_CHANNELS
    }

    /// One row of BGR pixels.
    ///
    /// # Panics
    /// If `y >= height`.
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_len()]
    }

    /// All rows top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }

    /// BGR value of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let row = self.row(y);
        let i = x as usize * CAPTURE_CHANNELS;
        [row[i], row[i + 1], row[i + 2]]
    }

    /// Size of this eye once converted to 4 bytes per pixel.
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

// ============================================
// FRAME SPLITTER
// ============================================

/// The two eye views of one stereo frame.
#[derive(Clone, Copy, Debug)]
pub struct StereoPair<'a> {
    pub left: EyeFrame<'a>,
    pub right: EyeFrame<'a>,
}

impl<'a> StereoPair<'a> {
    pub fn get(&self, eye: Eye) -> &EyeFrame<'a> {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }
}

/// Splits a side-by-side frame into left and right eye views.
///
/// Left covers columns `[0, W/2)`, right covers `[W/2, W)`, both span every
/// row. Nothing is copied.
pub fn split_stereo(frame: &CaptureFrame) -> PassthroughResult<StereoPair<'_>> {
    if frame.width % 2 != 0 {
        return Err(FrameErrorKind::OddWidth(frame.width).into());
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(FrameErrorKind::Empty {
            width: frame.width,
            height: frame.height,
        }
        .into());
    }

    let eye_width = frame.width / 2;
    let stride = frame.stride();
    let half_bytes = eye_width as usize * CAPTURE_CHANNELS;

    let view = |eye: Eye, offset: usize| EyeFrame {
        data: &frame.data[offset..],
        width: eye_width,
        height: frame.height,
        stride,
        eye,
    };

    Ok(StereoPair {
        left: view(Eye::Left, 0),
        right: view(Eye::Right, half_bytes),
    })
}

// ============================================
// TESTS
// ============================================
