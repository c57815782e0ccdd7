//! # Synthetic Sources
//!
//! Capture sources that need no camera: a replayed stereo still and a
//! generated test pattern.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::{CaptureFrame, CaptureMode, CaptureRequest, CaptureSource, CAPTURE_CHANNELS};
use crate::error::{CaptureErrorKind, PassthroughResult, SetupErrorKind};
use crate::Eye;

// ============================================
// STILL IMAGE SOURCE
// ============================================

/// Replays one side-by-side stereo image as if it were a camera.
///
/// ## Plain English
///
/// Handy for checking alignment in the headset without the camera rig: the
/// same picture is "captured" again at the requested frame rate, so the rest
/// of the pipeline runs exactly as it would live.
pub struct StillImageSource {
    path: PathBuf,
    frame: Option<CaptureFrame>,
    period: Duration,
    next_due: Instant,
}

impl StillImageSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            frame: None,
            period: Duration::from_millis(16),
            next_due: Instant::now(),
        }
    }
}

impl CaptureSource for StillImageSource {
    fn open(&mut self, request: &CaptureRequest) -> PassthroughResult<CaptureMode> {
        log::info!("Loading stereo still {}", self.path.display());

        let rgb = image::open(&self.path)
            .map_err(|e| CaptureErrorKind::OpenFailed {
                device: self.path.display().to_string(),
                reason: e.to_string(),
            })?
            .to_rgb8();

        let (width, height) = rgb.dimensions();
        if width % 2 != 0 {
            return Err(SetupErrorKind::OddCaptureWidth(width).into());
        }

        // The rest of the pipeline expects camera byte order.
        let mut bgr = rgb.into_raw();
        bgr.par_chunks_exact_mut(CAPTURE_CHANNELS).for_each(|px| px.swap(0, 2));

        let fps = request.fps.max(1);
        self.period = Duration::from_secs_f64(1.0 / fps as f64);
        self.next_due = Instant::now();
        self.frame = Some(CaptureFrame::new(bgr, width, height, 0)?);

        if (width, height) != (request.width, request.height) {
            log::warn!(
                "Still is {}x{}, not the requested {}x{}; using the still's size",
                width,
                height,
                request.width,
                request.height
            );
        }

        Ok(CaptureMode { width, height, fps })
    }

    fn try_read_frame(&mut self) -> PassthroughResult<Option<&CaptureFrame>> {
        let period = self.period;
        let frame = self.frame.as_mut().ok_or(CaptureErrorKind::NotOpen)?;

        let now = Instant::now();
        if now < self.next_due {
            return Ok(None);
        }
        // Skip missed ticks instead of bursting to catch up.
        self.next_due += period;
        if self.next_due <= now {
            self.next_due = now + period;
        }

        let sequence = frame.sequence() + 1;
        frame.refill(sequence, |_| {});
        Ok(Some(&*frame))
    }

    fn close(&mut self) {
        self.frame = None;
    }

    fn describe(&self) -> String {
        format!("still image {}", self.path.display())
    }
}

// ============================================
// TEST PATTERN SOURCE
// ============================================

/// Generates deterministic stereo frames.
///
/// ## Plain English
///
/// Left and right halves get different gradients so a swapped eye is
/// obvious, and the gradient shifts by one every frame so a frozen eye is
/// obvious too. Optionally every Nth poll reports "no frame yet" to
/// exercise the skip path.
pub struct TestPatternSource {
    drop_every: Option<u32>,
    polls: u64,
    frame: Option<CaptureFrame>,
}

impl TestPatternSource {
    pub fn new(drop_every: Option<u32>) -> Self {
        Self {
            drop_every,
            polls: 0,
            frame: None,
        }
    }

    /// The BGR value the pattern puts at eye-local `(x, y)` in frame `sequence`.
    pub fn expected_pixel(eye: Eye, x: u32, y: u32, sequence: u64) -> [u8; 3] {
        let shifted = (x as u64 + sequence) as u8;
        let row = y as u8;
        match eye {
            Eye::Left => [shifted, row, 0x40],
            Eye::Right => [row, shifted, 0xC0],
        }
    }

    fn paint(data: &mut [u8], width: u32, sequence: u64) {
        let eye_width = width / 2;
        let stride = width as usize * CAPTURE_CHANNELS;

        data.par_chunks_exact_mut(stride)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(CAPTURE_CHANNELS).enumerate() {
                    let x = x as u32;
                    let (eye, local_x) = if x < eye_width {
                        (Eye::Left, x)
                    } else {
                        (Eye::Right, x - eye_width)
                    };
                    px.copy_from_slice(&Self::expected_pixel(eye, local_x, y as u32, sequence));
                }
            });
    }
}

impl CaptureSource for TestPatternSource {
    fn open(&mut self, request: &CaptureRequest) -> PassthroughResult<CaptureMode> {
        if request.width == 0 || request.width % 2 != 0 {
            return Err(SetupErrorKind::OddCaptureWidth(request.width).into());
        }

        let len = request.width as usize * request.height as usize * CAPTURE_CHANNELS;
        self.frame = Some(CaptureFrame::new(vec![0; len], request.width, request.height, 0)?);
        self.polls = 0;

        log::info!(
            "Test pattern {}x{} (drop every {:?} polls)",
            request.width,
            request.height,
            self.drop_every
        );

        Ok(CaptureMode {
            width: request.width,
            height: request.height,
            fps: request.fps,
        })
    }

    fn try_read_frame(&mut self) -> PassthroughResult<Option<&CaptureFrame>> {
        let frame = self.frame.as_mut().ok_or(CaptureErrorKind::NotOpen)?;

        self.polls += 1;
        if let Some(n) = self.drop_every {
            if n > 0 && self.polls % n as u64 == 0 {
                return Ok(None);
            }
        }

        let sequence = frame.sequence() + 1;
        let width = frame.width();
        frame.refill(sequence, |data| Self::paint(data, width, sequence));
        Ok(Some(&*frame))
    }

    fn close(&mut self) {
        self.frame = None;
    }

    fn describe(&self) -> String {
        "test pattern".to_string()
    }
}

// ============================================
// TESTS
// ============================================
