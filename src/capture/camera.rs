//! # Camera Source
//!
//! Reads a V4L2 stereo camera in MJPEG mode through an `ffmpeg` child
//! process and decodes frames on a background thread.
//!
//! ## Plain English
//!
//! `ffmpeg` talks to the camera and hands us its JPEG stream untouched. A
//! reader thread cuts the stream into pictures, decompresses each one with
//! libjpeg-turbo and drops it in a one-slot mailbox. If the loop hasn't
//! picked up the previous picture yet, it gets thrown away: we always want
//! the newest one.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;

use super::mjpeg::MjpegSplitter;
use super::{CaptureFrame, CaptureMode, CaptureRequest, CaptureSource, CAPTURE_CHANNELS};
use crate::error::{CaptureErrorKind, PassthroughResult, SetupErrorKind};

/// Bytes pulled from ffmpeg's stdout per read
const READ_CHUNK: usize = 64 * 1024;

/// A single JPEG larger than this is considered corrupt
const MAX_JPEG_BYTES: usize = 16 * 1024 * 1024;

// ============================================
// READER STATUS
// ============================================

/// What the reader thread has been up to.
#[derive(Clone, Debug, Default)]
pub struct ReaderStatus {
    pub frames_decoded: u64,
    pub frames_replaced: u64,
    pub decode_errors: u64,
    pub last_error: Option<String>,
}

// ============================================
// CAMERA SOURCE
// ============================================

/// A V4L2 MJPEG camera read through `ffmpeg`.
pub struct CameraSource {
    start_timeout: Duration,
    device: String,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    frames: Option<Receiver<CaptureFrame>>,
    stop: Arc<AtomicBool>,
    status: Arc<Mutex<ReaderStatus>>,
    mode: Option<CaptureMode>,
    current: Option<CaptureFrame>,
    /// `current` has not been handed out yet
    fresh: bool,
}

impl CameraSource {
    /// Creates an unopened camera source.
    ///
    /// `start_timeout` bounds how long `open` waits for the first frame.
    pub fn new(start_timeout: Duration) -> Self {
        Self {
            start_timeout,
            device: String::new(),
            child: None,
            reader: None,
            frames: None,
            stop: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(ReaderStatus::default())),
            mode: None,
            current: None,
            fresh: false,
        }
    }

    /// Snapshot of the reader thread's counters.
    pub fn status(&self) -> ReaderStatus {
        self.status.lock().clone()
    }

    fn spawn_ffmpeg(request: &CaptureRequest) -> PassthroughResult<Child> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("video4linux2")
            .arg("-input_format")
            .arg("mjpeg")
            .arg("-framerate")
            .arg(request.fps.to_string())
            .arg("-video_size")
            .arg(format!("{}x{}", request.width, request.height))
            .arg("-i")
            .arg(&request.device)
            .arg("-c:v")
            .arg("copy")
            .arg("-f")
            .arg("mjpeg")
            .arg("-")
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .stdout(Stdio::piped());

        log::debug!("Spawning {:?}", cmd);

        cmd.spawn().map_err(|e| {
            CaptureErrorKind::OpenFailed {
                device: request.device.clone(),
                reason: format!("could not start ffmpeg: {e}"),
            }
            .into()
        })
    }
}

impl CaptureSource for CameraSource {
    fn open(&mut self, request: &CaptureRequest) -> PassthroughResult<CaptureMode> {
        self.close();
        self.device = request.device.clone();

        log::info!(
            "Opening camera {} (requesting {}x{} @ {} FPS, MJPEG)",
            request.device,
            request.width,
            request.height,
            request.fps
        );

        let mut child = Self::spawn_ffmpeg(request)?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                return Err(CaptureErrorKind::ProcessFailed("ffmpeg stdout not captured".into()).into());
            }
        };

        // One slot: the reader evicts an unread frame rather than queueing it.
        let (tx, rx) = channel::bounded(1);
        self.stop.store(false, Ordering::SeqCst);
        *self.status.lock() = ReaderStatus::default();

        let spawned = {
            let stop = Arc::clone(&self.stop);
            let status = Arc::clone(&self.status);
            let evict = rx.clone();
            thread::Builder::new()
                .name("camera-reader".into())
                .spawn(move || reader_loop(stdout, tx, evict, stop, status))
        };
        let reader = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        self.child = Some(child);
        self.reader = Some(reader);

        // The first frame tells us what the camera really negotiated.
        let first = match rx.recv_timeout(self.start_timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                self.close();
                return Err(SetupErrorKind::CaptureStartTimeout(self.start_timeout).into());
            }
            Err(RecvTimeoutError::Disconnected) => {
                let reason = self
                    .status()
                    .last_error
                    .unwrap_or_else(|| "ffmpeg exited before the first frame".into());
                self.close();
                return Err(CaptureErrorKind::OpenFailed {
                    device: request.device.clone(),
                    reason,
                }
                .into());
            }
        };

        let mode = CaptureMode {
            width: first.width(),
            height: first.height(),
            // ffmpeg cannot report the negotiated rate for a stream copy.
            fps: request.fps,
        };

        if (mode.width, mode.height) != (request.width, request.height) {
            log::warn!(
                "Camera delivers {}x{}, not the requested {}x{}",
                mode.width,
                mode.height,
                request.width,
                request.height
            );
        }
        log::info!("Camera open: {}x{} @ {} FPS", mode.width, mode.height, mode.fps);

        self.frames = Some(rx);
        self.current = Some(first);
        self.fresh = true;
        self.mode = Some(mode);
        Ok(mode)
    }

    fn try_read_frame(&mut self) -> PassthroughResult<Option<&CaptureFrame>> {
        let frames = self.frames.as_ref().ok_or(CaptureErrorKind::NotOpen)?;

        loop {
            match frames.try_recv() {
                Ok(frame) => {
                    self.current = Some(frame);
                    self.fresh = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.fresh {
                        break;
                    }
                    if let Some(reason) = self.status().last_error {
                        log::error!("Camera reader stopped: {}", reason);
                    }
                    return Err(CaptureErrorKind::Disconnected.into());
                }
            }
        }

        if !self.fresh {
            return Ok(None);
        }
        self.fresh = false;
        Ok(self.current.as_ref())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);

        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        // Killing ffmpeg closes its stdout, which ends the reader's blocking read.
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                log::warn!("Camera reader thread panicked");
            }
        }

        if self.frames.take().is_some() {
            let status = self.status();
            log::info!(
                "Camera closed: {} frames decoded, {} replaced unread, {} decode errors",
                status.frames_decoded,
                status.frames_replaced,
                status.decode_errors
            );
        }
        self.current = None;
        self.fresh = false;
        self.mode = None;
    }

    fn describe(&self) -> String {
        match self.mode {
            Some(mode) => format!("camera {} ({}x{} MJPEG)", self.device, mode.width, mode.height),
            None => format!("camera {}", self.device),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================
// READER THREAD
// ============================================

fn reader_loop(
    mut stdout: ChildStdout,
    tx: Sender<CaptureFrame>,
    evict: Receiver<CaptureFrame>,
    stop: Arc<AtomicBool>,
    status: Arc<Mutex<ReaderStatus>>,
) {
    let mut splitter = MjpegSplitter::new(MAX_JPEG_BYTES);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut decompressor = match turbojpeg::Decompressor::new() {
        Ok(d) => d,
        Err(e) => {
            status.lock().last_error = Some(format!("turbojpeg init failed: {e}"));
            return;
        }
    };
    let mut sequence = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let read = match stdout.read(&mut chunk) {
            Ok(0) => {
                status.lock().last_error = Some("ffmpeg closed its output".into());
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                status.lock().last_error = Some(format!("reading ffmpeg output failed: {e}"));
                break;
            }
        };
        splitter.push(&chunk[..read]);

        while let Some(jpeg) = splitter.next_image() {
            let frame = match decode_bgr(&mut decompressor, &jpeg, sequence) {
                Ok(frame) => frame,
                Err(e) => {
                    let mut status = status.lock();
                    status.decode_errors += 1;
                    status.last_error = Some(e.to_string());
                    continue;
                }
            };
            sequence += 1;
            status.lock().frames_decoded += 1;

            if !publish_newest(&tx, &evict, frame, &status) {
                return;
            }
        }
    }
}

/// Puts a frame in the one-slot channel, replacing an unread one.
///
/// Returns false once the receiving side is gone.
fn publish_newest(
    tx: &Sender<CaptureFrame>,
    evict: &Receiver<CaptureFrame>,
    mut frame: CaptureFrame,
    status: &Mutex<ReaderStatus>,
) -> bool {
    loop {
        match tx.try_send(frame) {
            Ok(()) => return true,
            Err(TrySendError::Full(rejected)) => {
                if evict.try_recv().is_ok() {
                    status.lock().frames_replaced += 1;
                }
                frame = rejected;
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

fn decode_bgr(
    decompressor: &mut turbojpeg::Decompressor,
    jpeg: &[u8],
    sequence: u64,
) -> PassthroughResult<CaptureFrame> {
    let header = decompressor
        .read_header(jpeg)
        .map_err(|e| CaptureErrorKind::DecodeFailed(e.to_string()))?;

    let pitch = header.width * CAPTURE_CHANNELS;
    let mut pixels = vec![0u8; pitch * header.height];
    let image = turbojpeg::Image {
        pixels: pixels.as_mut_slice(),
        width: header.width,
        pitch,
        height: header.height,
        format: turbojpeg::PixelFormat::BGR,
    };
    decompressor
        .decompress(jpeg, image)
        .map_err(|e| CaptureErrorKind::DecodeFailed(e.to_string()))?;

    CaptureFrame::new(pixels, header.width as u32, header.height as u32, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unopened_camera_reports_not_open() {
        let mut camera = CameraSource::new(Duration::from_millis(10));
        let err = camera.try_read_frame().unwrap_err();
        assert!(err.to_string().contains("not open"));
        camera.close();
    }

    #[test]
    fn test_publish_replaces_unread_frame() {
        let (tx, rx) = channel::bounded(1);
        let status = Mutex::new(ReaderStatus::default());
        let frame = |seq| CaptureFrame::new(vec![0; 6], 2, 1, seq).unwrap();

        assert!(publish_newest(&tx, &rx, frame(1), &status));
        assert!(publish_newest(&tx, &rx, frame(2), &status));

        assert_eq!(rx.try_recv().unwrap().sequence(), 2);
        assert!(rx.try_recv().is_err());
        assert_eq!(status.lock().frames_replaced, 1);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut decompressor = turbojpeg::Decompressor::new().unwrap();
        assert!(decode_bgr(&mut decompressor, &[0xFF, 0xD8, 0xFF, 0xD9], 0).is_err());
    }

    #[test]
    fn test_decode_real_jpeg() {
        let image = image::RgbImage::from_pixel(16, 8, image::Rgb([200, 100, 50]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageOutputFormat::Jpeg(95))
            .unwrap();

        let mut decompressor = turbojpeg::Decompressor::new().unwrap();
        let frame = decode_bgr(&mut decompressor, &jpeg, 7).unwrap();

        assert_eq!((frame.width(), frame.height(), frame.sequence()), (16, 8, 7));
        let bgr = &frame.data()[..3];
        assert!((bgr[0] as i32 - 50).abs() < 8);
        assert!((bgr[2] as i32 - 200).abs() < 8);
    }
}
