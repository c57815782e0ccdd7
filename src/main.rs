//! # Stereo Passthrough - Entry Point
//!
//! Parses the command line, runs the setup pipeline and hands everything
//! to the passthrough loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use stereo_passthrough::capture::source_from_config;
use stereo_passthrough::compose::CompositeMode;
use stereo_passthrough::config::SourceKind;
use stereo_passthrough::{init_logging, setup, Config, PassthroughLoop};

#[derive(Parser, Debug)]
#[command(name = "stereo-passthrough", about = "Stereo camera passthrough for OpenXR headsets")]
struct Args {
    /// Camera device path
    #[arg(long, default_value = "/dev/video0")]
    device: String,

    /// Requested combined (side-by-side) frame width
    #[arg(long)]
    width: Option<u32>,

    /// Requested frame height
    #[arg(long)]
    height: Option<u32>,

    /// Requested capture rate
    #[arg(long)]
    fps: Option<u32>,

    /// Show a side-by-side stereo image instead of the camera
    #[arg(long, conflicts_with = "test_pattern")]
    still: Option<PathBuf>,

    /// Show a synthetic test pattern instead of the camera
    #[arg(long)]
    test_pattern: bool,

    /// Run against the headless runtime and software GPU (no headset needed)
    #[arg(long)]
    headless: bool,

    /// Stop cleanly after this many rendered frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Timeout for waiting on a swapchain image, in milliseconds (0 = forever)
    #[arg(long)]
    target_wait_ms: Option<u64>,

    /// Scale the camera image to fill the view instead of showing it 1:1
    #[arg(long)]
    fit: bool,

    /// Debug-level logging (per-frame pose lines and every failure)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> Config {
        let mut config = if self.headless { Config::headless() } else { Config::default() };

        config.device = self.device.clone();
        if let Some(path) = &self.still {
            config.source = SourceKind::StillImage(path.clone());
        } else if self.test_pattern {
            config.source = SourceKind::TestPattern { drop_every: None };
        } else if !self.headless {
            config.source = SourceKind::Camera;
        }

        if let Some(width) = self.width {
            config.requested_width = width;
        }
        if let Some(height) = self.height {
            config.requested_height = height;
        }
        if let Some(fps) = self.fps {
            config.requested_fps = fps;
        }
        if self.max_frames.is_some() || !self.headless {
            config.max_frames = self.max_frames;
        }
        if let Some(ms) = self.target_wait_ms {
            config.target_wait_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if self.fit {
            config.composite_mode = CompositeMode::Fit;
        }
        if self.verbose {
            config.log_every_n = 1;
        }
        config
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.verbose && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "debug");
    }
    init_logging();

    let config = args.to_config();
    log::info!(
        "Stereo passthrough starting: {}x{} @ {} fps{}",
        config.requested_width,
        config.requested_height,
        config.requested_fps,
        if config.headless { " (headless)" } else { "" }
    );
    setup::validate_config(&config).context("invalid configuration")?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        }) {
            log::warn!("Failed to install Ctrl+C handler: {}", err);
        }
    }

    let mut capture = source_from_config(&config);
    let mode = setup::open_capture(&mut capture, &config).context("capture setup failed")?;

    let final_state = if config.headless {
        let (runtime, device) = setup::build_headless(&config, &mode).context("headless setup failed")?;
        PassthroughLoop::new(config, mode, capture, runtime, device)?
            .with_stop_flag(stop)
            .run()?
    } else {
        let (runtime, device) = setup::build_openxr(&config, &mode).context("OpenXR setup failed")?;
        PassthroughLoop::new(config, mode, capture, runtime, device)?
            .with_stop_flag(stop)
            .run()?
    };

    log::info!("Exited in state {}", final_state);
    Ok(())
}
