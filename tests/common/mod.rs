//! Shared set-up for the scenario tests.

use stereo_passthrough::capture::TestPatternSource;
use stereo_passthrough::gpu::SoftwareDevice;
use stereo_passthrough::runtime::HeadlessRuntime;
use stereo_passthrough::{setup, Config, PassthroughLoop};

pub type HeadlessLoop = PassthroughLoop<HeadlessRuntime, SoftwareDevice, TestPatternSource>;

/// A headless config with small frames so tests stay fast.
pub fn small_config() -> Config {
    let mut config = Config::headless();
    config.requested_width = 16;
    config.requested_height = 4;
    config.headless_target = (12, 8);
    config.max_frames = None;
    config
}

/// Runs the same setup steps as the binary's headless mode.
pub fn build(config: Config, drop_every: Option<u32>) -> HeadlessLoop {
    let mut capture = TestPatternSource::new(drop_every);
    let mode = setup::open_capture(&mut capture, &config).unwrap();
    let (runtime, device) = setup::build_headless(&config, &mode).unwrap();
    PassthroughLoop::new(config, mode, capture, runtime, device).unwrap()
}
