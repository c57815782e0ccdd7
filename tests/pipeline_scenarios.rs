//! End-to-end runs of the loop on the headless runtime and software device.

mod common;

use stereo_passthrough::capture::TestPatternSource;
use stereo_passthrough::gpu::{GpuDevice, ImageAccess, PixelOrder, Rect};
use stereo_passthrough::runtime::TargetFault;
use stereo_passthrough::session::RuntimeEvent;
use stereo_passthrough::telemetry::Failure;
use stereo_passthrough::{Eye, IterationOutcome, SessionState};

use common::{build, small_config};

#[test]
fn test_full_resolution_frame_reaches_both_targets() {
    let mut config = small_config();
    config.requested_width = 3200;
    config.requested_height = 1200;
    config.requested_fps = 60;
    config.headless_target = (2468, 2740);
    let clear = PixelOrder::Rgba.arrange(config.clear_color);

    let mut app = build(config, Some(2));
    assert_eq!(app.capture_mode().eye_width(), 1600);
    assert_eq!(app.device_mut().staging_capacity(), 7_680_000);

    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });

    let frame = *app.runtime().last_frame().unwrap();
    assert!(frame.has_layer);
    for eye in Eye::ALL {
        let view = frame.views[eye.index()].unwrap();
        assert_eq!(view.placement, Rect { x: 434, y: 770, width: 1600, height: 1200 });

        // Texture holds the first pattern frame, widened to RGBA
        let [b, g, r] = TestPatternSource::expected_pixel(eye, 5, 3, 1);
        let texture = app.device().texture_pixels(eye);
        let at = (3 * 1600 + 5) * 4;
        assert_eq!(&texture[at..at + 4], &[r, g, b, 255]);

        // Same pixel, shifted by the placement, in the swapchain image
        let target = app.device().target_pixels(eye, view.image_index).unwrap();
        let at = ((770 + 3) * 2468 + 434 + 5) * 4;
        assert_eq!(&target[at..at + 4], &[r, g, b, 255]);
        assert_eq!(&target[0..4], &clear);
    }

    // Second poll has no frame: skipped, counters unchanged
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::NoFrame);
    assert_eq!(app.stats().frames_rendered(), 1);
    assert_eq!(app.runtime().frames_waited(), 1);
}

#[test]
fn test_missing_frames_only_skip() {
    let mut app = build(small_config(), Some(3));
    let outcomes: Vec<IterationOutcome> = (0..6).map(|_| app.run_iteration().unwrap()).collect();

    let rendered = outcomes
        .iter()
        .filter(|o| matches!(o, IterationOutcome::Rendered { .. }))
        .count();
    assert_eq!(rendered, 4);
    assert_eq!(outcomes[2], IterationOutcome::NoFrame);
    assert_eq!(outcomes[5], IterationOutcome::NoFrame);
    assert_eq!(app.stats().count(Failure::MissedCapture), 2);
    assert_eq!(app.runtime().frames_waited(), 4);
}

#[test]
fn test_one_eye_failing_still_submits_frame() {
    let mut app = build(small_config(), None);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });

    app.runtime_mut().inject_fault(Eye::Right, TargetFault::Wait);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 1 });

    let frame = *app.runtime().last_frame().unwrap();
    assert!(frame.has_layer);
    assert!(frame.views[Eye::Left.index()].is_some());
    assert!(frame.views[Eye::Right.index()].is_none());
    assert!(app.composer().pending_target(Eye::Right).is_some());
    assert_eq!(app.upload().texture_state(Eye::Right), ImageAccess::Undefined);
    assert_eq!(app.stats().count(Failure::Compose(Eye::Right)), 1);

    // The pending image is waited on again instead of acquiring another
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });
    assert_eq!(app.runtime().acquired(Eye::Left), 3);
    assert_eq!(app.runtime().acquired(Eye::Right), 2);
    assert_eq!(app.runtime().held(Eye::Right), None);
}

#[test]
fn test_failed_upload_drops_frame_before_handshake() {
    let mut app = build(small_config(), None);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });

    app.device_mut().fail_next_batch_after(1);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Dropped);
    assert_eq!(app.runtime().frames_waited(), 1);
    assert_eq!(app.stats().count(Failure::Upload), 1);
    assert_eq!(app.upload().texture_state(Eye::Left), ImageAccess::Undefined);

    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });
    assert_eq!(app.upload().texture_state(Eye::Left), ImageAccess::ShaderRead);
}

#[test]
fn test_bounded_run_ends_session_cleanly() {
    let mut config = small_config();
    config.max_frames = Some(5);
    let mut app = build(config, None);

    assert_eq!(app.run().unwrap(), SessionState::Exiting);
    assert_eq!(app.stats().frames_rendered(), 5);
    assert_eq!(app.runtime().layers_submitted(), 5);
    assert_eq!(app.runtime().session_begins(), 1);
    assert_eq!(app.runtime().session_ends(), 1);
    assert_eq!(app.stats().total_failures(), 0);
}

#[test]
fn test_instance_loss_ends_loop() {
    let mut app = build(small_config(), None);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });

    app.runtime_mut().push_event(RuntimeEvent::InstanceLossPending);
    assert_eq!(
        app.run_iteration().unwrap(),
        IterationOutcome::Exit(SessionState::LossPending)
    );
    assert_eq!(app.stats().frames_rendered(), 1);
    assert!(!app.session().is_running());
}
