//! Session lifecycle driving the loop: when it may compose, when it stops.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stereo_passthrough::runtime::TargetFault;
use stereo_passthrough::{Eye, IterationOutcome, SessionState};

use common::{build, small_config};

#[test]
fn test_stopping_halts_composition_despite_stale_should_render() {
    let mut app = build(small_config(), None);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });
    let waited = app.runtime().frames_waited();

    // Runtime still says "render" for frames it has already timed
    app.runtime_mut().set_should_render(true);
    app.runtime_mut().push_state(SessionState::Stopping);

    for _ in 0..3 {
        assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Idle);
    }
    assert!(!app.session().is_running());
    assert!(!app.session().should_compose(true));
    assert_eq!(app.runtime().session_ends(), 1);
    assert_eq!(app.runtime().frames_waited(), waited);
    for eye in Eye::ALL {
        assert_eq!(app.composer().composed(eye), 1);
    }
}

#[test]
fn test_exiting_exits_within_one_iteration_from_any_state() {
    let states = [
        SessionState::Unknown,
        SessionState::Idle,
        SessionState::Ready,
        SessionState::Synchronized,
        SessionState::Visible,
        SessionState::Focused,
        SessionState::Stopping,
    ];

    for state in states {
        let mut app = build(small_config(), None);
        assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });
        app.runtime_mut().push_state(state);
        app.run_iteration().unwrap();
        assert!(!app.session().is_terminal());
        let composed = app.composer().composed(Eye::Left);

        app.runtime_mut().push_state(SessionState::Exiting);
        assert_eq!(
            app.run_iteration().unwrap(),
            IterationOutcome::Exit(SessionState::Exiting),
            "from {}",
            state
        );
        assert_eq!(app.composer().composed(Eye::Left), composed, "from {}", state);
    }
}

#[test]
fn test_exiting_exits_after_failed_begin() {
    let mut app = build(small_config(), None);
    app.runtime_mut().fail_next_begin();
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Idle);
    assert!(!app.session().is_running());

    app.runtime_mut().push_state(SessionState::Ready);
    app.runtime_mut().fail_next_begin();
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Idle);
    assert_eq!(app.session().state(), SessionState::Ready);

    app.runtime_mut().push_state(SessionState::Exiting);
    assert_eq!(
        app.run_iteration().unwrap(),
        IterationOutcome::Exit(SessionState::Exiting)
    );
    assert_eq!(app.composer().composed(Eye::Left), 0);
}

#[test]
fn test_exiting_before_first_iteration() {
    let mut app = build(small_config(), None);
    app.runtime_mut().push_state(SessionState::Exiting);

    assert_eq!(
        app.run_iteration().unwrap(),
        IterationOutcome::Exit(SessionState::Exiting)
    );
    assert_eq!(app.runtime().frames_waited(), 0);
}

#[test]
fn test_stopping_hands_back_pending_target() {
    let mut app = build(small_config(), None);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });

    app.runtime_mut().inject_fault(Eye::Right, TargetFault::Wait);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 1 });
    assert!(app.runtime().held(Eye::Right).is_some());

    app.runtime_mut().push_state(SessionState::Stopping);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Idle);
    assert_eq!(app.composer().pending_target(Eye::Right), None);
    assert_eq!(app.runtime().held(Eye::Right), None);
    assert_eq!(app.runtime().session_ends(), 1);
}

#[test]
fn test_failed_begin_is_not_retried() {
    let mut app = build(small_config(), None);
    app.runtime_mut().fail_next_begin();

    for _ in 0..3 {
        assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Idle);
    }
    assert_eq!(app.session().state(), SessionState::Focused);
    assert!(!app.session().is_running());
    assert_eq!(app.runtime().session_begins(), 0);
    assert_eq!(app.runtime().frames_waited(), 0);
}

#[test]
fn test_should_render_false_runs_handshake_only() {
    let mut app = build(small_config(), None);
    app.runtime_mut().set_should_render(false);

    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::NotRendered);
    assert_eq!(app.runtime().frames_waited(), 1);
    assert_eq!(app.runtime().frames_ended(), 1);
    assert_eq!(app.runtime().layers_submitted(), 0);
    assert_eq!(app.composer().composed(Eye::Left), 0);
    assert_eq!(app.stats().frames_not_rendered(), 1);

    app.runtime_mut().set_should_render(true);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });
}

#[test]
fn test_compose_table_over_states_and_flags() {
    let states = [
        SessionState::Unknown,
        SessionState::Idle,
        SessionState::Ready,
        SessionState::Synchronized,
        SessionState::Visible,
        SessionState::Focused,
        SessionState::Stopping,
    ];

    for state in states {
        for should_render in [false, true] {
            let mut app = build(small_config(), None);
            assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });

            app.runtime_mut().push_state(state);
            app.runtime_mut().set_should_render(should_render);
            app.run_iteration().unwrap();

            let composed = app.composer().composed(Eye::Left) == 2;
            let expected = matches!(state, SessionState::Ready | SessionState::Focused) && should_render;
            assert_eq!(composed, expected, "{} with should_render={}", state, should_render);
        }
    }
}

#[test]
fn test_stop_flag_requests_exit_through_runtime() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut app = build(small_config(), None).with_stop_flag(flag.clone());
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Rendered { eyes: 2 });

    flag.store(true, Ordering::Relaxed);
    assert_eq!(app.run_iteration().unwrap(), IterationOutcome::Idle);
    assert!(app.runtime().exit_requested());

    assert_eq!(
        app.run_iteration().unwrap(),
        IterationOutcome::Exit(SessionState::Exiting)
    );
    assert_eq!(app.runtime().session_ends(), 1);
    assert_eq!(app.stats().frames_rendered(), 1);
}
