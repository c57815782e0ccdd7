//! # Session State Machine
//!
//! Tracks the display runtime's session lifecycle and decides whether the
//! loop may render.
//!
//! ## Plain English
//!
//! The headset runtime tells us, through events, what it is doing: "ready",
//! "you are visible", "you have focus", "please stop". We are only allowed
//! to hand it frames at certain points of that conversation. This module
//! keeps track of where we are and answers one question each iteration:
//! "should we render now?"
//!
//! ```text
//!   Unknown/Idle ──Ready──► Ready ──► Synchronized ──► Visible ──► Focused
//!                      (begin session)                                │
//!        ▲                                                            │
//!        └────────────── Idle ◄── Stopping (end session) ◄───────────┘
//!
//!   any ──► Exiting      (terminal)
//!   any ──► LossPending  (terminal)
//! ```

use std::fmt;

use crate::error::PassthroughResult;

// ============================================
// SESSION STATE
// ============================================

/// The runtime's view of our session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    /// Every state, in lifecycle order.
    pub const ALL: [SessionState; 9] = [
        Self::Unknown,
        Self::Idle,
        Self::Ready,
        Self::Synchronized,
        Self::Visible,
        Self::Focused,
        Self::Stopping,
        Self::LossPending,
        Self::Exiting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Synchronized => "synchronized",
            Self::Visible => "visible",
            Self::Focused => "focused",
            Self::Stopping => "stopping",
            Self::LossPending => "loss-pending",
            Self::Exiting => "exiting",
        }
    }

    /// The loop must exit once it observes this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exiting | Self::LossPending)
    }

    /// States in which frames are submitted.
    pub fn allows_render(&self) -> bool {
        matches!(self, Self::Ready | Self::Focused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The render decision for one iteration.
///
/// True only for `Ready` or `Focused` with the runtime's should-render flag
/// set. Every other pair means no composition this frame.
pub fn render_permitted(state: SessionState, should_render: bool) -> bool {
    state.allows_render() && should_render
}

// ============================================
// RUNTIME EVENTS
// ============================================

/// Events the display runtime delivers through its queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// The session moved to a new state
    StateChanged(SessionState),

    /// The runtime is about to lose the instance
    InstanceLossPending,

    /// The queue overflowed and this many events were dropped
    EventsLost(u32),

    /// Anything we do not act on
    Other,
}

/// The two session calls a state transition can trigger.
pub trait SessionControl {
    /// Starts submitting frames (on `Ready`).
    fn begin_session(&mut self) -> PassthroughResult<()>;

    /// Stops submitting frames (on `Stopping`).
    fn end_session(&mut self) -> PassthroughResult<()>;
}

/// What [`SessionStateMachine::apply`] did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionAction {
    /// State (maybe) updated, nothing else
    Updated,
    /// Session begun; the loop may start submitting frames
    Began,
    /// `begin_session` failed; state updated, not running
    BeginFailed,
    /// Session ended
    Ended,
    /// A terminal state was reached
    Terminal,
}

// ============================================
// STATE MACHINE
// ============================================

/// Session lifecycle tracker.
///
/// ## Plain English
///
/// Holds the current state plus a "running" flag: whether `begin_session`
/// succeeded and `end_session` hasn't been called since. A failed begin is
/// not retried; the runtime will move us on (or the user will quit).
#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    running: bool,
    transitions: u64,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unknown,
            running: false,
            transitions: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True between a successful begin and the next end (or loss).
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Number of state changes observed so far.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Whether the loop should run the frame handshake this iteration.
    ///
    /// Requires a running session in a render state. The per-frame
    /// should-render flag is checked separately, after waiting on the frame.
    pub fn is_renderable(&self) -> bool {
        self.running && self.state.allows_render()
    }

    /// Whether composition may happen given this frame's should-render flag.
    pub fn should_compose(&self, should_render: bool) -> bool {
        self.running && render_permitted(self.state, should_render)
    }

    /// Feeds one runtime event through the machine.
    ///
    /// `Ready` calls `begin_session`, `Stopping` calls `end_session`. Errors
    /// from those calls are logged and folded into the returned action.
    pub fn apply<S: SessionControl + ?Sized>(&mut self, event: RuntimeEvent, control: &mut S) -> SessionAction {
        let next = match event {
            RuntimeEvent::StateChanged(state) => state,
            RuntimeEvent::InstanceLossPending => SessionState::LossPending,
            RuntimeEvent::EventsLost(count) => {
                log::warn!("Runtime dropped {} events", count);
                return SessionAction::Updated;
            }
            RuntimeEvent::Other => return SessionAction::Updated,
        };

        if self.state.is_terminal() {
            log::debug!("Ignoring {} after terminal state {}", next, self.state);
            return SessionAction::Terminal;
        }

        if next != self.state {
            log::info!("Session state: {} -> {}", self.state, next);
            self.transitions += 1;
        }
        self.state = next;

        match next {
            SessionState::Ready if !self.running => match control.begin_session() {
                Ok(()) => {
                    self.running = true;
                    log::info!("Session begun");
                    SessionAction::Began
                }
                Err(e) => {
                    log::error!("Failed to begin session: {}", e);
                    SessionAction::BeginFailed
                }
            },
            SessionState::Stopping => {
                let was_running = std::mem::replace(&mut self.running, false);
                if was_running {
                    if let Err(e) = control.end_session() {
                        log::error!("Failed to end session: {}", e);
                    } else {
                        log::info!("Session ended");
                    }
                }
                SessionAction::Ended
            }
            SessionState::LossPending | SessionState::Exiting => {
                self.running = false;
                SessionAction::Terminal
            }
            _ => SessionAction::Updated,
        }
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpenXRErrorKind;

    #[derive(Default)]
    struct Recorder {
        begins: u32,
        ends: u32,
        fail_begin: bool,
    }

    impl SessionControl for Recorder {
        fn begin_session(&mut self) -> PassthroughResult<()> {
            self.begins += 1;
            if self.fail_begin {
                return Err(OpenXRErrorKind::call("xrBeginSession", "ERROR_RUNTIME_FAILURE").into());
            }
            Ok(())
        }

        fn end_session(&mut self) -> PassthroughResult<()> {
            self.ends += 1;
            Ok(())
        }
    }

    fn changed(state: SessionState) -> RuntimeEvent {
        RuntimeEvent::StateChanged(state)
    }

    #[test]
    fn test_starts_unknown_and_idle() {
        let machine = SessionStateMachine::new();
        assert_eq!(machine.state(), SessionState::Unknown);
        assert!(!machine.is_running());
        assert!(!machine.is_renderable());
    }

    #[test]
    fn test_ready_begins_session() {
        let mut machine = SessionStateMachine::new();
        let mut control = Recorder::default();

        assert_eq!(machine.apply(changed(SessionState::Idle), &mut control), SessionAction::Updated);
        assert_eq!(machine.apply(changed(SessionState::Ready), &mut control), SessionAction::Began);
        assert_eq!(control.begins, 1);
        assert!(machine.is_running());
        assert!(machine.is_renderable());

        // A repeated Ready does not begin twice
        machine.apply(changed(SessionState::Ready), &mut control);
        assert_eq!(control.begins, 1);
    }

    #[test]
    fn test_begin_failure_leaves_session_stopped() {
        let mut machine = SessionStateMachine::new();
        let mut control = Recorder {
            fail_begin: true,
            ..Default::default()
        };

        assert_eq!(machine.apply(changed(SessionState::Ready), &mut control), SessionAction::BeginFailed);
        assert_eq!(machine.state(), SessionState::Ready);
        assert!(!machine.is_running());
        assert!(!machine.is_renderable());
        assert!(!machine.should_compose(true));
    }

    #[test]
    fn test_stopping_ends_session() {
        let mut machine = SessionStateMachine::new();
        let mut control = Recorder::default();
        for state in [
            SessionState::Ready,
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
        ] {
            machine.apply(changed(state), &mut control);
        }
        assert!(machine.should_compose(true));

        assert_eq!(machine.apply(changed(SessionState::Stopping), &mut control), SessionAction::Ended);
        assert_eq!(control.ends, 1);
        assert!(!machine.is_running());
        // A stale should-render flag must not re-enable composition
        assert!(!machine.should_compose(true));
    }

    #[test]
    fn test_terminal_states_stick() {
        for terminal in [changed(SessionState::Exiting), RuntimeEvent::InstanceLossPending] {
            let mut machine = SessionStateMachine::new();
            let mut control = Recorder::default();
            machine.apply(changed(SessionState::Ready), &mut control);

            assert_eq!(machine.apply(terminal, &mut control), SessionAction::Terminal);
            assert!(machine.is_terminal());
            assert!(!machine.is_running());

            assert_eq!(machine.apply(changed(SessionState::Ready), &mut control), SessionAction::Terminal);
            assert!(machine.is_terminal());
            assert_eq!(control.begins, 1);
        }
    }

    #[test]
    fn test_any_event_order_stays_in_defined_states() {
        let mut machine = SessionStateMachine::new();
        let mut control = Recorder::default();
        // Deterministic pseudo-random walk over every event kind
        let mut seed = 0x2545_f491_u32;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let pick = (seed % 11) as usize;
            let event = match pick {
                9 => RuntimeEvent::EventsLost(1),
                10 => RuntimeEvent::Other,
                i if SessionState::ALL[i].is_terminal() => RuntimeEvent::Other,
                i => changed(SessionState::ALL[i]),
            };
            machine.apply(event, &mut control);
            assert!(SessionState::ALL.contains(&machine.state()));
            assert!(!machine.is_running() || machine.state() != SessionState::Stopping);
        }
    }

    #[test]
    fn test_render_table() {
        for state in SessionState::ALL {
            for flag in [false, true] {
                let expected = flag && (state == SessionState::Ready || state == SessionState::Focused);
                assert_eq!(render_permitted(state, flag), expected, "{} / {}", state, flag);
            }
        }
    }
}
