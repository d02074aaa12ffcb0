//! State machine for a coaching session
//!
//! All lifecycle transitions go through `reduce()`, which returns the next
//! state and a list of effects for the session runtime to execute. The
//! reducer owns no resources; the runtime owns the link, audio devices,
//! scheduler and store.

use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::CoachError;
use crate::session::clock::{CountdownTick, DiagnosticCountdown, SessionClock};
use crate::streaming::{ConnectionPhase, ConnectionState, ReconnectPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStep {
    FetchingConfig,
    Connecting { connection_id: Uuid },
    AcquiringAudio { connection_id: Uuid },
}

/// Everything the reducer tracks while a session is live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Live {
    pub session_id: Uuid,
    pub connection: ConnectionState,
    pub reconnect: ReconnectPolicy,
    pub muted: bool,
    pub clock: SessionClock,
    pub countdown: DiagnosticCountdown,
}

/// Authoritative lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    NotStarted {
        error: Option<String>,
    },
    Starting {
        session_id: Uuid,
        step: StartStep,
        diagnostic_secs: u32,
    },
    Active(Live),
    Paused(Live),
    Ended {
        session_id: Uuid,
        error: Option<String>,
    },
}

impl Default for State {
    fn default() -> Self {
        State::NotStarted { error: None }
    }
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::NotStarted { .. } => "NotStarted",
            State::Starting { .. } => "Starting",
            State::Active(_) => "Active",
            State::Paused(_) => "Paused",
            State::Ended { .. } => "Ended",
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            State::NotStarted { .. } => None,
            State::Starting { session_id, .. } | State::Ended { session_id, .. } => {
                Some(*session_id)
            }
            State::Active(live) | State::Paused(live) => Some(live.session_id),
        }
    }

    pub fn live(&self) -> Option<&Live> {
        match self {
            State::Active(live) | State::Paused(live) => Some(live),
            _ => None,
        }
    }

    /// The one connection whose events are still relevant
    pub fn connection_id(&self) -> Option<Uuid> {
        match self {
            State::Starting {
                step:
                    StartStep::Connecting { connection_id }
                    | StartStep::AcquiringAudio { connection_id },
                ..
            } => Some(*connection_id),
            State::Active(live) | State::Paused(live) => live.connection.connection_id,
            _ => None,
        }
    }

    /// A start in flight or a live session
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            State::Starting { .. } | State::Active(_) | State::Paused(_)
        )
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            State::NotStarted { error } | State::Ended { error, .. } => error.as_deref(),
            _ => None,
        }
    }
}

/// Events that can trigger state transitions.
/// Sent by the controller, the link, audio acquisition and timers.
#[derive(Debug, Clone)]
pub enum Event {
    StartRequested {
        diagnostic_secs: u32,
    },
    StopRequested,
    ToggleMute,
    TogglePause,

    // Start-up
    ConfigReady {
        id: Uuid,
    },
    ConfigFailed {
        id: Uuid,
        err: CoachError,
    },
    AudioReady {
        id: Uuid,
    },
    AudioFailed {
        id: Uuid,
        err: CoachError,
    },

    // Transport (tagged with the connection they belong to)
    TransportOpened {
        connection_id: Uuid,
    },
    TransportFailed {
        connection_id: Uuid,
        err: CoachError,
    },
    /// Unrequested close of an open link
    TransportClosed {
        connection_id: Uuid,
        reason: String,
    },
    GreetingDue {
        connection_id: Uuid,
    },

    // Timers
    ReconnectDue {
        id: Uuid,
    },
    /// One second of wall time
    Tick {
        id: Uuid,
    },

    DiagnosticReceived {
        id: Uuid,
    },
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchConfig {
        id: Uuid,
    },
    /// Close any existing link, then open a new one
    OpenTransport {
        id: Uuid,
        connection_id: Uuid,
    },
    SendSetup {
        connection_id: Uuid,
    },
    ScheduleGreeting {
        connection_id: Uuid,
    },
    SendStartTrigger {
        connection_id: Uuid,
    },
    SendDiagnosticComplete,
    CloseTransport,
    AcquireAudio {
        id: Uuid,
    },
    ReleaseAudio,
    FlushPlayback,
    PersistTranscript,
    /// Scores that arrived but were never saved
    PersistPendingReport {
        id: Uuid,
        active: Duration,
    },
    /// History entry, report hand-off, metrics summary
    FinalizeSession {
        id: Uuid,
        active: Duration,
    },
    StartSessionTick {
        id: Uuid,
    },
    ScheduleReconnect {
        id: Uuid,
        delay: Duration,
    },
    CancelTimers,
    ResolveStart(Result<(), CoachError>),
    /// Publish a fresh snapshot
    EmitUi,
}

/// Reducer function: (state, event, now) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events tagged with a stale session or connection id
/// - Every path out of a live session flushes playback and persists first
pub fn reduce(state: &State, event: Event, now: Instant) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;

    let current_id = state.session_id();
    let current_connection = state.connection_id();
    let is_stale = |eid: Uuid| current_id != Some(eid);
    let is_stale_link = |cid: Uuid| current_connection != Some(cid);

    match (state, event) {
        // -----------------
        // Start
        // -----------------
        (State::NotStarted { .. } | State::Ended { .. }, StartRequested { diagnostic_secs }) => {
            let id = Uuid::new_v4();
            (
                State::Starting {
                    session_id: id,
                    step: StartStep::FetchingConfig,
                    diagnostic_secs,
                },
                vec![FetchConfig { id }, EmitUi],
            )
        }
        // Rejected by the runtime before it gets here
        (_, StartRequested { .. }) => (state.clone(), vec![]),

        (
            State::Starting {
                session_id,
                step: StartStep::FetchingConfig,
                diagnostic_secs,
            },
            ConfigReady { id },
        ) if *session_id == id => {
            let connection_id = Uuid::new_v4();
            (
                State::Starting {
                    session_id: id,
                    step: StartStep::Connecting { connection_id },
                    diagnostic_secs: *diagnostic_secs,
                },
                vec![OpenTransport { id, connection_id }, EmitUi],
            )
        }
        (State::Starting { session_id, .. }, ConfigFailed { id, err }) if *session_id == id => {
            fail_start(err, vec![])
        }

        (
            State::Starting {
                session_id,
                step: StartStep::Connecting { connection_id },
                diagnostic_secs,
            },
            TransportOpened { connection_id: cid },
        ) if *connection_id == cid => (
            State::Starting {
                session_id: *session_id,
                step: StartStep::AcquiringAudio { connection_id: cid },
                diagnostic_secs: *diagnostic_secs,
            },
            vec![
                SendSetup { connection_id: cid },
                ScheduleGreeting { connection_id: cid },
                AcquireAudio { id: *session_id },
                EmitUi,
            ],
        ),
        (
            State::Starting {
                step: StartStep::Connecting { connection_id },
                ..
            },
            TransportFailed {
                connection_id: cid,
                err,
            },
        ) if *connection_id == cid => fail_start(err, vec![]),
        (
            State::Starting {
                step: StartStep::AcquiringAudio { connection_id },
                ..
            },
            TransportClosed {
                connection_id: cid,
                reason,
            },
        ) if *connection_id == cid => fail_start(
            CoachError::ConnectionFailed(reason),
            vec![CloseTransport, ReleaseAudio],
        ),
        (
            State::Starting {
                step: StartStep::AcquiringAudio { connection_id },
                ..
            },
            GreetingDue { connection_id: cid },
        ) if *connection_id == cid => (state.clone(), vec![SendStartTrigger { connection_id: cid }]),
        (
            State::Starting {
                session_id,
                step: StartStep::AcquiringAudio { connection_id },
                diagnostic_secs,
            },
            AudioReady { id },
        ) if *session_id == id => {
            let live = Live {
                session_id: id,
                connection: ConnectionState::connecting(*connection_id, false).opened(),
                reconnect: ReconnectPolicy::default(),
                muted: false,
                clock: SessionClock::start(now),
                countdown: DiagnosticCountdown::new(*diagnostic_secs),
            };
            (
                State::Active(live),
                vec![StartSessionTick { id }, ResolveStart(Ok(())), EmitUi],
            )
        }
        (State::Starting { session_id, .. }, AudioFailed { id, err }) if *session_id == id => {
            fail_start(err, vec![CloseTransport, ReleaseAudio])
        }
        (State::Starting { session_id, .. }, StopRequested) => (
            State::Ended {
                session_id: *session_id,
                error: None,
            },
            vec![
                CloseTransport,
                ReleaseAudio,
                CancelTimers,
                ResolveStart(Err(CoachError::Cancelled)),
                EmitUi,
            ],
        ),

        // -----------------
        // Stop
        // -----------------
        (State::Active(live) | State::Paused(live), StopRequested) => teardown(live, None, now),
        (State::NotStarted { .. } | State::Ended { .. }, StopRequested) => (state.clone(), vec![]),

        // -----------------
        // Mute / pause
        // -----------------
        (State::Active(live), ToggleMute) => {
            let mut live = live.clone();
            live.muted = !live.muted;
            (State::Active(live), vec![EmitUi])
        }
        (State::Paused(live), ToggleMute) => {
            let mut live = live.clone();
            live.muted = !live.muted;
            (State::Paused(live), vec![EmitUi])
        }
        (State::Active(live), TogglePause) => {
            let mut live = live.clone();
            live.clock.pause(now);
            (State::Paused(live), vec![EmitUi])
        }
        (State::Paused(live), TogglePause) => {
            let mut live = live.clone();
            live.clock.resume(now);
            (State::Active(live), vec![EmitUi])
        }

        // -----------------
        // Live transport
        // -----------------
        (State::Active(live) | State::Paused(live), GreetingDue { connection_id })
            if live.connection.is_current(connection_id) && live.connection.is_open() =>
        {
            (state.clone(), vec![SendStartTrigger { connection_id }])
        }
        (State::Active(live) | State::Paused(live), TransportClosed { connection_id, reason })
            if live.connection.is_current(connection_id) && live.connection.is_open() =>
        {
            log::warn!("Connection {} dropped: {}", connection_id, reason);
            let mut live = live.clone();
            let mut effects = vec![
                FlushPlayback,
                PersistTranscript,
                PersistPendingReport {
                    id: live.session_id,
                    active: live.clock.active(now),
                },
            ];
            match live.reconnect.next_delay() {
                Some(delay) => {
                    live.connection = live.connection.closed();
                    live.connection.reconnecting = true;
                    effects.extend([
                        ScheduleReconnect {
                            id: live.session_id,
                            delay,
                        },
                        EmitUi,
                    ]);
                    (rewrap(state, live), effects)
                }
                None => teardown(&live, Some(CoachError::ConnectionLost), now),
            }
        }
        // One open in flight at a time
        (State::Active(live) | State::Paused(live), ReconnectDue { id })
            if live.session_id == id
                && live.connection.reconnecting
                && live.connection.phase == ConnectionPhase::Closed =>
        {
            let connection_id = Uuid::new_v4();
            let mut live = live.clone();
            live.connection = ConnectionState {
                last_connected: live.connection.last_connected,
                ..ConnectionState::connecting(connection_id, true)
            };
            log::info!(
                "Reconnecting (attempt {}/{})",
                live.reconnect.attempts(),
                live.reconnect.max_attempts()
            );
            (
                rewrap(state, live),
                vec![OpenTransport { id, connection_id }, EmitUi],
            )
        }
        (State::Active(live) | State::Paused(live), TransportOpened { connection_id })
            if live.connection.is_current(connection_id) =>
        {
            let mut live = live.clone();
            live.connection = live.connection.opened();
            live.reconnect.reset();
            log::info!("Reconnected on {}", connection_id);
            (
                rewrap(state, live),
                vec![
                    SendSetup { connection_id },
                    ScheduleGreeting { connection_id },
                    EmitUi,
                ],
            )
        }
        (State::Active(live) | State::Paused(live), TransportFailed { connection_id, err })
            if live.connection.is_current(connection_id) =>
        {
            log::warn!("Reconnect attempt failed: {}", err);
            let mut live = live.clone();
            match live.reconnect.next_delay() {
                Some(delay) => {
                    live.connection = live.connection.closed();
                    (
                        rewrap(state, live.clone()),
                        vec![
                            ScheduleReconnect {
                                id: live.session_id,
                                delay,
                            },
                            EmitUi,
                        ],
                    )
                }
                None => teardown(&live, Some(CoachError::ConnectionLost), now),
            }
        }

        // -----------------
        // Timers
        // -----------------
        (State::Active(live), Tick { id }) if live.session_id == id => {
            let mut live = live.clone();
            match live.countdown.tick() {
                CountdownTick::Expired => {
                    log::info!("Diagnostic countdown expired");
                    (
                        State::Active(live),
                        vec![SendDiagnosticComplete, EmitUi],
                    )
                }
                CountdownTick::Running(_) | CountdownTick::Idle => {
                    (State::Active(live), vec![EmitUi])
                }
            }
        }
        // Paused time does not count
        (State::Paused(_), Tick { .. }) => (state.clone(), vec![]),

        (State::Active(live) | State::Paused(live), DiagnosticReceived { id })
            if live.session_id == id =>
        {
            let mut live = live.clone();
            live.countdown.complete();
            (rewrap(state, live), vec![EmitUi])
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, ConfigReady { id } | ConfigFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, AudioReady { id } | AudioFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, ReconnectDue { id } | Tick { id } | DiagnosticReceived { id }) if is_stale(id) => {
            (state.clone(), vec![])
        }
        (
            _,
            TransportOpened { connection_id }
            | TransportFailed { connection_id, .. }
            | TransportClosed { connection_id, .. }
            | GreetingDue { connection_id },
        ) if is_stale_link(connection_id) => {
            log::debug!("Ignoring event from superseded connection {}", connection_id);
            (state.clone(), vec![])
        }

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

/// Start failed: release whatever was acquired, report the error
fn fail_start(err: CoachError, mut effects: Vec<Effect>) -> (State, Vec<Effect>) {
    log::warn!("Session start failed: {}", err);
    effects.extend([
        Effect::CancelTimers,
        Effect::ResolveStart(Err(err.clone())),
        Effect::EmitUi,
    ]);
    (
        State::NotStarted {
            error: Some(err.to_string()),
        },
        effects,
    )
}

/// Every way out of a live session
fn teardown(live: &Live, error: Option<CoachError>, now: Instant) -> (State, Vec<Effect>) {
    if let Some(err) = &error {
        log::error!("Session {} ending: {}", live.session_id, err);
    }
    (
        State::Ended {
            session_id: live.session_id,
            error: error.map(|e| e.to_string()),
        },
        vec![
            Effect::FlushPlayback,
            Effect::PersistTranscript,
            Effect::PersistPendingReport {
                id: live.session_id,
                active: live.clock.active(now),
            },
            Effect::FinalizeSession {
                id: live.session_id,
                active: live.clock.active(now),
            },
            Effect::CloseTransport,
            Effect::ReleaseAudio,
            Effect::CancelTimers,
            Effect::EmitUi,
        ],
    )
}

/// Put an updated `Live` back under the same Active/Paused variant
fn rewrap(state: &State, live: Live) -> State {
    match state {
        State::Paused(_) => State::Paused(live),
        _ => State::Active(live),
    }
}
