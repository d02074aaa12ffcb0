//! Session loop
//!
//! One task owns every session resource: the link, the microphone, the
//! output sink and scheduler, the speech detector, the transcript and the
//! store. Everything else (audio callbacks, link reader tasks, timers,
//! collaborator calls, the public handle) talks to it through one unbounded
//! command queue. Lifecycle decisions come from `state_machine::reduce`;
//! this module only executes the effects.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::controller::CoachDeps;
use super::snapshot::{CoachSnapshot, ConnectionStatus};
use super::transcript::TranscriptLog;
use crate::audio::codec::{encode_transport_frame, to_transport_rate};
use crate::audio::{
    run_level_monitor, CaptureHandle, FloatFrame, LevelTap, PlaybackScheduler, PlaybackSink,
    SourceId, SpeechActivityDetector, SpeechTransition,
};
use crate::collaborators::{SessionBundle, SessionConfigRequest};
use crate::error::{CoachError, Result};
use crate::metrics::SessionMetrics;
use crate::settings::CoachSettings;
use crate::state_machine::{reduce, Effect, Event, StartStep, State};
use crate::storage::{CoachStore, SessionHistoryEntry, SessionReport, Speaker};
use crate::streaming::{
    classify_text, ClientMessage, DiagnosticPayload, InboundMessage, LinkEvent, LinkEventSink,
    LiveLink, Scores, TextPayload, DIAGNOSTIC_COMPLETE_TRIGGER, START_SESSION_TRIGGER,
};

/// Session tick period
const TICK: Duration = Duration::from_secs(1);

/// Log every Nth captured frame at debug level
const FRAME_LOG_INTERVAL: u64 = 50;

/// Everything the session loop reacts to
pub(crate) enum Command {
    Start {
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    ToggleMute,
    TogglePause,
    Snapshot {
        reply: oneshot::Sender<CoachSnapshot>,
    },
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },
    ClearHistory {
        reply: oneshot::Sender<Result<()>>,
    },

    /// Completed capture block, from the audio thread
    Frame(FloatFrame),
    PlaybackEnded(SourceId),
    /// Devices opened on the blocking pool for the start `id`
    AudioAcquired {
        id: Uuid,
        result: Result<AcquiredAudio>,
    },

    ConfigFetched {
        id: Uuid,
        result: Result<SessionBundle>,
    },
    LinkOpened {
        connection_id: Uuid,
        link: Box<dyn LiveLink>,
    },
    LinkFailed {
        connection_id: Uuid,
        err: CoachError,
    },
    Link {
        connection_id: Uuid,
        event: LinkEvent,
    },

    /// A timer fired; fed straight to the reducer
    Timer(Event),
    /// Analysis finished; the report is already in the store
    ReportReady {
        result: Result<Value>,
    },
}

/// Current time on the tokio clock, so paused test time drives the session
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn minutes(active: Duration) -> f64 {
    active.as_secs_f64() / 60.0
}

pub(crate) struct AcquiredAudio {
    sink: Box<dyn PlaybackSink>,
    capture: Box<dyn CaptureHandle>,
}

struct ActiveLink {
    connection_id: Uuid,
    link: Box<dyn LiveLink>,
    /// Start turn sent; audio may flow
    greeted: bool,
}

#[derive(Debug, Default)]
struct DiagnosticStatus {
    complete: bool,
    scores: Option<Scores>,
    /// Report saved this session
    report: Option<SessionReport>,
}

pub(crate) struct SessionRuntime {
    deps: CoachDeps,
    settings: CoachSettings,
    commands: mpsc::UnboundedSender<Command>,

    state: State,
    pending: VecDeque<Event>,
    pending_start: Option<oneshot::Sender<Result<()>>>,
    bundle: Option<SessionBundle>,

    link: Option<ActiveLink>,
    connection_error: Option<String>,
    capture: Option<Box<dyn CaptureHandle>>,
    scheduler: Option<PlaybackScheduler>,
    detector: SpeechActivityDetector,
    transcript: TranscriptLog,
    store: CoachStore,
    metrics: SessionMetrics,

    /// Cancels every pending timer; replaced after each cancel
    timers: CancellationToken,
    level_task: Option<CancellationToken>,
    /// Device teardowns still running on the blocking pool
    releases: Vec<JoinHandle<()>>,
    input_tap: LevelTap,
    output_tap: LevelTap,

    snapshot_tx: watch::Sender<CoachSnapshot>,
    level_tx: watch::Sender<f32>,

    diagnostic: DiagnosticStatus,
    last_report: Option<Value>,
    generating_report: bool,
    last_elapsed: Duration,
    dirty: bool,
}

impl SessionRuntime {
    pub(crate) fn new(
        deps: CoachDeps,
        settings: CoachSettings,
        commands: mpsc::UnboundedSender<Command>,
        snapshot_tx: watch::Sender<CoachSnapshot>,
        level_tx: watch::Sender<f32>,
    ) -> Self {
        let store = CoachStore::new(deps.store.clone());
        let last_report = store.last_report();
        Self {
            detector: detector_for(&settings),
            transcript: TranscriptLog::new(settings.transcript_save_interval),
            store,
            deps,
            settings,
            commands,
            state: State::default(),
            pending: VecDeque::new(),
            pending_start: None,
            bundle: None,
            link: None,
            connection_error: None,
            capture: None,
            scheduler: None,
            metrics: SessionMetrics::new(),
            timers: CancellationToken::new(),
            level_task: None,
            releases: Vec::new(),
            input_tap: LevelTap::new(),
            output_tap: LevelTap::new(),
            snapshot_tx,
            level_tx,
            diagnostic: DiagnosticStatus::default(),
            last_report,
            generating_report: false,
            last_elapsed: Duration::ZERO,
            dirty: false,
        }
    }

    /// Run until shutdown
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        self.publish(clock_now());
        log::info!("Session loop started");

        while let Some(command) = rx.recv().await {
            let now = clock_now();

            if let Command::Shutdown { reply } = command {
                log::info!("Shutdown requested, ending session loop");
                self.dispatch(Event::StopRequested, now);
                self.publish(now);
                for release in std::mem::take(&mut self.releases) {
                    let _ = release.await;
                }
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                break;
            }

            self.handle(command, now);
            if self.dirty {
                self.publish(now);
            }
        }

        log::info!("Session loop ended");
    }

    fn handle(&mut self, command: Command, now: Instant) {
        match command {
            Command::Start { reply } => {
                if self.state.is_busy() {
                    log::warn!("Start rejected: session is {}", self.state.name());
                    let _ = reply.send(Err(CoachError::SessionActive));
                    return;
                }
                self.begin_session();
                self.pending_start = Some(reply);
                self.dispatch(
                    Event::StartRequested {
                        diagnostic_secs: self.settings.diagnostic_secs,
                    },
                    now,
                );
            }
            Command::Stop { reply } => {
                self.dispatch(Event::StopRequested, now);
                self.reply_after_release(reply);
            }
            Command::ToggleMute => self.dispatch(Event::ToggleMute, now),
            Command::TogglePause => self.dispatch(Event::TogglePause, now),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot(now));
            }
            // Handled by the loop
            Command::Shutdown { .. } => {}
            Command::ClearHistory { reply } => {
                let result = self.store.clear_history();
                match &result {
                    Ok(()) => log::info!("Session history cleared"),
                    Err(e) => {
                        log::error!("Failed to clear session history: {}", e);
                        self.record_error(e);
                        self.dirty = true;
                    }
                }
                let _ = reply.send(result);
            }

            Command::Frame(frame) => self.on_frame(frame, now),
            Command::PlaybackEnded(id) => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.on_source_ended(id);
                }
            }
            Command::AudioAcquired { id, result } => match result {
                Ok(audio) if self.awaiting_audio(id) => {
                    self.install_audio(audio);
                    self.dispatch(Event::AudioReady { id }, now);
                }
                Ok(AcquiredAudio { sink, mut capture }) => {
                    log::debug!("Releasing devices opened for superseded start {}", id);
                    self.spawn_release(move || {
                        capture.release();
                        drop(sink);
                    });
                }
                Err(err) => self.dispatch(Event::AudioFailed { id, err }, now),
            },

            Command::ConfigFetched { id, result } => match result {
                Ok(bundle) => {
                    if self.state.session_id() == Some(id) {
                        self.bundle = Some(bundle);
                    }
                    self.dispatch(Event::ConfigReady { id }, now);
                }
                Err(err) => self.dispatch(Event::ConfigFailed { id, err }, now),
            },
            Command::LinkOpened {
                connection_id,
                mut link,
            } => {
                if self.state.connection_id() != Some(connection_id) {
                    log::debug!("Closing link {} opened for a superseded attempt", connection_id);
                    link.close();
                    return;
                }
                self.close_link();
                self.link = Some(ActiveLink {
                    connection_id,
                    link,
                    greeted: false,
                });
                self.connection_error = None;
                self.dispatch(Event::TransportOpened { connection_id }, now);
            }
            Command::LinkFailed { connection_id, err } => {
                if self.state.connection_id() == Some(connection_id) {
                    self.record_error(&err);
                    self.connection_error = Some(err.to_string());
                }
                self.dispatch(Event::TransportFailed { connection_id, err }, now);
            }
            Command::Link {
                connection_id,
                event,
            } => self.on_link_event(connection_id, event, now),

            Command::Timer(event) => self.dispatch(event, now),
            Command::ReportReady { result } => {
                self.generating_report = false;
                match result {
                    Ok(report) => {
                        log::info!("Session report ready");
                        self.last_report = Some(report);
                    }
                    Err(err) => {
                        log::warn!("Session report failed: {}", err);
                        self.record_error(&err);
                    }
                }
                self.dirty = true;
            }
        }
    }

    /// Fresh per-session state
    fn begin_session(&mut self) {
        self.transcript.clear();
        self.detector.reset();
        self.diagnostic = DiagnosticStatus::default();
        self.metrics.reset_counters();
        self.bundle = None;
        self.connection_error = None;
        self.last_elapsed = Duration::ZERO;
    }

    // ========================================================================
    // Reducer plumbing
    // ========================================================================

    /// Reduce an event and run its effects. Events raised by effects are
    /// queued and reduced after the current batch finishes.
    fn dispatch(&mut self, event: Event, now: Instant) {
        self.pending.push_back(event);

        while let Some(event) = self.pending.pop_front() {
            log::debug!("Session event: {:?}", event);

            let old_discriminant = std::mem::discriminant(&self.state);
            let (next, effects) = reduce(&self.state, event, now);
            let new_discriminant = std::mem::discriminant(&next);

            if old_discriminant != new_discriminant {
                log::info!("State transition: {} -> {}", self.state.name(), next.name());
            }

            self.state = next;

            for effect in effects {
                self.run_effect(effect);
            }
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::FetchConfig { id } => self.fetch_config(id),
            Effect::OpenTransport { id, connection_id } => self.open_transport(id, connection_id),
            Effect::SendSetup { connection_id } => self.send_setup(connection_id),
            Effect::ScheduleGreeting { connection_id } => self.spawn_timer(
                Duration::from_millis(self.settings.greeting_delay_ms),
                Event::GreetingDue { connection_id },
            ),
            Effect::SendStartTrigger { connection_id } => self.send_start_trigger(connection_id),
            Effect::SendDiagnosticComplete => {
                log::info!("Sending {}", DIAGNOSTIC_COMPLETE_TRIGGER);
                self.send(ClientMessage::text_turn(DIAGNOSTIC_COMPLETE_TRIGGER));
            }
            Effect::CloseTransport => self.close_link(),
            Effect::AcquireAudio { id } => self.acquire_audio(id),
            Effect::ReleaseAudio => self.release_audio(),
            Effect::FlushPlayback => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.flush();
                }
            }
            Effect::PersistTranscript => self.persist_transcript(),
            Effect::PersistPendingReport { id, active } => self.persist_pending_report(id, active),
            Effect::FinalizeSession { id, active } => self.finalize_session(id, active),
            Effect::StartSessionTick { id } => self.start_tick(id),
            Effect::ScheduleReconnect { id, delay } => {
                self.metrics.reconnects += 1;
                self.spawn_timer(delay, Event::ReconnectDue { id });
            }
            Effect::CancelTimers => {
                self.timers.cancel();
                self.timers = CancellationToken::new();
            }
            Effect::ResolveStart(result) => {
                if let Err(err) = &result {
                    if *err != CoachError::Cancelled {
                        self.record_error(err);
                    }
                }
                if let Some(reply) = self.pending_start.take() {
                    let _ = reply.send(result);
                }
            }
            Effect::EmitUi => self.dirty = true,
        }
    }

    // ========================================================================
    // Collaborators and transport
    // ========================================================================

    fn fetch_config(&self, id: Uuid) {
        let preferences = self.store.preferences();
        let request = SessionConfigRequest {
            last_report: self.store.last_report(),
            metrics: self.store.current_status(),
            user_profile: self.store.user_profile(),
            temperature: preferences.temperature,
            voice_name: preferences.voice_name,
            custom_prompt: preferences.custom_prompt,
        };
        let provider = self.deps.config.clone();
        let tx = self.commands.clone();

        tokio::spawn(async move {
            let result = provider.fetch(&request).await;
            let _ = tx.send(Command::ConfigFetched { id, result });
        });
    }

    fn open_transport(&mut self, id: Uuid, connection_id: Uuid) {
        self.close_link();

        let Some(bundle) = self.bundle.as_ref() else {
            log::error!("No session config for {}", id);
            self.pending.push_back(Event::TransportFailed {
                connection_id,
                err: CoachError::ConnectionFailed("Session config missing".to_string()),
            });
            return;
        };

        let connector = self.deps.connector.clone();
        let endpoint = self.settings.live_url.clone();
        let api_key = bundle.api_key.clone();
        let tx = self.commands.clone();

        tokio::spawn(async move {
            // Events are held until the link itself has been delivered
            let (event_tx, mut event_rx) = mpsc::unbounded_channel::<LinkEvent>();
            let sink: LinkEventSink = Arc::new(move |event| {
                let _ = event_tx.send(event);
            });

            match connector.connect(&endpoint, &api_key, sink).await {
                Ok(link) => {
                    if tx
                        .send(Command::LinkOpened {
                            connection_id,
                            link,
                        })
                        .is_err()
                    {
                        return;
                    }
                    while let Some(event) = event_rx.recv().await {
                        if tx
                            .send(Command::Link {
                                connection_id,
                                event,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                }
                Err(err) => {
                    let _ = tx.send(Command::LinkFailed { connection_id, err });
                }
            }
        });
    }

    fn current_link(&mut self, connection_id: Uuid) -> Option<&mut ActiveLink> {
        self.link
            .as_mut()
            .filter(|active| active.connection_id == connection_id)
    }

    fn send_setup(&mut self, connection_id: Uuid) {
        let Some(bundle) = self.bundle.clone() else {
            return;
        };
        let Some(active) = self.current_link(connection_id) else {
            return;
        };
        let setup = ClientMessage::setup(
            &bundle.model,
            &bundle.voice_name,
            bundle.temperature,
            &bundle.system_instruction,
        );
        match active.link.send(&setup) {
            Ok(()) => log::info!("Setup sent ({}, voice {})", bundle.model, bundle.voice_name),
            Err(e) => log::warn!("Failed to send setup: {}", e),
        }
    }

    fn send_start_trigger(&mut self, connection_id: Uuid) {
        let Some(active) = self.current_link(connection_id) else {
            return;
        };
        if active.greeted {
            return;
        }
        match active
            .link
            .send(&ClientMessage::text_turn(START_SESSION_TRIGGER))
        {
            Ok(()) => {
                active.greeted = true;
                log::info!("Start turn sent");
            }
            Err(e) => log::warn!("Failed to send start turn: {}", e),
        }
    }

    /// Send on the current link, if any
    fn send(&mut self, message: ClientMessage) {
        match self.link.as_mut() {
            Some(active) => {
                if let Err(e) = active.link.send(&message) {
                    log::warn!("Send failed: {}", e);
                }
            }
            None => log::warn!("No open link, dropping outbound message"),
        }
    }

    fn close_link(&mut self) {
        if let Some(mut active) = self.link.take() {
            log::info!("Closing link {}", active.connection_id);
            active.link.close();
        }
    }

    fn on_link_event(&mut self, connection_id: Uuid, event: LinkEvent, now: Instant) {
        if self.link.as_ref().map(|l| l.connection_id) != Some(connection_id) {
            log::debug!("Ignoring event from superseded link {}", connection_id);
            return;
        }

        match event {
            LinkEvent::Message(message) => {
                for item in message.into_inbound() {
                    self.on_inbound(item, now);
                }
            }
            LinkEvent::Malformed(detail) => {
                self.metrics.malformed_messages += 1;
                self.record_error(&CoachError::MalformedServerMessage(detail));
            }
            LinkEvent::Closed { reason, clean } => {
                log::warn!(
                    "Link {} closed ({}): {}",
                    connection_id,
                    if clean { "close frame" } else { "error" },
                    reason
                );
                if let Some(mut active) = self.link.take() {
                    active.link.close();
                }
                self.connection_error = Some(reason.clone());
                self.dispatch(
                    Event::TransportClosed {
                        connection_id,
                        reason,
                    },
                    now,
                );
            }
        }
    }

    fn on_inbound(&mut self, item: InboundMessage, now: Instant) {
        match item {
            InboundMessage::SetupComplete => log::info!("Setup complete"),
            InboundMessage::ServerAudio { data, sample_rate } => {
                let Some(scheduler) = self.scheduler.as_mut() else {
                    log::debug!("No output, dropping audio chunk");
                    return;
                };
                self.metrics.audio_chunks_received += 1;
                match scheduler.enqueue_base64(&data, sample_rate) {
                    Ok(Some(source)) => self.metrics.seconds_scheduled += source.duration,
                    Ok(None) => {}
                    Err(err) => {
                        self.metrics.malformed_messages += 1;
                        self.record_error(&err);
                    }
                }
            }
            InboundMessage::ServerText(text) => match classify_text(&text) {
                TextPayload::Transcript(text) => {
                    let due = self.transcript.push(Speaker::Assistant, &text);
                    self.after_transcript_push(due);
                }
                TextPayload::Diagnostic(payload) => self.on_diagnostic(payload, now),
            },
            InboundMessage::UserText(text) => {
                let due = self.transcript.push_user_text(&text);
                self.after_transcript_push(due);
            }
            InboundMessage::TurnComplete => log::debug!("Turn complete"),
            InboundMessage::Interrupted => {
                self.metrics.server_interruptions += 1;
                if let Some(scheduler) = self.scheduler.as_mut() {
                    let stopped = scheduler.flush();
                    log::info!("Server interruption, {} sources stopped", stopped);
                }
            }
        }
    }

    fn on_diagnostic(&mut self, payload: DiagnosticPayload, now: Instant) {
        let Some(id) = self.state.session_id() else {
            return;
        };
        let active = self
            .state
            .live()
            .map(|live| live.clock.active(now))
            .unwrap_or_default();

        let report =
            SessionReport::from_diagnostic(&self.report_session_id(id), &payload, minutes(active));
        log::info!(
            "Diagnostic complete: overall {:.0}",
            report.overall_genam_proficiency
        );

        self.diagnostic.complete = true;
        self.diagnostic.scores = Some(report.scores);

        if report.is_persistable() {
            match self.store.save_report(&report) {
                Ok(()) => {
                    self.last_report = serde_json::to_value(&report).ok();
                    self.diagnostic.report = Some(report);
                }
                Err(e) => {
                    log::error!("Failed to save diagnostic report: {}", e);
                    self.record_error(&e);
                }
            }
        } else {
            log::warn!("Diagnostic report has no overall score, not saving");
        }

        self.dirty = true;
        self.dispatch(Event::DiagnosticReceived { id }, now);
    }

    // ========================================================================
    // Audio
    // ========================================================================

    /// Opens the output, then the microphone, on the blocking pool. Building a
    /// cpal stream can sit behind an OS permission prompt.
    fn acquire_audio(&self, id: Uuid) {
        let output = self.deps.output.clone();
        let input = self.deps.input.clone();
        let block_size = self.settings.capture_block_size;
        let input_tap = self.input_tap.clone();
        let output_tap = self.output_tap.clone();
        let tx = self.commands.clone();

        tokio::task::spawn_blocking(move || {
            let ended_tx = tx.clone();
            let frame_tx = tx.clone();
            let result = output
                .open(
                    Box::new(move |source| {
                        let _ = ended_tx.send(Command::PlaybackEnded(source));
                    }),
                    output_tap,
                )
                .and_then(|sink| {
                    let capture = input.acquire(
                        block_size,
                        Box::new(move |frame| {
                            let _ = frame_tx.send(Command::Frame(frame));
                        }),
                        input_tap,
                    )?;
                    Ok(AcquiredAudio { sink, capture })
                });
            let _ = tx.send(Command::AudioAcquired { id, result });
        });
    }

    fn awaiting_audio(&self, id: Uuid) -> bool {
        matches!(
            &self.state,
            State::Starting {
                session_id,
                step: StartStep::AcquiringAudio { .. },
                ..
            } if *session_id == id
        )
    }

    fn install_audio(&mut self, audio: AcquiredAudio) {
        log::info!("Microphone acquired at {} Hz", audio.capture.sample_rate());
        self.scheduler = Some(PlaybackScheduler::new(audio.sink));
        self.capture = Some(audio.capture);

        let cancel = CancellationToken::new();
        tokio::spawn(run_level_monitor(
            self.input_tap.clone(),
            self.output_tap.clone(),
            self.level_tx.clone(),
            cancel.clone(),
        ));
        self.level_task = Some(cancel);
    }

    fn release_audio(&mut self) {
        if let Some(cancel) = self.level_task.take() {
            cancel.cancel();
        }
        self.input_tap.detach();
        self.output_tap.detach();
        let _ = self.level_tx.send(0.0);

        let capture = self.capture.take();
        let scheduler = self.scheduler.take().map(|mut scheduler| {
            scheduler.reset();
            scheduler
        });
        if capture.is_none() && scheduler.is_none() {
            return;
        }
        self.spawn_release(move || {
            if let Some(mut capture) = capture {
                capture.release();
                log::info!("Microphone released");
            }
            drop(scheduler);
        });
    }

    /// Closing a device joins its audio thread, so it happens off the loop
    fn spawn_release(&mut self, release: impl FnOnce() + Send + 'static) {
        self.releases.retain(|handle| !handle.is_finished());
        self.releases.push(tokio::task::spawn_blocking(release));
    }

    /// Answer once every device released so far is closed
    fn reply_after_release(&mut self, reply: oneshot::Sender<()>) {
        let releases = std::mem::take(&mut self.releases);
        if releases.is_empty() {
            let _ = reply.send(());
            return;
        }
        tokio::spawn(async move {
            for release in releases {
                let _ = release.await;
            }
            let _ = reply.send(());
        });
    }

    fn on_frame(&mut self, frame: FloatFrame, now: Instant) {
        self.metrics.frames_captured += 1;
        if self.metrics.frames_captured % FRAME_LOG_INTERVAL == 0 {
            log::debug!(
                "Captured {} frames ({} sent, {} dropped)",
                self.metrics.frames_captured,
                self.metrics.frames_sent,
                self.metrics.frames_dropped
            );
        }

        let sending = matches!(&self.state, State::Active(live) if !live.muted);
        if !sending {
            self.metrics.frames_dropped += 1;
            return;
        }

        let frame = to_transport_rate(&frame);
        if self.detector.process(&frame.samples, now) == SpeechTransition::Started {
            self.barge_in();
        }

        match self.link.as_mut() {
            Some(active) if active.greeted => {
                let chunk = encode_transport_frame(&frame);
                match active.link.send(&ClientMessage::audio(&chunk)) {
                    Ok(()) => self.metrics.frames_sent += 1,
                    Err(e) => {
                        self.metrics.frames_dropped += 1;
                        log::debug!("Audio frame not sent: {}", e);
                    }
                }
            }
            _ => self.metrics.frames_dropped += 1,
        }
    }

    /// Local speech onset: cut the assistant off and mark the attempt
    fn barge_in(&mut self) {
        let stopped = self
            .scheduler
            .as_mut()
            .map(|scheduler| scheduler.flush())
            .unwrap_or(0);
        self.metrics.barge_ins += 1;
        log::info!("Barge-in, {} sources stopped", stopped);

        let due = self.transcript.push_marker();
        self.after_transcript_push(due);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn after_transcript_push(&mut self, save_due: bool) {
        if save_due {
            self.persist_transcript();
        }
        self.dirty = true;
    }

    fn persist_transcript(&mut self) {
        if self.transcript.is_empty() {
            return;
        }
        match self.store.save_transcript(self.transcript.entries()) {
            Ok(()) => {
                self.metrics.transcript_saves += 1;
                log::debug!("Transcript saved ({} entries)", self.transcript.len());
            }
            Err(e) => {
                log::error!("Failed to save transcript: {}", e);
                self.record_error(&e);
            }
        }
    }

    fn persist_pending_report(&mut self, id: Uuid, active: Duration) {
        if self.diagnostic.report.is_some() {
            return;
        }
        let Some(scores) = self.diagnostic.scores else {
            return;
        };
        let report =
            SessionReport::unexpected_end(&self.report_session_id(id), scores, minutes(active));
        if !report.is_persistable() {
            return;
        }
        match self.store.save_report(&report) {
            Ok(()) => {
                log::info!("Saved unsaved scores for {}", report.session_id);
                self.last_report = serde_json::to_value(&report).ok();
                self.diagnostic.report = Some(report);
            }
            Err(e) => {
                log::error!("Failed to save pending report: {}", e);
                self.record_error(&e);
            }
        }
    }

    fn finalize_session(&mut self, id: Uuid, active: Duration) {
        let session_id = self.report_session_id(id);
        self.last_elapsed = active;

        let entry = SessionHistoryEntry {
            session_id: session_id.clone(),
            date: chrono::Utc::now(),
            duration_minutes: minutes(active),
            attempts: self.detector.attempts(),
            transcript_entries: self.transcript.len(),
            report: self.diagnostic.report.clone(),
        };
        if let Err(e) = self.store.push_history(entry) {
            log::error!("Failed to append session history: {}", e);
            self.record_error(&e);
        }

        self.hand_off_report(&session_id);

        // History and analysis hold their own copies by now
        self.transcript.clear();
        self.detector.reset();

        self.metrics.log_summary(&session_id);
        self.metrics.reset_counters();
    }

    /// Longer transcripts go to the analyzer in the background
    fn hand_off_report(&mut self, session_id: &str) {
        if self.transcript.len() <= self.settings.report_min_entries {
            log::info!(
                "Transcript too short for analysis ({} entries)",
                self.transcript.len()
            );
            return;
        }
        let Some(analyzer) = self.deps.analyzer.clone() else {
            return;
        };

        self.generating_report = true;
        let entries = self.transcript.entries().to_vec();
        let session_id = session_id.to_string();
        let store = self.store.clone();
        let tx = self.commands.clone();

        tokio::spawn(async move {
            let result = analyzer.analyze(&session_id, &entries).await;
            let result = match result {
                Ok(report) => store.save_analysis_report(&report).map(|()| report),
                Err(e) => Err(e),
            };
            let _ = tx.send(Command::ReportReady { result });
        });
    }

    /// Backend session id when the config bundle carried one
    fn report_session_id(&self, id: Uuid) -> String {
        self.bundle
            .as_ref()
            .map(|b| b.session_id.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| id.to_string())
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn spawn_timer(&self, delay: Duration, event: Event) {
        let cancel = self.timers.clone();
        let tx = self.commands.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Command::Timer(event));
                }
            }
        });
    }

    fn start_tick(&self, id: Uuid) {
        let cancel = self.timers.clone();
        let tx = self.commands.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + TICK, TICK);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(Command::Timer(Event::Tick { id })).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    fn record_error(&mut self, err: &CoachError) {
        let session_id = self.state.session_id().map(|id| id.to_string());
        self.metrics
            .record_error(err.kind(), err.to_string(), session_id);
    }

    fn snapshot(&self, now: Instant) -> CoachSnapshot {
        let live = self.state.live();
        let connection = match live {
            Some(live) => ConnectionStatus {
                connected: live.connection.is_open(),
                reconnecting: live.connection.reconnecting,
                error: self.connection_error.clone(),
                last_connected: live.connection.last_connected,
            },
            None => ConnectionStatus {
                connected: self.link.is_some(),
                reconnecting: false,
                error: self.connection_error.clone(),
                last_connected: None,
            },
        };

        CoachSnapshot {
            status: (&self.state).into(),
            connection,
            muted: live.is_some_and(|l| l.muted),
            paused: matches!(self.state, State::Paused(_)),
            recording: self.capture.is_some(),
            error: self.state.error().map(str::to_string),
            transcript: self.transcript.entries().to_vec(),
            diagnostic_remaining: live.map_or(0, |l| l.countdown.remaining()),
            diagnostic_complete: self.diagnostic.complete,
            scores: self.diagnostic.scores,
            last_report: self.last_report.clone(),
            generating_report: self.generating_report,
            session_id: self.state.session_id().map(|id| self.report_session_id(id)),
            elapsed_secs: live
                .map(|l| l.clock.active(now))
                .unwrap_or(self.last_elapsed)
                .as_secs(),
            attempts: self.detector.attempts(),
            metrics: self.metrics.clone(),
        }
    }

    fn publish(&mut self, now: Instant) {
        self.dirty = false;
        let snapshot = self.snapshot(now);
        log::debug!(
            "Publishing snapshot: {:?} ({} transcript entries)",
            snapshot.status,
            snapshot.transcript.len()
        );
        self.snapshot_tx.send_replace(snapshot);
    }
}

fn detector_for(settings: &CoachSettings) -> SpeechActivityDetector {
    SpeechActivityDetector::with_threshold(
        settings.speech_threshold,
        Duration::from_millis(settings.speech_release_ms),
    )
}
