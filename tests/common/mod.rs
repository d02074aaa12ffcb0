//! Fakes for every collaborator seam, shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};

use coach_lib::audio::{
    AudioInput, AudioOutput, CaptureHandle, DecodedBuffer, FloatFrame, FrameCallback, LevelTap,
    PlaybackSink, SourceEndedCallback, SourceId,
};
use coach_lib::collaborators::{
    ReportAnalyzer, SessionBundle, SessionConfigProvider, SessionConfigRequest,
};
use coach_lib::storage::{KeyValueStore, MemoryStore, TranscriptEntry};
use coach_lib::streaming::{ClientMessage, LinkEvent, LinkEventSink, LiveConnector, LiveLink};
use coach_lib::{CoachController, CoachDeps, CoachError, CoachSettings, Result};

// ============================================================================
// Config
// ============================================================================

#[derive(Default)]
pub struct FakeConfig {
    pub requests: Mutex<Vec<SessionConfigRequest>>,
    pub fail: Mutex<Option<CoachError>>,
}

#[async_trait]
impl SessionConfigProvider for FakeConfig {
    async fn fetch(&self, request: &SessionConfigRequest) -> Result<SessionBundle> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(err) = self.fail.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(SessionBundle {
            session_id: "session-1".to_string(),
            system_instruction: "Coach the user".to_string(),
            model: "models/test-model".to_string(),
            api_key: "test-key".to_string(),
            temperature: request.temperature,
            voice_name: request.voice_name.clone(),
        })
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct LinkLog {
    pub sent: Vec<ClientMessage>,
    pub closed: bool,
}

pub struct FakeLink {
    log: Arc<Mutex<LinkLog>>,
}

impl LiveLink for FakeLink {
    fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.closed {
            return Err(CoachError::ConnectionFailed("link closed".to_string()));
        }
        log.sent.push(message.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

/// Opens links that record what is sent on them
#[derive(Default)]
pub struct FakeConnector {
    pub fail_after_first: Mutex<bool>,
    pub connects: AtomicUsize,
    pub links: Mutex<Vec<(Arc<Mutex<LinkLog>>, LinkEventSink)>>,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Fail every open after the first one
    pub fn fail_reconnects(&self) {
        *self.fail_after_first.lock().unwrap() = true;
    }

    pub fn link(&self, index: usize) -> Arc<Mutex<LinkLog>> {
        self.links.lock().unwrap()[index].0.clone()
    }

    pub fn sent(&self, index: usize) -> Vec<ClientMessage> {
        self.link(index).lock().unwrap().sent.clone()
    }

    /// Deliver an event on the most recent link
    pub fn emit(&self, event: LinkEvent) {
        let sink = self
            .links
            .lock()
            .unwrap()
            .last()
            .map(|(_, sink)| sink.clone())
            .expect("no link opened");
        sink(event);
    }

    pub fn emit_json(&self, value: Value) {
        let message = serde_json::from_value(value).expect("valid server message");
        self.emit(LinkEvent::Message(message));
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(
        &self,
        _endpoint: &str,
        api_key: &str,
        events: LinkEventSink,
    ) -> Result<Box<dyn LiveLink>> {
        assert_eq!(api_key, "test-key");
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst);

        if attempt > 0 && *self.fail_after_first.lock().unwrap() {
            return Err(CoachError::ConnectionFailed("refused".to_string()));
        }

        let log = Arc::new(Mutex::new(LinkLog::default()));
        self.links.lock().unwrap().push((log.clone(), events));
        Ok(Box::new(FakeLink { log }))
    }
}

// ============================================================================
// Audio
// ============================================================================

pub const MIC_RATE: u32 = 16_000;

/// Microphone whose frames are pushed by the test
#[derive(Default)]
pub struct FakeMic {
    pub callback: Arc<Mutex<Option<FrameCallback>>>,
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    pub fail: Mutex<Option<CoachError>>,
    /// When set, `acquire` blocks until the sender fires, like a slow
    /// permission prompt
    pub gate: Mutex<Option<std_mpsc::Receiver<()>>>,
    pub waiting: AtomicBool,
}

impl FakeMic {
    /// Hold the next `acquire` until the returned sender fires
    pub fn hold_acquire(&self) -> std_mpsc::Sender<()> {
        let (tx, rx) = std_mpsc::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn push(&self, samples: Vec<f32>) {
        let mut callback = self.callback.lock().unwrap();
        let callback = callback.as_mut().expect("microphone not acquired");
        callback(FloatFrame::new(samples, MIC_RATE));
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FakeCapture {
    callback: Arc<Mutex<Option<FrameCallback>>>,
    released: Arc<AtomicUsize>,
    done: bool,
}

impl CaptureHandle for FakeCapture {
    fn sample_rate(&self) -> u32 {
        MIC_RATE
    }

    fn release(&mut self) {
        if !self.done {
            self.done = true;
            self.callback.lock().unwrap().take();
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl AudioInput for FakeMic {
    fn acquire(
        &self,
        _block_size: usize,
        on_frame: FrameCallback,
        _tap: LevelTap,
    ) -> Result<Box<dyn CaptureHandle>> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.waiting.store(true, Ordering::SeqCst);
            let _ = gate.recv();
            self.waiting.store(false, Ordering::SeqCst);
        }
        if let Some(err) = self.fail.lock().unwrap().clone() {
            return Err(err);
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock().unwrap() = Some(on_frame);
        Ok(Box::new(FakeCapture {
            callback: self.callback.clone(),
            released: self.released.clone(),
            done: false,
        }))
    }
}

#[derive(Debug, Default)]
pub struct SpeakerLog {
    pub now: f64,
    pub started: Vec<(SourceId, f64, f64)>,
    pub stopped: Vec<SourceId>,
    pub playing: Vec<SourceId>,
}

/// Output with a hand-driven clock
#[derive(Clone, Default)]
pub struct FakeSpeaker {
    pub log: Arc<Mutex<SpeakerLog>>,
}

impl FakeSpeaker {
    pub fn set_now(&self, now: f64) {
        self.log.lock().unwrap().now = now;
    }

    pub fn playing(&self) -> usize {
        self.log.lock().unwrap().playing.len()
    }
}

struct FakeSpeakerSink {
    log: Arc<Mutex<SpeakerLog>>,
}

impl PlaybackSink for FakeSpeakerSink {
    fn now(&self) -> f64 {
        self.log.lock().unwrap().now
    }

    fn start(&mut self, id: SourceId, buffer: DecodedBuffer, start_at: f64) {
        let mut log = self.log.lock().unwrap();
        log.started.push((id, start_at, buffer.duration()));
        log.playing.push(id);
    }

    fn stop(&mut self, id: SourceId) {
        let mut log = self.log.lock().unwrap();
        log.stopped.push(id);
        log.playing.retain(|p| *p != id);
    }
}

impl AudioOutput for FakeSpeaker {
    fn open(&self, _on_ended: SourceEndedCallback, _tap: LevelTap) -> Result<Box<dyn PlaybackSink>> {
        Ok(Box::new(FakeSpeakerSink {
            log: self.log.clone(),
        }))
    }
}

// ============================================================================
// Store and analyzer
// ============================================================================

/// Memory store that counts writes
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub writes: AtomicUsize,
}

impl CountingStore {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for CountingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(key)
    }
}

#[derive(Default)]
pub struct FakeAnalyzer {
    pub calls: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl ReportAnalyzer for FakeAnalyzer {
    async fn analyze(&self, session_id: &str, transcript: &[TranscriptEntry]) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((session_id.to_string(), transcript.len()));
        Ok(json!({ "overall_genam_proficiency": 64, "summary": "analysed" }))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub controller: CoachController,
    pub config: Arc<FakeConfig>,
    pub connector: Arc<FakeConnector>,
    pub mic: Arc<FakeMic>,
    pub speaker: FakeSpeaker,
    pub store: Arc<CountingStore>,
    pub analyzer: Arc<FakeAnalyzer>,
}

pub fn settings() -> CoachSettings {
    CoachSettings {
        diagnostic_secs: 0,
        ..CoachSettings::default()
    }
}

pub fn harness(settings: CoachSettings) -> Harness {
    harness_with_store(settings, Arc::new(CountingStore::default()))
}

pub fn harness_with_store(settings: CoachSettings, store: Arc<CountingStore>) -> Harness {
    let config = Arc::new(FakeConfig::default());
    let connector = Arc::new(FakeConnector::default());
    let mic = Arc::new(FakeMic::default());
    let speaker = FakeSpeaker::default();
    let analyzer = Arc::new(FakeAnalyzer::default());

    let deps = CoachDeps {
        config: config.clone(),
        connector: connector.clone(),
        store: store.clone(),
        input: mic.clone(),
        output: Arc::new(speaker.clone()),
        analyzer: Some(analyzer.clone()),
    };

    Harness {
        controller: CoachController::spawn(deps, settings),
        config,
        connector,
        mic,
        speaker,
        store,
        analyzer,
    }
}

/// Let spawned tasks and forwarded link events reach the session loop
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// Settle until `done` holds, giving up after a bounded number of rounds
pub async fn settle_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        settle().await;
    }
    panic!("condition not reached");
}

/// Start and wait past the greeting delay
pub async fn start_and_greet(h: &Harness) {
    h.controller.start().await.expect("session starts");
    tokio::time::sleep(Duration::from_millis(600)).await;
}

pub fn silence(samples: usize) -> Vec<f32> {
    vec![0.0; samples]
}

pub fn loud(samples: usize) -> Vec<f32> {
    (0..samples)
        .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
        .collect()
}

/// `seconds` of 24 kHz model audio as a server envelope
pub fn model_audio(seconds: f64) -> Value {
    let samples = (24_000.0 * seconds) as usize;
    let bytes: Vec<u8> = std::iter::repeat(1000i16.to_le_bytes())
        .take(samples)
        .flatten()
        .collect();
    json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": "audio/pcm;rate=24000",
                        "data": STANDARD.encode(bytes)
                    }
                }]
            }
        }
    })
}

pub fn model_text(text: &str) -> Value {
    json!({ "serverContent": { "modelTurn": { "parts": [{ "text": text }] } } })
}
