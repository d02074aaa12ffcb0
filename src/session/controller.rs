//! Public handle to a coaching session
//!
//! `CoachController` is a thin sender over the session loop's command
//! queue plus two watch channels: the session snapshot and the audio level.
//! Dropping the controller tears the session down.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use super::runtime::{Command, SessionRuntime};
use super::snapshot::CoachSnapshot;
use crate::audio::{AudioInput, AudioOutput};
use crate::collaborators::{ReportAnalyzer, SessionConfigProvider};
use crate::error::{CoachError, Result};
use crate::settings::CoachSettings;
use crate::storage::KeyValueStore;
use crate::streaming::LiveConnector;

/// Every outside collaborator a session needs
#[derive(Clone)]
pub struct CoachDeps {
    pub config: Arc<dyn SessionConfigProvider>,
    pub connector: Arc<dyn LiveConnector>,
    pub store: Arc<dyn KeyValueStore>,
    pub input: Arc<dyn AudioInput>,
    pub output: Arc<dyn AudioOutput>,
    /// Post-session analysis; reports are skipped without one
    pub analyzer: Option<Arc<dyn ReportAnalyzer>>,
}

pub struct CoachController {
    commands: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<CoachSnapshot>,
    level_rx: watch::Receiver<f32>,
}

impl CoachController {
    /// Spawn the session loop. Must be called from inside a tokio runtime.
    pub fn spawn(deps: CoachDeps, settings: CoachSettings) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(CoachSnapshot::default());
        let (level_tx, level_rx) = watch::channel(0.0f32);

        let runtime = SessionRuntime::new(
            deps,
            settings.validated(),
            commands.clone(),
            snapshot_tx,
            level_tx,
        );
        tokio::spawn(runtime.run(rx));

        Self {
            commands,
            snapshot_rx,
            level_rx,
        }
    }

    /// Resolves once the session is live, or with the error that stopped it
    pub async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply })?;
        rx.await.map_err(|_| CoachError::Cancelled)?
    }

    /// Idempotent
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Stop { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn toggle_mute(&self) {
        let _ = self.send(Command::ToggleMute);
    }

    pub fn toggle_pause(&self) {
        let _ = self.send(Command::TogglePause);
    }

    /// Snapshot taken after every command queued so far has been handled
    pub async fn state(&self) -> CoachSnapshot {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Snapshot { reply }).is_err() {
            return self.snapshot_rx.borrow().clone();
        }
        match rx.await {
            Ok(snapshot) => snapshot,
            Err(_) => self.snapshot_rx.borrow().clone(),
        }
    }

    /// Forget past sessions: history, proficiency trend and current status
    pub async fn clear_history(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ClearHistory { reply })?;
        rx.await.map_err(|_| CoachError::Cancelled)?
    }

    pub fn subscribe(&self) -> watch::Receiver<CoachSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Smoothed 0-100 level of whichever side is louder
    pub fn audio_level(&self) -> watch::Receiver<f32> {
        self.level_rx.clone()
    }

    /// Stop the session and end the loop
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .send(Command::Shutdown { reply: Some(reply) })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| {
            log::warn!("Session loop is gone");
            CoachError::Cancelled
        })
    }
}

impl Drop for CoachController {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown { reply: None });
    }
}
