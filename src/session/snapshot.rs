//! Observable session state
//!
//! Published on a watch channel after every batch of transitions.
//! Uses camelCase so the snapshot can be handed to a UI as-is.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::metrics::SessionMetrics;
use crate::state_machine::State;
use crate::storage::TranscriptEntry;
use crate::streaming::Scores;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    Starting,
    Active,
    Paused,
    Ended,
}

impl From<&State> for SessionStatus {
    fn from(state: &State) -> Self {
        match state {
            State::NotStarted { .. } => SessionStatus::NotStarted,
            State::Starting { .. } => SessionStatus::Starting,
            State::Active(_) => SessionStatus::Active,
            State::Paused(_) => SessionStatus::Paused,
            State::Ended { .. } => SessionStatus::Ended,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnecting: bool,
    pub error: Option<String>,
    pub last_connected: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CoachSnapshot {
    pub status: SessionStatus,
    pub connection: ConnectionStatus,
    pub muted: bool,
    pub paused: bool,
    /// Microphone acquired
    pub recording: bool,
    pub error: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
    pub diagnostic_remaining: u32,
    pub diagnostic_complete: bool,
    pub scores: Option<Scores>,
    pub last_report: Option<Value>,
    pub generating_report: bool,
    pub session_id: Option<String>,
    pub elapsed_secs: u64,
    pub attempts: u64,
    pub metrics: SessionMetrics,
}

impl CoachSnapshot {
    pub fn is_live(&self) -> bool {
        matches!(self.status, SessionStatus::Active | SessionStatus::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let snapshot = CoachSnapshot {
            status: SessionStatus::Paused,
            diagnostic_remaining: 90,
            ..Default::default()
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["status"], "paused");
        assert_eq!(value["diagnosticRemaining"], 90);
        assert_eq!(value["generatingReport"], false);
        assert!(value["connection"]["lastConnected"].is_null());
        assert!(snapshot.is_live());
    }

    #[test]
    fn status_follows_state() {
        assert_eq!(
            SessionStatus::from(&State::default()),
            SessionStatus::NotStarted
        );
        assert_eq!(
            SessionStatus::from(&State::Ended {
                session_id: uuid::Uuid::new_v4(),
                error: None
            }),
            SessionStatus::Ended
        );
    }
}
