//! Per-session counters for the coaching client
//!
//! Tracks audio flow in both directions, barge-ins, reconnects and a bounded
//! error history. Embedded in every snapshot and logged as a summary when a
//! session ends.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum number of errors to retain in history
const MAX_ERROR_HISTORY: usize = 50;

/// Record of an error that occurred during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unix timestamp when error occurred (seconds)
    pub timestamp: u64,
    /// Category of error (e.g., "audio", "transport", "storage")
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub frames_captured: u64,
    pub frames_sent: u64,
    /// Captured while muted, paused, or before the start trigger
    pub frames_dropped: u64,
    pub audio_chunks_received: u64,
    pub seconds_scheduled: f64,
    pub barge_ins: u64,
    pub server_interruptions: u64,
    pub malformed_messages: u64,
    pub reconnects: u64,
    pub transcript_saves: u64,
    /// Newest first
    errors: VecDeque<ErrorRecord>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&mut self, error_type: &str, message: String, session_id: Option<String>) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let error = ErrorRecord {
            timestamp: now,
            error_type: error_type.to_string(),
            message,
            session_id,
        };

        log::debug!("Metrics: recording error - {:?}", error);

        self.errors.push_front(error);
        while self.errors.len() > MAX_ERROR_HISTORY {
            self.errors.pop_back();
        }
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.iter().cloned().collect()
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.errors.front()
    }

    /// Zero the counters for the next session. Error history is kept.
    pub fn reset_counters(&mut self) {
        let errors = std::mem::take(&mut self.errors);
        *self = Self {
            errors,
            ..Self::default()
        };
    }

    pub fn log_summary(&self, session_id: &str) {
        log::info!(
            "Metrics: session {} - captured {} frames (sent {}, dropped {}), received {} chunks ({:.1}s), {} barge-ins, {} interruptions, {} reconnects, {} malformed",
            session_id,
            self.frames_captured,
            self.frames_sent,
            self.frames_dropped,
            self.audio_chunks_received,
            self.seconds_scheduled,
            self.barge_ins,
            self.server_interruptions,
            self.reconnects,
            self.malformed_messages
        );
    }
}
