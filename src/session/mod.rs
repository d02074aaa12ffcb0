//! Session lifecycle
//!
//! This module provides:
//! - The public `CoachController` handle and its collaborator bundle
//! - The session loop that executes reducer effects
//! - The observable snapshot, session clock and transcript log

pub mod clock;
mod controller;
mod runtime;
pub mod snapshot;
pub mod transcript;

pub use clock::{CountdownTick, DiagnosticCountdown, SessionClock};
pub use controller::{CoachController, CoachDeps};
pub use snapshot::{CoachSnapshot, ConnectionStatus, SessionStatus};
pub use transcript::{TranscriptLog, SPEECH_MARKER};
