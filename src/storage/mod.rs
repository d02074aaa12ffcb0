//! Persistence between sessions.
//!
//! This module provides:
//! - A string key/value seam with file-backed and in-memory stores
//! - Typed accessors for the coaching keys (preferences, reports, history)
//! - The persisted record types

mod coach_store;
mod store;
mod types;

pub use coach_store::{keys, CoachStore, MAX_SESSION_HISTORY};
pub use store::{default_store_path, JsonFileStore, KeyValueStore, MemoryStore};
pub use types::{
    Preferences, ProficiencyPoint, SessionHistoryEntry, SessionReport, Speaker, TranscriptEntry,
    UserProfile, UNEXPECTED_END_EVALUATION,
};
