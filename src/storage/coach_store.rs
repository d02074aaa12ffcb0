//! Typed access to the coaching keys.
//!
//! Reads never fail: a missing or unreadable value falls back to its
//! default and the problem is logged. Writes return `Result` so callers can
//! count failures, but no session ever aborts on one.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::store::KeyValueStore;
use super::types::{
    Preferences, ProficiencyPoint, SessionHistoryEntry, SessionReport, TranscriptEntry,
    UserProfile,
};
use crate::error::Result;

pub mod keys {
    pub const INITIAL_BENCHMARK: &str = "GENAM_INITIAL_BENCHMARK";
    pub const CURRENT_STATUS: &str = "GENAM_CURRENT_STATUS";
    pub const SESSION_HISTORY: &str = "GENAM_SESSION_HISTORY";
    pub const USER_PROFILE: &str = "GENAM_USER_PROFILE";
    pub const VOICE_PREFERENCE: &str = "GENAM_VOICE_PREFERENCE";
    pub const TEMPERATURE: &str = "GENAM_TEMPERATURE";
    pub const CUSTOM_PROMPT: &str = "GENAM_CUSTOM_PROMPT";
    pub const TRANSCRIPT_LOG: &str = "GENAM_TRANSCRIPT_LOG";
    pub const LAST_SESSION_REPORT: &str = "GENAM_LAST_SESSION_REPORT";
    pub const PROFICIENCY_HISTORY: &str = "GENAM_PROFICIENCY_HISTORY";
}

/// Maximum number of sessions kept in history
pub const MAX_SESSION_HISTORY: usize = 10;

/// Proficiency points kept for the trend
pub const MAX_PROFICIENCY_HISTORY: usize = 50;

#[derive(Clone)]
pub struct CoachStore {
    inner: Arc<dyn KeyValueStore>,
}

impl CoachStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    fn raw(&self, key: &str) -> Option<String> {
        match self.inner.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                log::warn!("Store: failed to read {}: {}", key, e);
                None
            }
        }
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Store: ignoring unreadable {}: {}", key, e);
                None
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.inner.set(key, &json)
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    pub fn preferences(&self) -> Preferences {
        let defaults = Preferences::default();
        let temperature = self
            .raw(keys::TEMPERATURE)
            .and_then(|t| match t.trim().parse::<f32>() {
                Ok(t) if t.is_finite() => Some(t),
                _ => {
                    log::warn!("Store: ignoring temperature {:?}", t);
                    None
                }
            })
            .unwrap_or(defaults.temperature);

        Preferences {
            voice_name: self.raw(keys::VOICE_PREFERENCE).unwrap_or(defaults.voice_name),
            temperature,
            custom_prompt: self.raw(keys::CUSTOM_PROMPT),
        }
    }

    pub fn set_preferences(&self, preferences: &Preferences) -> Result<()> {
        self.inner
            .set(keys::VOICE_PREFERENCE, &preferences.voice_name)?;
        self.inner
            .set(keys::TEMPERATURE, &preferences.temperature.to_string())?;
        match &preferences.custom_prompt {
            Some(prompt) => self.inner.set(keys::CUSTOM_PROMPT, prompt),
            None => self.inner.remove(keys::CUSTOM_PROMPT),
        }
    }

    pub fn user_profile(&self) -> UserProfile {
        self.read_json(keys::USER_PROFILE).unwrap_or_default()
    }

    pub fn set_user_profile(&self, profile: &UserProfile) -> Result<()> {
        self.write_json(keys::USER_PROFILE, profile)
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Most recent report, in whatever shape it was stored
    pub fn last_report(&self) -> Option<Value> {
        self.read_json(keys::LAST_SESSION_REPORT)
    }

    /// Legacy per-session metrics, sent along with the config request
    pub fn current_status(&self) -> Option<Value> {
        self.read_json(keys::CURRENT_STATUS)
    }

    pub fn initial_benchmark(&self) -> Option<Value> {
        self.read_json(keys::INITIAL_BENCHMARK)
    }

    /// Persist a diagnostic report. The first one ever saved also becomes the
    /// benchmark, and every one extends the proficiency trend.
    pub fn save_report(&self, report: &SessionReport) -> Result<()> {
        self.write_json(keys::LAST_SESSION_REPORT, report)?;

        if self.raw(keys::INITIAL_BENCHMARK).is_none() {
            log::info!("Store: recording initial benchmark for {}", report.session_id);
            self.write_json(keys::INITIAL_BENCHMARK, report)?;
        }

        let mut trend = self.proficiency_history();
        trend.push(ProficiencyPoint {
            session_id: report.session_id.clone(),
            timestamp: report.timestamp,
            overall: report.overall_genam_proficiency,
        });
        if trend.len() > MAX_PROFICIENCY_HISTORY {
            let excess = trend.len() - MAX_PROFICIENCY_HISTORY;
            trend.drain(..excess);
        }
        self.write_json(keys::PROFICIENCY_HISTORY, &trend)
    }

    /// Store a report produced by the analysis collaborator verbatim
    pub fn save_analysis_report(&self, report: &Value) -> Result<()> {
        self.write_json(keys::LAST_SESSION_REPORT, report)
    }

    pub fn proficiency_history(&self) -> Vec<ProficiencyPoint> {
        self.read_json(keys::PROFICIENCY_HISTORY).unwrap_or_default()
    }

    // ========================================================================
    // Transcript and history
    // ========================================================================

    pub fn save_transcript(&self, entries: &[TranscriptEntry]) -> Result<()> {
        self.write_json(keys::TRANSCRIPT_LOG, entries)
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.read_json(keys::TRANSCRIPT_LOG).unwrap_or_default()
    }

    /// Oldest first
    pub fn session_history(&self) -> Vec<SessionHistoryEntry> {
        self.read_json(keys::SESSION_HISTORY).unwrap_or_default()
    }

    /// Append, keeping only the newest `MAX_SESSION_HISTORY` entries
    pub fn push_history(&self, entry: SessionHistoryEntry) -> Result<()> {
        let mut history = self.session_history();
        history.push(entry);
        if history.len() > MAX_SESSION_HISTORY {
            let excess = history.len() - MAX_SESSION_HISTORY;
            history.drain(..excess);
        }
        self.write_json(keys::SESSION_HISTORY, &history)
    }

    /// Drop everything that tracks progress across sessions. The benchmark and
    /// last report stay.
    pub fn clear_history(&self) -> Result<()> {
        self.inner.remove(keys::SESSION_HISTORY)?;
        self.inner.remove(keys::CURRENT_STATUS)?;
        self.inner.remove(keys::PROFICIENCY_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::MemoryStore;
    use crate::storage::types::Speaker;
    use crate::streaming::Scores;
    use chrono::Utc;

    fn store() -> (Arc<MemoryStore>, CoachStore) {
        let memory = Arc::new(MemoryStore::new());
        (memory.clone(), CoachStore::new(memory))
    }

    fn report(session_id: &str, overall: f64) -> SessionReport {
        SessionReport::unexpected_end(
            session_id,
            Scores {
                overall,
                ..Scores::default()
            },
            2.0,
        )
    }

    #[test]
    fn preferences_fall_back_to_defaults() {
        let (memory, store) = store();
        assert_eq!(store.preferences(), Preferences::default());

        memory.set(keys::TEMPERATURE, "warm").unwrap();
        memory.set(keys::VOICE_PREFERENCE, "Puck").unwrap();
        let prefs = store.preferences();
        assert_eq!(prefs.temperature, 1.0);
        assert_eq!(prefs.voice_name, "Puck");
    }

    #[test]
    fn preferences_are_stored_as_raw_strings() {
        let (memory, store) = store();
        store
            .set_preferences(&Preferences {
                voice_name: "Kore".to_string(),
                temperature: 0.6,
                custom_prompt: Some("Focus on vowels".to_string()),
            })
            .unwrap();

        assert_eq!(memory.get(keys::VOICE_PREFERENCE).unwrap().as_deref(), Some("Kore"));
        assert_eq!(memory.get(keys::TEMPERATURE).unwrap().as_deref(), Some("0.6"));
        assert_eq!(
            memory.get(keys::CUSTOM_PROMPT).unwrap().as_deref(),
            Some("Focus on vowels")
        );
        assert_eq!(store.preferences().temperature, 0.6);
    }

    #[test]
    fn unreadable_profile_uses_default() {
        let (memory, store) = store();
        memory.set(keys::USER_PROFILE, "{broken").unwrap();
        assert_eq!(store.user_profile(), UserProfile::default());
    }

    #[test]
    fn first_report_becomes_benchmark() {
        let (_, store) = store();
        assert!(store.last_report().is_none());

        store.save_report(&report("s1", 50.0)).unwrap();
        store.save_report(&report("s2", 60.0)).unwrap();

        assert_eq!(store.initial_benchmark().unwrap()["session_id"], "s1");
        assert_eq!(store.last_report().unwrap()["session_id"], "s2");
        let trend: Vec<f64> = store
            .proficiency_history()
            .iter()
            .map(|p| p.overall)
            .collect();
        assert_eq!(trend, vec![50.0, 60.0]);
    }

    #[test]
    fn history_is_capped_newest_last() {
        let (_, store) = store();
        for i in 0..13 {
            store
                .push_history(SessionHistoryEntry {
                    session_id: format!("s{}", i),
                    date: Utc::now(),
                    duration_minutes: 1.0,
                    attempts: i,
                    transcript_entries: 0,
                    report: None,
                })
                .unwrap();
        }

        let history = store.session_history();
        assert_eq!(history.len(), MAX_SESSION_HISTORY);
        assert_eq!(history.first().unwrap().session_id, "s3");
        assert_eq!(history.last().unwrap().session_id, "s12");
    }

    #[test]
    fn proficiency_trend_keeps_newest_points() {
        let (_, store) = store();
        for i in 0..MAX_PROFICIENCY_HISTORY + 5 {
            store
                .save_report(&report(&format!("s{}", i), 10.0 + i as f64))
                .unwrap();
        }

        let trend = store.proficiency_history();
        assert_eq!(trend.len(), MAX_PROFICIENCY_HISTORY);
        assert_eq!(trend.first().unwrap().session_id, "s5");
        assert_eq!(
            trend.last().unwrap().session_id,
            format!("s{}", MAX_PROFICIENCY_HISTORY + 4)
        );
    }

    #[test]
    fn clearing_history_keeps_benchmark_and_last_report() {
        let (memory, store) = store();
        store.save_report(&report("s1", 40.0)).unwrap();
        memory.set(keys::CURRENT_STATUS, r#"{"level":"B1"}"#).unwrap();
        store
            .push_history(SessionHistoryEntry {
                session_id: "s1".to_string(),
                date: Utc::now(),
                duration_minutes: 3.0,
                attempts: 2,
                transcript_entries: 4,
                report: None,
            })
            .unwrap();

        store.clear_history().unwrap();

        assert!(store.session_history().is_empty());
        assert!(store.proficiency_history().is_empty());
        assert!(store.current_status().is_none());
        assert!(store.initial_benchmark().is_some());
        assert!(store.last_report().is_some());
    }

    #[test]
    fn transcript_round_trips() {
        let (_, store) = store();
        let entries = vec![
            TranscriptEntry::now(Speaker::Assistant, "Hello Peter"),
            TranscriptEntry::now(Speaker::User, "[AUDIO_DETECTED]"),
        ];
        store.save_transcript(&entries).unwrap();
        assert_eq!(store.transcript(), entries);
    }
}
