//! Records persisted between sessions.
//!
//! Field names follow the documented storage format so existing stores keep
//! loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::streaming::{DiagnosticPayload, Scores};

/// Qualitative text for a report saved because the session dropped
pub const UNEXPECTED_END_EVALUATION: &str = "Session ended unexpectedly";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    #[serde(rename = "model")]
    Assistant,
}

/// One line of the session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Unix milliseconds
    pub timestamp: i64,
    pub speaker: Speaker,
    pub text: String,
}

impl TranscriptEntry {
    pub fn now(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            speaker,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub coach_name: String,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: "Peter".to_string(),
            coach_name: "Alex".to_string(),
        }
    }
}

/// Voice and model preferences chosen by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    pub voice_name: String,
    pub temperature: f32,
    pub custom_prompt: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            voice_name: "Enceladus".to_string(),
            temperature: 1.0,
            custom_prompt: None,
        }
    }
}

/// Scores captured from the diagnostic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_minutes: f64,
    pub overall_genam_proficiency: f64,
    pub scores: Scores,
    pub qualitative_evaluation: String,
    #[serde(default)]
    pub focus_phonemes: Vec<Value>,
    #[serde(default)]
    pub exercise_types: Vec<Value>,
    #[serde(default)]
    pub priority_areas: Vec<Value>,
}

impl SessionReport {
    pub fn from_diagnostic(
        session_id: &str,
        payload: &DiagnosticPayload,
        duration_minutes: f64,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            duration_minutes,
            overall_genam_proficiency: payload.overall_proficiency_score,
            scores: payload.scores(),
            qualitative_evaluation: payload.qualitative_evaluation.clone(),
            focus_phonemes: payload.focus_phonemes.clone(),
            exercise_types: payload.exercise_types.clone(),
            priority_areas: payload.priority_areas.clone(),
        }
    }

    /// Report for scores that arrived but were never saved before the link dropped
    pub fn unexpected_end(session_id: &str, scores: Scores, duration_minutes: f64) -> Self {
        Self {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            duration_minutes,
            overall_genam_proficiency: scores.overall,
            scores,
            qualitative_evaluation: UNEXPECTED_END_EVALUATION.to_string(),
            focus_phonemes: Vec::new(),
            exercise_types: Vec::new(),
            priority_areas: Vec::new(),
        }
    }

    /// Only reports with a real overall score are worth keeping
    pub fn is_persistable(&self) -> bool {
        self.overall_genam_proficiency > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub session_id: String,
    pub date: DateTime<Utc>,
    pub duration_minutes: f64,
    /// Speech onsets detected during the session
    pub attempts: u64,
    pub transcript_entries: usize,
    #[serde(default)]
    pub report: Option<SessionReport>,
}

/// One point on the overall-score trend line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProficiencyPoint {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub overall: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_is_stored_as_model() {
        let entry = TranscriptEntry {
            timestamp: 1_700_000_000_000,
            speaker: Speaker::Assistant,
            text: "Hello".to_string(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["speaker"], "model");

        let user: TranscriptEntry =
            serde_json::from_str(r#"{"timestamp":1,"speaker":"user","text":"hi"}"#).unwrap();
        assert_eq!(user.speaker, Speaker::User);
    }

    #[test]
    fn zero_overall_is_not_persistable() {
        let payload = DiagnosticPayload {
            diagnostic_complete: true,
            ..DiagnosticPayload::default()
        };
        assert!(!SessionReport::from_diagnostic("s", &payload, 2.0).is_persistable());

        let payload = DiagnosticPayload {
            overall_proficiency_score: 55.0,
            ..payload
        };
        let report = SessionReport::from_diagnostic("s", &payload, 2.0);
        assert!(report.is_persistable());
        assert_eq!(report.scores.overall, 55.0);
    }

    #[test]
    fn unexpected_end_report_is_labelled() {
        let scores = Scores {
            overall: 40.0,
            ..Scores::default()
        };
        let report = SessionReport::unexpected_end("s", scores, 1.5);
        assert_eq!(report.qualitative_evaluation, UNEXPECTED_END_EVALUATION);
        assert_eq!(report.overall_genam_proficiency, 40.0);
    }

    #[test]
    fn defaults_match_documented_fallbacks() {
        assert_eq!(UserProfile::default().name, "Peter");
        assert_eq!(UserProfile::default().coach_name, "Alex");
        assert_eq!(Preferences::default().voice_name, "Enceladus");
        assert_eq!(Preferences::default().temperature, 1.0);
    }
}
