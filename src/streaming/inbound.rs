//! Disambiguation of model text parts
//!
//! The model speaks transcript text, but at the end of the diagnostic phase
//! it emits a JSON object flagged with `"diagnostic_complete": true`. That
//! object must reach the report, never the transcript. Whole-text JSON is
//! tried first; otherwise the first flat object mentioning the flag is
//! extracted from surrounding prose.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static EMBEDDED_DIAGNOSTIC: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"\{[^}]*"diagnostic_complete"[^}]*\}"#)
        .map_err(|e| log::error!("Diagnostic pattern failed to compile: {}", e))
        .ok()
});

/// Structured scores the model emits when the diagnostic finishes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticPayload {
    pub diagnostic_complete: bool,
    #[serde(default)]
    pub overall_proficiency_score: f64,
    #[serde(default)]
    pub phonetics_score: f64,
    #[serde(default)]
    pub intonation_score: f64,
    #[serde(default)]
    pub stress_score: f64,
    #[serde(default)]
    pub qualitative_evaluation: String,
    #[serde(default)]
    pub focus_phonemes: Vec<Value>,
    #[serde(default)]
    pub exercise_types: Vec<Value>,
    #[serde(default)]
    pub priority_areas: Vec<Value>,
}

/// The four headline scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub overall: f64,
    pub phonetics: f64,
    pub intonation: f64,
    pub stress: f64,
}

impl DiagnosticPayload {
    pub fn scores(&self) -> Scores {
        Scores {
            overall: self.overall_proficiency_score,
            phonetics: self.phonetics_score,
            intonation: self.intonation_score,
            stress: self.stress_score,
        }
    }
}

/// What a model text part turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum TextPayload {
    Transcript(String),
    Diagnostic(DiagnosticPayload),
}

/// Route one model text part
pub fn classify_text(text: &str) -> TextPayload {
    let trimmed = text.trim();

    // Parse-first: the whole part is the payload
    if trimmed.starts_with('{') {
        if let Ok(payload) = serde_json::from_str::<DiagnosticPayload>(trimmed) {
            if payload.diagnostic_complete {
                return TextPayload::Diagnostic(payload);
            }
        }
    }

    if let Some(payload) = extract_embedded(trimmed) {
        return TextPayload::Diagnostic(payload);
    }

    TextPayload::Transcript(trimmed.to_string())
}

fn extract_embedded(text: &str) -> Option<DiagnosticPayload> {
    let pattern = EMBEDDED_DIAGNOSTIC.as_ref()?;
    let candidate = pattern.find(text)?.as_str();
    if !candidate.contains("true") {
        return None;
    }

    match serde_json::from_str::<DiagnosticPayload>(candidate) {
        Ok(payload) if payload.diagnostic_complete => Some(payload),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Diagnostic object did not parse, keeping as transcript: {}", e);
            None
        }
    }
}
