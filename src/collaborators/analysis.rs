//! Post-session analysis hand-off.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http::{error_message, http_client};
use crate::error::{CoachError, Result};
use crate::storage::TranscriptEntry;

#[async_trait]
pub trait ReportAnalyzer: Send + Sync {
    /// Turn a finished transcript into a report value, stored verbatim
    async fn analyze(&self, session_id: &str, transcript: &[TranscriptEntry]) -> Result<Value>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest<'a> {
    transcript_log: &'a [TranscriptEntry],
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    report: Option<Value>,
}

pub fn parse_report(body: &str) -> Result<Value> {
    let response: AnalysisResponse = serde_json::from_str(body)
        .map_err(|e| CoachError::ReportFailed(format!("Unexpected response: {}", e)))?;
    match response.report {
        Some(report) if response.success && !report.is_null() => Ok(report),
        _ => Err(CoachError::ReportFailed(
            "Backend returned no report".to_string(),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct HttpReportAnalyzer {
    url: String,
}

impl HttpReportAnalyzer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ReportAnalyzer for HttpReportAnalyzer {
    async fn analyze(&self, session_id: &str, transcript: &[TranscriptEntry]) -> Result<Value> {
        let client = http_client()
            .ok_or_else(|| CoachError::ReportFailed("HTTP client unavailable".to_string()))?;

        log::info!(
            "Requesting analysis for session {} ({} entries)",
            session_id,
            transcript.len()
        );

        let response = client
            .post(&self.url)
            .json(&AnalysisRequest {
                transcript_log: transcript,
                session_id,
            })
            .send()
            .await
            .map_err(|e| CoachError::ReportFailed(format!("Network error: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CoachError::ReportFailed(format!("Network error: {}", e)))?;

        if !status.is_success() {
            return Err(CoachError::ReportFailed(error_message(status, &body)));
        }
        parse_report(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Speaker;

    #[test]
    fn request_uses_documented_field_names() {
        let entries = vec![TranscriptEntry {
            timestamp: 5,
            speaker: Speaker::Assistant,
            text: "Hello".to_string(),
        }];
        let value = serde_json::to_value(AnalysisRequest {
            transcript_log: &entries,
            session_id: "s1",
        })
        .unwrap();
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["transcriptLog"][0]["speaker"], "model");
    }

    #[test]
    fn report_is_returned_verbatim() {
        let report =
            parse_report(r#"{"success":true,"report":{"overall_genam_proficiency":71}}"#).unwrap();
        assert_eq!(report["overall_genam_proficiency"], 71);
    }

    #[test]
    fn missing_report_is_failure() {
        assert!(matches!(
            parse_report(r#"{"success":false}"#),
            Err(CoachError::ReportFailed(_))
        ));
        assert!(matches!(
            parse_report(r#"{"success":true,"report":null}"#),
            Err(CoachError::ReportFailed(_))
        ));
        assert!(matches!(parse_report("<html>"), Err(CoachError::ReportFailed(_))));
    }
}
