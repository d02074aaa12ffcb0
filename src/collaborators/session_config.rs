//! Session config collaborator.
//!
//! The backend turns the previous report (or its absence, which means a
//! benchmark session) into a system instruction and hands back the model and
//! API key to open the Live API with.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http::{error_message, http_client};
use crate::error::{CoachError, Result};
use crate::storage::UserProfile;
use crate::streaming::protocol::qualify_model;

/// Body of the config request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfigRequest {
    pub last_report: Option<Value>,
    pub metrics: Option<Value>,
    pub user_profile: UserProfile,
    pub temperature: f32,
    pub voice_name: String,
    pub custom_prompt: Option<String>,
}

impl SessionConfigRequest {
    /// No prior report means the backend builds the benchmark prompt
    pub fn is_benchmark(&self) -> bool {
        self.last_report.is_none()
    }
}

/// Everything needed to open and set up a Live API connection
#[derive(Debug, Clone, PartialEq)]
pub struct SessionBundle {
    pub session_id: String,
    pub system_instruction: String,
    /// Always `models/`-qualified
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub voice_name: String,
}

#[async_trait]
pub trait SessionConfigProvider: Send + Sync {
    async fn fetch(&self, request: &SessionConfigRequest) -> Result<SessionBundle>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionConfigResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    session_id: Option<String>,
    system_instruction: String,
    config: BundleConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleConfig {
    #[serde(default)]
    model: String,
    api_key: String,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    voice_name: Option<String>,
}

/// Parse a successful response body. Request values fill whatever the
/// backend leaves out.
pub fn parse_bundle(body: &str, request: &SessionConfigRequest) -> Result<SessionBundle> {
    let response: SessionConfigResponse = serde_json::from_str(body)
        .map_err(|e| CoachError::ConfigFetchFailed(format!("Unexpected response: {}", e)))?;

    if response.success == Some(false) {
        return Err(CoachError::ConfigFetchFailed(
            "Backend reported failure".to_string(),
        ));
    }
    if response.config.api_key.trim().is_empty() {
        return Err(CoachError::ConfigFetchFailed(
            "Response did not include an API key".to_string(),
        ));
    }

    Ok(SessionBundle {
        session_id: response
            .session_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        system_instruction: response.system_instruction,
        model: qualify_model(&response.config.model),
        api_key: response.config.api_key,
        temperature: response.config.temperature.unwrap_or(request.temperature),
        voice_name: response
            .config
            .voice_name
            .unwrap_or_else(|| request.voice_name.clone()),
    })
}

/// Production provider talking to the coaching backend
#[derive(Debug, Clone)]
pub struct HttpSessionConfigProvider {
    url: String,
}

impl HttpSessionConfigProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SessionConfigProvider for HttpSessionConfigProvider {
    async fn fetch(&self, request: &SessionConfigRequest) -> Result<SessionBundle> {
        let client = http_client()
            .ok_or_else(|| CoachError::ConfigFetchFailed("HTTP client unavailable".to_string()))?;

        log::info!(
            "Requesting session config ({})",
            if request.is_benchmark() {
                "benchmark"
            } else {
                "follow-up"
            }
        );

        let response = client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| CoachError::ConfigFetchFailed(format!("Network error: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CoachError::ConfigFetchFailed(format!("Network error: {}", e)))?;

        if !status.is_success() {
            let message = error_message(status, &body);
            log::error!("Session config request failed: {}", message);
            return Err(CoachError::ConfigFetchFailed(message));
        }

        let bundle = parse_bundle(&body, request)?;
        log::info!(
            "Session config ready: session {} on {}",
            bundle.session_id,
            bundle.model
        );
        Ok(bundle)
    }
}
