use reqwest::Client;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

/// Shared HTTP client for the collaborators (reuses TLS sessions)
static HTTP_CLIENT: OnceLock<Option<Client>> = OnceLock::new();

pub(crate) fn http_client() -> Option<&'static Client> {
    HTTP_CLIENT
        .get_or_init(|| {
            Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .map_err(|e| log::error!("Failed to build HTTP client: {}", e))
                .ok()
        })
        .as_ref()
}

/// Error body returned by the coaching backend
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// Best human-readable message from a failed response body
pub(crate) fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(ApiErrorResponse {
            error,
            details: Some(details),
        }) => format!("{} ({}): {}", error, status.as_u16(), details),
        Ok(ApiErrorResponse { error, .. }) => format!("{} ({})", error, status.as_u16()),
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
        Err(_) => format!("HTTP {}: {}", status, body.trim()),
    }
}
