//! Error types for the coaching client
//!
//! One taxonomy for the whole crate. Device and permission variants carry
//! text the user can act on; transport variants are only surfaced once the
//! reconnect ladder has been exhausted.

use thiserror::Error;

/// Result type alias for coaching operations
pub type Result<T> = std::result::Result<T, CoachError>;

/// Errors surfaced by the coaching client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoachError {
    /// The OS refused microphone access
    #[error("Microphone access was denied. Allow microphone access for this application and try again. ({0})")]
    PermissionDenied(String),

    /// No input device present
    #[error("No microphone was found. Connect a microphone and try again.")]
    DeviceNotFound,

    /// Device exists but could not be opened
    #[error("The microphone is in use by another application or unavailable: {0}")]
    DeviceBusy(String),

    /// No usable audio API or stream format on this platform
    #[error("Audio is not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    /// Websocket could not be opened
    #[error("Could not connect to the coaching service: {0}")]
    ConnectionFailed(String),

    /// Open socket dropped and every reconnect attempt failed
    #[error("Connection lost. Please restart the session.")]
    ConnectionLost,

    /// Session config collaborator failed
    #[error("Failed to initialize session: {0}")]
    ConfigFetchFailed(String),

    /// Inbound payload failed to parse
    #[error("Malformed server message: {0}")]
    MalformedServerMessage(String),

    /// start() while a session is live or still connecting
    #[error("A session is already active or connecting")]
    SessionActive,

    /// stop() arrived before start() finished
    #[error("Session start was cancelled")]
    Cancelled,

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Report collaborator failure
    #[error("Report generation failed: {0}")]
    ReportFailed(String),
}

impl CoachError {
    /// Short category used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            CoachError::PermissionDenied(_)
            | CoachError::DeviceNotFound
            | CoachError::DeviceBusy(_)
            | CoachError::UnsupportedPlatform(_) => "audio",
            CoachError::ConnectionFailed(_)
            | CoachError::ConnectionLost
            | CoachError::MalformedServerMessage(_) => "transport",
            CoachError::ConfigFetchFailed(_) | CoachError::ReportFailed(_) => "collaborator",
            CoachError::SessionActive | CoachError::Cancelled => "lifecycle",
            CoachError::Storage(_) => "storage",
        }
    }

    /// True for the errors that need the user to fix something outside the app
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            CoachError::PermissionDenied(_)
                | CoachError::DeviceNotFound
                | CoachError::DeviceBusy(_)
                | CoachError::UnsupportedPlatform(_)
        )
    }
}

impl From<serde_json::Error> for CoachError {
    fn from(e: serde_json::Error) -> Self {
        CoachError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for CoachError {
    fn from(e: std::io::Error) -> Self {
        CoachError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_are_distinct_and_actionable() {
        let denied = CoachError::PermissionDenied("denied by user".to_string());
        let missing = CoachError::DeviceNotFound;
        let busy = CoachError::DeviceBusy("exclusive mode".to_string());

        assert_ne!(denied.to_string(), missing.to_string());
        assert_ne!(missing.to_string(), busy.to_string());
        assert!(denied.to_string().contains("Allow microphone access"));
        assert!(missing.to_string().contains("Connect a microphone"));
        assert!(busy.to_string().contains("exclusive mode"));

        assert!(denied.needs_user_action());
        assert!(busy.needs_user_action());
        assert!(!CoachError::ConnectionLost.needs_user_action());
    }

    #[test]
    fn kinds_group_the_taxonomy() {
        assert_eq!(CoachError::DeviceNotFound.kind(), "audio");
        assert_eq!(CoachError::ConnectionLost.kind(), "transport");
        assert_eq!(
            CoachError::ConfigFetchFailed("500".to_string()).kind(),
            "collaborator"
        );
        assert_eq!(CoachError::Storage("disk".to_string()).kind(), "storage");
    }
}
