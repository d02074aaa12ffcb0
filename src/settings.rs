use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoachError, Result};

const SETTINGS_DIR_NAME: &str = "live-coach";
const SETTINGS_FILE_NAME: &str = "settings.json";

pub const ENV_SESSION_URL: &str = "LIVE_COACH_SESSION_URL";
pub const ENV_ANALYSIS_URL: &str = "LIVE_COACH_ANALYSIS_URL";
pub const ENV_LIVE_URL: &str = "LIVE_COACH_LIVE_URL";
pub const ENV_STORE_PATH: &str = "LIVE_COACH_STORE_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachSettings {
    /// Endpoint that builds the session config (system instruction, model, key).
    pub session_url: String,

    /// Endpoint that turns a transcript into a report. `None` skips the hand-off.
    pub analysis_url: Option<String>,

    /// Live API websocket endpoint.
    pub live_url: String,

    /// Key/value store file. `None` uses the platform data directory.
    pub store_path: Option<PathBuf>,

    /// Frames with RMS strictly above this count as speech.
    pub speech_threshold: f32,

    /// Silence needed before speech is considered over.
    pub speech_release_ms: u64,

    /// Pause between the setup envelope and the start trigger.
    pub greeting_delay_ms: u64,

    /// Unpaused seconds before the diagnostic is closed out. 0 disables the countdown.
    pub diagnostic_secs: u32,

    /// Capture block size in samples at the device rate.
    pub capture_block_size: usize,

    /// Persist the transcript every N entries.
    pub transcript_save_interval: usize,

    /// Transcripts with more entries than this are sent for analysis at stop.
    pub report_min_entries: usize,
}

impl Default for CoachSettings {
    fn default() -> Self {
        Self {
            session_url: "http://localhost:3000/api/session".to_string(),
            analysis_url: Some("http://localhost:3000/api/analyze-session".to_string()),
            live_url: crate::streaming::LIVE_API_URL.to_string(),
            store_path: None,
            speech_threshold: crate::audio::vad::SPEECH_RMS_THRESHOLD,
            speech_release_ms: 100,
            greeting_delay_ms: 500,
            diagnostic_secs: 120,
            capture_block_size: crate::audio::CAPTURE_BLOCK_SIZE,
            transcript_save_interval: 5,
            report_min_entries: 5,
        }
    }
}

impl CoachSettings {
    /// Clamp out-of-range values back to something usable
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if !(self.speech_threshold > 0.0 && self.speech_threshold < 1.0) {
            log::warn!(
                "Settings: speech_threshold {} out of range, using {}",
                self.speech_threshold,
                defaults.speech_threshold
            );
            self.speech_threshold = defaults.speech_threshold;
        }
        if self.capture_block_size < 256 {
            log::warn!(
                "Settings: capture_block_size {} too small, using {}",
                self.capture_block_size,
                defaults.capture_block_size
            );
            self.capture_block_size = defaults.capture_block_size;
        }
        if self.transcript_save_interval == 0 {
            log::warn!("Settings: transcript_save_interval must be at least 1");
            self.transcript_save_interval = defaults.transcript_save_interval;
        }
        if self.analysis_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            self.analysis_url = None;
        }
        self
    }

    /// Environment variables win over the settings file
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_SESSION_URL) {
            self.session_url = url;
        }
        if let Some(url) = lookup(ENV_ANALYSIS_URL) {
            self.analysis_url = Some(url);
        }
        if let Some(url) = lookup(ENV_LIVE_URL) {
            self.live_url = url;
        }
        if let Some(path) = lookup(ENV_STORE_PATH) {
            self.store_path = Some(PathBuf::from(path));
        }
    }
}

pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load from the platform config directory, falling back to defaults
pub fn load_settings() -> CoachSettings {
    match settings_path() {
        Some(path) => load_settings_from(&path),
        None => {
            log::warn!("Settings: could not determine config directory");
            CoachSettings::default()
        }
    }
}

pub fn load_settings_from(path: &Path) -> CoachSettings {
    let settings = match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<CoachSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                CoachSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CoachSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            CoachSettings::default()
        }
    };
    settings.validated()
}

pub fn save_settings(settings: &CoachSettings) -> Result<()> {
    let path = settings_path()
        .ok_or_else(|| CoachError::Storage("Could not determine config directory".to_string()))?;
    save_settings_to(&path, settings)
}

pub fn save_settings_to(path: &Path, settings: &CoachSettings) -> Result<()> {
    let contents = serde_json::to_string_pretty(settings)?;
    write_atomic(path, contents.as_bytes())
}

/// Write to a sibling temp file, then rename over the destination
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            CoachError::Storage(format!("Failed to create directory {:?}: {}", parent, e))
        })?;
    }

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, contents)
        .map_err(|e| CoachError::Storage(format!("Write temp file {:?}: {}", tmp_path, e)))?;

    // Windows rename fails when the destination exists
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(CoachError::Storage(format!(
                    "Remove existing file {:?}: {}",
                    path, e
                )));
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(|e| {
        CoachError::Storage(format!("Rename {:?} to {:?}: {}", tmp_path, path, e))
    })
}
