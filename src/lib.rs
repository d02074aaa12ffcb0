//! Full-duplex voice coaching client for the Gemini Live API.
//!
//! Microphone audio is resampled to 16 kHz PCM and streamed over a
//! websocket; the model's 24 kHz replies are scheduled back to back on the
//! output device and cut off the moment the user starts speaking.
//!
//! `CoachController` is the entry point. Everything it talks to sits behind
//! a trait (`AudioInput`, `AudioOutput`, `LiveConnector`,
//! `SessionConfigProvider`, `ReportAnalyzer`, `KeyValueStore`) with a
//! production implementation in this crate.

pub mod audio;
pub mod collaborators;
pub mod error;
pub mod metrics;
pub mod session;
pub mod settings;
pub mod state_machine;
pub mod storage;
pub mod streaming;

pub use error::{CoachError, Result};
pub use session::{CoachController, CoachDeps, CoachSnapshot, ConnectionStatus, SessionStatus};
pub use settings::{load_settings, save_settings, CoachSettings};
