//! Audio pipeline for the coaching client
//!
//! Capture and playback run on cpal; everything in between (rate
//! conversion, PCM coding, speech detection, scheduling, metering) is plain
//! synchronous code driven from the session loop.

pub mod capture;
pub mod codec;
mod device;
pub mod frame;
pub mod level;
pub mod output;
pub mod playback;
pub mod vad;

pub use capture::{AudioInput, CaptureHandle, CpalMicrophone, FrameCallback};
pub use frame::{FloatFrame, Pcm16Frame, CAPTURE_BLOCK_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use level::{run_level_monitor, LevelMonitor, LevelTap};
pub use output::{AudioOutput, CpalSpeaker, SourceEndedCallback};
pub use playback::{DecodedBuffer, PlaybackScheduler, PlaybackSink, ScheduledSource, SourceId};
pub use vad::{RmsClassifier, SpeechActivityDetector, SpeechClassifier, SpeechTransition};
