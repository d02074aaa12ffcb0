//! Shared cpal plumbing for capture and playback
//!
//! cpal streams are not `Send` on every platform, so each stream lives on a
//! dedicated thread that builds it, reports the outcome, and then parks until
//! asked to stop. Dropping the `StreamThread` tears the stream down.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use crate::error::{CoachError, Result};

/// Owner of a cpal stream running on its own thread
pub(crate) struct StreamThread {
    name: &'static str,
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build a stream on a new thread. `build` returns the playing stream plus
    /// whatever the caller needs back (sample rate, shared state, ...).
    pub(crate) fn spawn<T, F>(name: &'static str, build: F) -> Result<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<(cpal::Stream, T)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<T>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok((stream, value)) => {
                    if ready_tx.send(Ok(value)).is_err() {
                        return;
                    }
                    // Blocks until stop() sends or the sender is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    log::debug!("Audio thread exiting");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| CoachError::UnsupportedPlatform(format!("audio thread: {}", e)))?;

        let value = ready_rx.recv().map_err(|_| {
            CoachError::UnsupportedPlatform(format!("{} thread exited before reporting", name))
        })??;

        Ok((
            Self {
                name,
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            },
            value,
        ))
    }

    /// Stop the stream and join its thread. Safe to call more than once.
    pub(crate) fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("{} thread panicked during shutdown", self.name);
            } else {
                log::info!("{} released", self.name);
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Map a backend-specific failure to the most actionable variant
pub(crate) fn classify_backend(description: &str) -> CoachError {
    let lower = description.to_lowercase();
    if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("not authorized")
        || lower.contains("unauthorized")
        || lower.contains("eacces")
    {
        CoachError::PermissionDenied(description.to_string())
    } else if lower.contains("no such device") || lower.contains("not found") {
        CoachError::DeviceNotFound
    } else {
        CoachError::DeviceBusy(description.to_string())
    }
}

pub(crate) fn map_default_config_error(e: cpal::DefaultStreamConfigError) -> CoachError {
    match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            CoachError::DeviceBusy("device is no longer available".to_string())
        }
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            CoachError::UnsupportedPlatform("stream type not supported".to_string())
        }
        other => classify_backend(&other.to_string()),
    }
}

pub(crate) fn map_build_error(e: cpal::BuildStreamError) -> CoachError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CoachError::DeviceBusy("device is no longer available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => {
            CoachError::UnsupportedPlatform("stream configuration not supported".to_string())
        }
        other => classify_backend(&other.to_string()),
    }
}

pub(crate) fn map_play_error(e: cpal::PlayStreamError) -> CoachError {
    match e {
        cpal::PlayStreamError::DeviceNotAvailable => {
            CoachError::DeviceBusy("device is no longer available".to_string())
        }
        other => classify_backend(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_text_is_classified() {
        assert!(matches!(
            classify_backend("Permission denied (os error 13)"),
            CoachError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_backend("ALSA: No such device"),
            CoachError::DeviceNotFound
        ));
        assert!(matches!(
            classify_backend("Device or resource busy"),
            CoachError::DeviceBusy(_)
        ));
    }

    #[test]
    fn build_errors_keep_their_meaning() {
        assert!(matches!(
            map_build_error(cpal::BuildStreamError::DeviceNotAvailable),
            CoachError::DeviceBusy(_)
        ));
        assert!(matches!(
            map_build_error(cpal::BuildStreamError::StreamConfigNotSupported),
            CoachError::UnsupportedPlatform(_)
        ));
        assert!(matches!(
            map_default_config_error(cpal::DefaultStreamConfigError::StreamTypeNotSupported),
            CoachError::UnsupportedPlatform(_)
        ));
    }

    #[test]
    fn failed_build_is_reported_and_thread_exits() {
        let result = StreamThread::spawn::<u32, _>("test-stream", || {
            Err(CoachError::DeviceNotFound)
        });
        assert!(matches!(result, Err(CoachError::DeviceNotFound)));
    }
}
