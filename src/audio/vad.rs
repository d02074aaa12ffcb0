use std::time::{Duration, Instant};

/// RMS above this counts as speech. High enough to ignore room noise.
pub const SPEECH_RMS_THRESHOLD: f32 = 0.05;

/// Continuous silence needed before speech is considered over
pub const SPEECH_RELEASE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Per-frame speech/silence decision
pub trait SpeechClassifier: Send {
    fn classify(&mut self, samples: &[f32]) -> bool;
}

/// Fixed-threshold energy classifier
#[derive(Debug, Clone)]
pub struct RmsClassifier {
    threshold: f32,
}

impl RmsClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for RmsClassifier {
    fn default() -> Self {
        Self::new(SPEECH_RMS_THRESHOLD)
    }
}

impl SpeechClassifier for RmsClassifier {
    fn classify(&mut self, samples: &[f32]) -> bool {
        rms(samples) > self.threshold
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechTransition {
    None,
    /// Silence → speech. Triggers barge-in and counts one attempt.
    Started,
    Stopped,
}

/// Debounced speech detector.
///
/// Onset is immediate; release waits for `debounce` without a speech frame.
pub struct SpeechActivityDetector {
    classifier: Box<dyn SpeechClassifier>,
    debounce: Duration,
    speaking: bool,
    last_speech_at: Option<Instant>,
    attempts: u64,
}

impl SpeechActivityDetector {
    pub fn new(classifier: Box<dyn SpeechClassifier>, debounce: Duration) -> Self {
        Self {
            classifier,
            debounce,
            speaking: false,
            last_speech_at: None,
            attempts: 0,
        }
    }

    pub fn with_threshold(threshold: f32, debounce: Duration) -> Self {
        Self::new(Box::new(RmsClassifier::new(threshold)), debounce)
    }

    pub fn process(&mut self, samples: &[f32], now: Instant) -> SpeechTransition {
        if self.classifier.classify(samples) {
            self.last_speech_at = Some(now);
            if !self.speaking {
                self.speaking = true;
                self.attempts += 1;
                log::debug!("VAD: speech started (attempt {})", self.attempts);
                return SpeechTransition::Started;
            }
            return SpeechTransition::None;
        }

        if self.speaking {
            let silent_for = self
                .last_speech_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or(Duration::MAX);
            if silent_for > self.debounce {
                self.speaking = false;
                log::debug!("VAD: speech stopped after {:?} of silence", silent_for);
                return SpeechTransition::Stopped;
            }
        }

        SpeechTransition::None
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Onsets seen since the last reset
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.speaking = false;
        self.last_speech_at = None;
        self.attempts = 0;
    }
}

impl Default for SpeechActivityDetector {
    fn default() -> Self {
        Self::new(Box::new(RmsClassifier::default()), SPEECH_RELEASE_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud() -> Vec<f32> {
        vec![0.2; 160]
    }

    fn quiet() -> Vec<f32> {
        vec![0.01; 160]
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5; 100]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn threshold_is_strict() {
        let mut classifier = RmsClassifier::default();
        assert!(!classifier.classify(&[0.05; 10]));
        assert!(classifier.classify(&[0.051; 10]));
    }

    #[test]
    fn onset_counts_one_attempt() {
        let mut vad = SpeechActivityDetector::default();
        let t0 = Instant::now();

        assert_eq!(vad.process(&quiet(), t0), SpeechTransition::None);
        assert_eq!(vad.process(&loud(), t0), SpeechTransition::Started);
        assert_eq!(
            vad.process(&loud(), t0 + Duration::from_millis(10)),
            SpeechTransition::None
        );
        assert_eq!(vad.attempts(), 1);
        assert!(vad.is_speaking());
    }

    #[test]
    fn oscillation_inside_debounce_is_one_onset() {
        let mut vad = SpeechActivityDetector::default();
        let t0 = Instant::now();
        let mut onsets = 0;

        // Alternate every 20ms for a full second; silence never lasts 100ms
        for step in 0..50u64 {
            let frame = if step % 2 == 0 { loud() } else { quiet() };
            let now = t0 + Duration::from_millis(step * 20);
            if vad.process(&frame, now) == SpeechTransition::Started {
                onsets += 1;
            }
        }

        assert_eq!(onsets, 1);
        assert_eq!(vad.attempts(), 1);
        assert!(vad.is_speaking());
    }

    #[test]
    fn release_needs_full_debounce() {
        let mut vad = SpeechActivityDetector::default();
        let t0 = Instant::now();
        vad.process(&loud(), t0);

        assert_eq!(
            vad.process(&quiet(), t0 + Duration::from_millis(100)),
            SpeechTransition::None
        );
        assert_eq!(
            vad.process(&quiet(), t0 + Duration::from_millis(101)),
            SpeechTransition::Stopped
        );
        assert!(!vad.is_speaking());

        // A second utterance is a second attempt
        assert_eq!(
            vad.process(&loud(), t0 + Duration::from_millis(300)),
            SpeechTransition::Started
        );
        assert_eq!(vad.attempts(), 2);
    }

    #[test]
    fn custom_classifier_is_used() {
        struct Always;
        impl SpeechClassifier for Always {
            fn classify(&mut self, _samples: &[f32]) -> bool {
                true
            }
        }

        let mut vad = SpeechActivityDetector::new(Box::new(Always), SPEECH_RELEASE_DEBOUNCE);
        assert_eq!(vad.process(&[], Instant::now()), SpeechTransition::Started);
    }

    #[test]
    fn reset_clears_attempts() {
        let mut vad = SpeechActivityDetector::default();
        vad.process(&loud(), Instant::now());
        vad.reset();
        assert_eq!(vad.attempts(), 0);
        assert!(!vad.is_speaking());
    }
}
