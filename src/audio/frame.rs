//! Audio frame types
//!
//! Every frame carries its own sample rate. Nothing downstream assumes two
//! stages agree on a rate; conversion always goes through `codec`.

use std::time::Duration;

/// Rate the Live API expects for microphone audio
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Rate the Live API uses for synthesized speech
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture block
pub const CAPTURE_BLOCK_SIZE: usize = 8192;

/// Mono float samples in [-1, 1] straight from a device
#[derive(Debug, Clone, PartialEq)]
pub struct FloatFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl FloatFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        frame_duration(self.samples.len(), self.sample_rate)
    }
}

/// Mono 16-bit linear PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcm16Frame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Pcm16Frame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration(&self) -> Duration {
        frame_duration(self.samples.len(), self.sample_rate)
    }
}

fn frame_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples as f64 / sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_rate() {
        let frame = FloatFrame::new(vec![0.0; 4800], 48_000);
        assert_eq!(frame.duration(), Duration::from_millis(100));

        let pcm = Pcm16Frame::new(vec![0; 24_000], OUTPUT_SAMPLE_RATE);
        assert_eq!(pcm.duration(), Duration::from_secs(1));
    }

    #[test]
    fn zero_rate_has_no_duration() {
        let frame = FloatFrame::new(vec![0.5; 10], 0);
        assert_eq!(frame.duration(), Duration::ZERO);
    }
}
