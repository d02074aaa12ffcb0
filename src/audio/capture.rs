//! Microphone capture using CPAL
//!
//! Acquires the default input device and delivers mono float frames of a
//! fixed block size at the device's native rate. The stream is held by a
//! `MicrophoneHandle`; releasing or dropping the handle frees the device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::device::{map_build_error, map_default_config_error, map_play_error, StreamThread};
use super::frame::FloatFrame;
use super::level::LevelTap;
use crate::error::{CoachError, Result};

/// Receives every completed capture block, on the audio thread
pub type FrameCallback = Box<dyn FnMut(FloatFrame) + Send + 'static>;

/// Source of microphone audio
pub trait AudioInput: Send + Sync {
    /// Blocks until the device is running; the session calls it from the
    /// blocking pool.
    fn acquire(
        &self,
        block_size: usize,
        on_frame: FrameCallback,
        tap: LevelTap,
    ) -> Result<Box<dyn CaptureHandle>>;
}

/// Exclusive hold on an input device
pub trait CaptureHandle: Send {
    fn sample_rate(&self) -> u32;
    /// Free the device. May block while the audio thread exits. Idempotent.
    fn release(&mut self);
}

/// Collects arbitrarily sized callback buffers into fixed blocks
pub struct BlockAccumulator {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl BlockAccumulator {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size),
        }
    }

    pub fn push(&mut self, samples: impl IntoIterator<Item = f32>, emit: &mut dyn FnMut(FloatFrame)) {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(FloatFrame::new(block, self.sample_rate));
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Default-device microphone
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl AudioInput for CpalMicrophone {
    fn acquire(
        &self,
        block_size: usize,
        on_frame: FrameCallback,
        tap: LevelTap,
    ) -> Result<Box<dyn CaptureHandle>> {
        let (thread, sample_rate) = StreamThread::spawn("microphone", move || {
            open_input_stream(block_size, on_frame, tap)
        })?;

        log::info!("Microphone acquired at {} Hz", sample_rate);
        Ok(Box::new(MicrophoneHandle {
            thread,
            sample_rate,
        }))
    }
}

/// Running capture stream
pub struct MicrophoneHandle {
    thread: StreamThread,
    sample_rate: u32,
}

impl CaptureHandle for MicrophoneHandle {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn release(&mut self) {
        if self.thread.is_running() {
            self.thread.stop();
        }
    }
}

fn open_input_stream(
    block_size: usize,
    on_frame: FrameCallback,
    tap: LevelTap,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CoachError::DeviceNotFound)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(map_default_config_error)?;

    log::info!(
        "Input config: {} Hz, {} channels, {:?}",
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, block_size, on_frame, tap),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, block_size, on_frame, tap),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, block_size, on_frame, tap),
        other => Err(CoachError::UnsupportedPlatform(format!(
            "input sample format {:?}",
            other
        ))),
    }?;

    stream.play().map_err(map_play_error)?;
    Ok((stream, sample_rate))
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    block_size: usize,
    mut on_frame: FrameCallback,
    tap: LevelTap,
) -> Result<Stream>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let mut blocks = BlockAccumulator::new(block_size, config.sample_rate.0);
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // First channel only
                mono.clear();
                mono.extend(
                    data.iter()
                        .step_by(channels)
                        .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s)),
                );
                tap.record(&mono);
                blocks.push(mono.iter().copied(), &mut on_frame);
            },
            |err| log::error!("Audio input stream error: {}", err),
            None,
        )
        .map_err(map_build_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_emits_fixed_blocks() {
        let mut acc = BlockAccumulator::new(8192, 48_000);
        let mut frames = Vec::new();

        acc.push(std::iter::repeat(0.1).take(5000), &mut |f| frames.push(f));
        assert!(frames.is_empty());

        acc.push(std::iter::repeat(0.2).take(15_000), &mut |f| frames.push(f));
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 8192 && f.sample_rate == 48_000));
        assert_eq!(acc.pending(), 20_000 - 2 * 8192);
    }

    #[test]
    fn accumulator_preserves_order() {
        let mut acc = BlockAccumulator::new(4, 16_000);
        let mut frames = Vec::new();
        acc.push((0..8).map(|i| i as f32), &mut |f| frames.push(f));

        assert_eq!(frames[0].samples, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(frames[1].samples, vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn zero_block_size_is_clamped() {
        let mut acc = BlockAccumulator::new(0, 16_000);
        let mut count = 0;
        acc.push([0.0, 0.0], &mut |_| count += 1);
        assert_eq!(count, 2);
    }
}
