//! Speaker output: a small cpal mixer implementing `PlaybackSink`
//!
//! Scheduled buffers become voices with an absolute start time. The render
//! callback sums every voice that overlaps the current output frame, and the
//! count of rendered frames is the monotonic clock the scheduler reads.
//! Voices that run off their end are reported through the ended callback.

use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::device::{map_build_error, map_default_config_error, map_play_error, StreamThread};
use super::level::LevelTap;
use super::playback::{DecodedBuffer, PlaybackSink, SourceId};
use crate::error::{CoachError, Result};

/// Called from the audio thread when a source finishes on its own
pub type SourceEndedCallback = Box<dyn Fn(SourceId) + Send + 'static>;

/// Factory for playback sinks. `open` blocks like `AudioInput::acquire`, and
/// dropping the sink may block until the stream thread exits.
pub trait AudioOutput: Send + Sync {
    fn open(&self, on_ended: SourceEndedCallback, tap: LevelTap) -> Result<Box<dyn PlaybackSink>>;
}

struct Voice {
    id: SourceId,
    buffer: DecodedBuffer,
    start_at: f64,
}

impl Voice {
    fn end_at(&self) -> f64 {
        self.start_at + self.buffer.duration()
    }

    fn sample_at(&self, t: f64) -> f32 {
        if t < self.start_at {
            return 0.0;
        }
        let idx = ((t - self.start_at) * self.buffer.sample_rate as f64) as usize;
        self.buffer.samples.get(idx).copied().unwrap_or(0.0)
    }
}

/// Shared between the render callback and the scheduler's sink handle
pub(crate) struct Mixer {
    output_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub(crate) fn new(output_rate: u32) -> Self {
        Self {
            output_rate: output_rate.max(1),
            frames_rendered: 0,
            voices: Vec::new(),
        }
    }

    pub(crate) fn now(&self) -> f64 {
        self.frames_rendered as f64 / self.output_rate as f64
    }

    /// Render `frames` mono samples into `out`, returning the block peak and the
    /// ids of voices that finished.
    pub(crate) fn render(&mut self, out: &mut Vec<f32>, frames: usize) -> (f32, Vec<SourceId>) {
        out.clear();
        let rate = self.output_rate as f64;
        let mut peak = 0.0f32;

        for f in 0..frames as u64 {
            let t = (self.frames_rendered + f) as f64 / rate;
            let mixed: f32 = self.voices.iter().map(|v| v.sample_at(t)).sum();
            let mixed = mixed.clamp(-1.0, 1.0);
            peak = peak.max(mixed.abs());
            out.push(mixed);
        }
        self.frames_rendered += frames as u64;

        let now = self.now();
        let mut ended = Vec::new();
        self.voices.retain(|v| {
            if v.end_at() <= now {
                ended.push(v.id);
                false
            } else {
                true
            }
        });

        (peak, ended)
    }
}

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Default-device speaker output
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSpeaker;

impl AudioOutput for CpalSpeaker {
    fn open(&self, on_ended: SourceEndedCallback, tap: LevelTap) -> Result<Box<dyn PlaybackSink>> {
        let (thread, mixer) =
            StreamThread::spawn("speaker", move || open_output_stream(on_ended, tap))?;
        Ok(Box::new(SpeakerSink {
            mixer,
            _thread: thread,
        }))
    }
}

/// Sink handle held by the scheduler; dropping it closes the output stream
pub struct SpeakerSink {
    mixer: Arc<Mutex<Mixer>>,
    _thread: StreamThread,
}

impl PlaybackSink for SpeakerSink {
    fn now(&self) -> f64 {
        lock(&self.mixer).now()
    }

    fn start(&mut self, id: SourceId, buffer: DecodedBuffer, start_at: f64) {
        lock(&self.mixer).voices.push(Voice {
            id,
            buffer,
            start_at,
        });
    }

    fn stop(&mut self, id: SourceId) {
        lock(&self.mixer).voices.retain(|v| v.id != id);
    }
}

fn open_output_stream(
    on_ended: SourceEndedCallback,
    tap: LevelTap,
) -> Result<(Stream, Arc<Mutex<Mixer>>)> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| {
        CoachError::UnsupportedPlatform("no audio output device available".to_string())
    })?;

    let supported = device
        .default_output_config()
        .map_err(map_default_config_error)?;

    log::info!(
        "Output config: {:?} {} Hz, {} channels, {:?}",
        device.name(),
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0)));

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, mixer.clone(), on_ended, tap),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, mixer.clone(), on_ended, tap),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, mixer.clone(), on_ended, tap),
        other => Err(CoachError::UnsupportedPlatform(format!(
            "output sample format {:?}",
            other
        ))),
    }?;

    stream.play().map_err(map_play_error)?;
    Ok((stream, mixer))
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    on_ended: SourceEndedCallback,
    tap: LevelTap,
) -> Result<Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                let (peak, ended) = lock(&mixer).render(&mut mono, frames);

                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    let value = T::from_sample(sample);
                    for slot in frame.iter_mut() {
                        *slot = value;
                    }
                }

                if peak > 0.0 {
                    tap.record(&[peak]);
                }
                for id in ended {
                    on_ended(id);
                }
            },
            |err| log::error!("Audio output stream error: {}", err),
            None,
        )
        .map_err(map_build_error)
}
