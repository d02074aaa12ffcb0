//! Watermark playback scheduling
//!
//! Each decoded chunk starts at `max(now, next_free_time)` and pushes the
//! watermark to its own end, so an arbitrarily chunked stream plays back to
//! back in arrival order. `flush()` is the barge-in primitive: it stops every
//! active source synchronously and pulls the watermark back to "now".

use std::sync::Arc;

use super::codec::{decode_base64_pcm16, pcm16_to_float};
use crate::error::Result;

pub type SourceId = u64;

/// Decoded mono audio ready for the output clock
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl DecodedBuffer {
    /// Length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Output device abstraction used by the scheduler.
///
/// `now()` must be monotonic for the lifetime of the sink. `stop()` must take
/// effect before it returns.
pub trait PlaybackSink: Send {
    /// Output clock position in seconds
    fn now(&self) -> f64;
    fn start(&mut self, id: SourceId, buffer: DecodedBuffer, start_at: f64);
    fn stop(&mut self, id: SourceId);
}

/// A buffer bound to a start time on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

pub struct PlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    next_free_time: f64,
    active: Vec<ScheduledSource>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            sink,
            next_free_time: 0.0,
            active: Vec::new(),
            next_id: 1,
        }
    }

    /// Schedule PCM16 samples recorded at `source_rate`.
    /// Empty input schedules nothing.
    pub fn enqueue(&mut self, pcm: &[i16], source_rate: u32) -> Option<ScheduledSource> {
        if pcm.is_empty() || source_rate == 0 {
            return None;
        }

        let buffer = DecodedBuffer {
            samples: pcm16_to_float(pcm).into(),
            sample_rate: source_rate,
        };
        let duration = buffer.duration();
        let start_at = self.sink.now().max(self.next_free_time);

        let id = self.next_id;
        self.next_id += 1;

        self.sink.start(id, buffer, start_at);

        let source = ScheduledSource {
            id,
            start_at,
            duration,
        };
        self.next_free_time = source.end_at();
        self.active.push(source);
        Some(source)
    }

    /// Decode a base64 payload from the server and schedule it
    pub fn enqueue_base64(
        &mut self,
        data: &str,
        source_rate: u32,
    ) -> Result<Option<ScheduledSource>> {
        let pcm = decode_base64_pcm16(data)?;
        Ok(self.enqueue(&pcm, source_rate))
    }

    /// Natural completion reported by the sink
    pub fn on_source_ended(&mut self, id: SourceId) {
        self.active.retain(|s| s.id != id);
    }

    /// Stop everything now. Returns how many sources were cut.
    pub fn flush(&mut self) -> usize {
        let stopped = self.active.len();
        for source in self.active.drain(..) {
            self.sink.stop(source.id);
        }
        self.next_free_time = self.sink.now();
        if stopped > 0 {
            log::debug!("Playback flushed, {} sources stopped", stopped);
        }
        stopped
    }

    /// Flush and forget the watermark entirely (session end)
    pub fn reset(&mut self) {
        self.flush();
        self.next_free_time = 0.0;
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn next_free_time(&self) -> f64 {
        self.next_free_time
    }
}

#[cfg(test)]
pub(crate) mod test_sink {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct SinkLog {
        pub now: f64,
        pub started: Vec<(SourceId, f64, f64)>,
        pub stopped: Vec<SourceId>,
        pub playing: Vec<SourceId>,
    }

    /// In-memory sink with a hand-driven clock
    #[derive(Clone, Default)]
    pub struct ManualSink {
        pub log: Arc<Mutex<SinkLog>>,
    }

    impl ManualSink {
        pub fn set_now(&self, now: f64) {
            self.log.lock().unwrap().now = now;
        }
    }

    impl PlaybackSink for ManualSink {
        fn now(&self) -> f64 {
            self.log.lock().unwrap().now
        }

        fn start(&mut self, id: SourceId, buffer: DecodedBuffer, start_at: f64) {
            let mut log = self.log.lock().unwrap();
            log.started.push((id, start_at, buffer.duration()));
            log.playing.push(id);
        }

        fn stop(&mut self, id: SourceId) {
            let mut log = self.log.lock().unwrap();
            log.stopped.push(id);
            log.playing.retain(|p| *p != id);
        }
    }
}
