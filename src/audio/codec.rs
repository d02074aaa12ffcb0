//! PCM conversion between capture, transport and playback
//!
//! Outbound: device-rate float → 16 kHz float (nearest neighbour, no
//! anti-aliasing) → PCM16 → little-endian bytes → base64.
//! Inbound: base64 → little-endian PCM16 → float.

use base64::{engine::general_purpose::STANDARD, Engine};

use super::frame::{FloatFrame, Pcm16Frame, INPUT_SAMPLE_RATE};
use crate::error::{CoachError, Result};

/// MIME annotation for every outbound audio chunk
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// One encoded outbound chunk
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub pcm: Pcm16Frame,
    /// Base64 of the little-endian PCM bytes
    pub data: String,
    pub mime_type: &'static str,
}

/// Nearest-neighbour rate conversion.
///
/// Output length is `floor(len * target / source)` and output sample `i` is
/// `samples[floor(i * source / target)]`. Integer arithmetic keeps both
/// exact for any rate pair.
pub fn resample_nearest(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == 0 || target_rate == 0 {
        log::warn!(
            "Invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if source_rate == target_rate {
        return samples.to_vec();
    }

    let source = source_rate as u64;
    let target = target_rate as u64;
    let out_len = (samples.len() as u64 * target / source) as usize;

    (0..out_len as u64)
        .map(|i| samples[(i * source / target) as usize])
        .collect()
}

/// Float to PCM16 with the asymmetric scale: negatives × 32768, positives × 32767.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
}

/// Decode little-endian PCM16 bytes. A trailing odd byte is dropped.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    if bytes.len() % 2 != 0 {
        log::warn!(
            "PCM payload has odd length {}, dropping trailing byte",
            bytes.len()
        );
    }
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Decode a base64 PCM16 payload from the server
pub fn decode_base64_pcm16(data: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| CoachError::MalformedServerMessage(format!("audio payload: {}", e)))?;
    Ok(le_bytes_to_pcm16(&bytes))
}

/// Resample a capture frame to 16 kHz, keeping the float form
pub fn to_transport_rate(frame: &FloatFrame) -> FloatFrame {
    FloatFrame::new(
        resample_nearest(&frame.samples, frame.sample_rate, INPUT_SAMPLE_RATE),
        INPUT_SAMPLE_RATE,
    )
}

/// Encode a frame that is already at 16 kHz
pub fn encode_transport_frame(frame: &FloatFrame) -> EncodedChunk {
    debug_assert_eq!(frame.sample_rate, INPUT_SAMPLE_RATE);
    let pcm = float_to_pcm16(&frame.samples);
    let data = STANDARD.encode(pcm16_to_le_bytes(&pcm));
    EncodedChunk {
        pcm: Pcm16Frame::new(pcm, INPUT_SAMPLE_RATE),
        data,
        mime_type: INPUT_MIME_TYPE,
    }
}

/// Resample and encode a capture frame in one step
pub fn encode(frame: &FloatFrame) -> EncodedChunk {
    encode_transport_frame(&to_transport_rate(frame))
}

/// Pull the `rate=` parameter out of a MIME type like `audio/pcm;rate=24000`
pub fn mime_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}
