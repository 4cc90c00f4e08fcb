//! Frame codec: linear f32 samples <-> 16-bit little-endian PCM <-> base64.
//!
//! The 16-bit quantization here is the only precision loss in the pipeline;
//! it matches the bit depth of the wire protocol.

use base64::{engine::general_purpose, Engine as _};

use crate::error::{LinkError, Result};

const PCM16_SCALE: f32 = 32768.0;

/// Decoded inbound audio, one sample vector per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average all channels down to one.
    pub fn into_mono(mut self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels.swap_remove(0),
            n => {
                let frames = self.frames();
                (0..frames)
                    .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                    .collect()
            }
        }
    }
}

/// Scale samples in [-1, 1] to signed 16-bit PCM and base64 the bytes.
///
/// Out-of-range input saturates through the float-to-int cast; callers are
/// expected to hand in well-formed samples.
pub fn encode_for_wire(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let pcm = (sample * PCM16_SCALE) as i16;
        bytes.extend_from_slice(&pcm.to_le_bytes());
    }
    general_purpose::STANDARD.encode(&bytes)
}

/// Inverse of [`encode_for_wire`] for interleaved multi-channel payloads.
pub fn decode_from_wire(
    payload: &str,
    sample_rate: u32,
    channel_count: usize,
) -> Result<DecodedAudio> {
    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| LinkError::MalformedFrame {
            len: payload.len(),
            channels: channel_count,
        })?;

    decode_pcm16(&bytes, sample_rate, channel_count)
}

/// Split raw interleaved 16-bit LE PCM into normalized per-channel samples.
pub fn decode_pcm16(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<DecodedAudio> {
    let stride = 2 * channel_count;
    if channel_count == 0 || bytes.len() % stride != 0 {
        return Err(LinkError::MalformedFrame {
            len: bytes.len(),
            channels: channel_count,
        });
    }

    let frames = bytes.len() / stride;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in bytes.chunks_exact(stride) {
        for (ch, pair) in frame.chunks_exact(2).enumerate() {
            let pcm = i16::from_le_bytes([pair[0], pair[1]]);
            channels[ch].push(pcm as f32 / PCM16_SCALE);
        }
    }

    Ok(DecodedAudio {
        sample_rate,
        channels,
    })
}
