//! 16-bit PCM framing and transport encoding.
//!
//! Everything here is allocation-light and free of locks and logging so the
//! conversion helpers can run inside a real-time block callback.

use anyhow::{ensure, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderStringWriter;
use base64::Engine;
use std::io::Write;

/// Bytes occupied by one PCM sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Peak absolute amplitude of a block of float samples. NaN samples are ignored.
pub fn peak_amplitude(block: &[f32]) -> f32 {
    block.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// Clamp to [-1, 1] and scale to a signed 16-bit sample, truncating toward zero.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Convert a float block to 16-bit PCM.
pub fn convert_block(block: &[f32]) -> Vec<i16> {
    block.iter().map(|&s| f32_to_i16(s)).collect()
}

/// Multiply every sample by `gain` in place.
pub fn apply_gain(block: &mut [f32], gain: f32) {
    for sample in block.iter_mut() {
        *sample *= gain;
    }
}

/// Little-endian byte view of a sample sequence
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Base64-encode `bytes`, feeding the encoder `step` bytes at a time.
///
/// The streaming encoder carries partial groups across steps, so the result
/// is identical to a one-shot encode of the whole buffer.
pub fn encode_base64_chunked(bytes: &[u8], step: usize) -> std::io::Result<String> {
    let mut encoder = EncoderStringWriter::new(&STANDARD);
    for part in bytes.chunks(step.max(1)) {
        encoder.write_all(part)?;
    }
    Ok(encoder.into_inner())
}

/// Decode a base64 payload back into little-endian 16-bit samples.
pub fn decode_base64_pcm(payload: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD
        .decode(payload)
        .context("Payload is not valid base64")?;

    ensure!(
        bytes.len() % BYTES_PER_SAMPLE == 0,
        "PCM payload has odd length: {} bytes",
        bytes.len()
    );

    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
