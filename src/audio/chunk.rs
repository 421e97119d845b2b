use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io;

use super::pcm;

/// Default accumulation limit: 1 MiB of PCM
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;

/// Default number of bytes fed to the base64 encoder per step
pub const DEFAULT_BASE64_STEP: usize = 8192;

/// Chunk type tag on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    AudioData,
}

/// One flushed payload handed to the frame sink
///
/// Serialises as `{"kind":"audio_data","payload":"<base64>","timestamp":<epoch ms>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunk {
    pub kind: ChunkKind,
    /// Base64 of little-endian 16-bit mono PCM
    pub payload: String,
    /// Milliseconds since the Unix epoch at flush time
    pub timestamp: i64,
}

impl AudioChunk {
    /// Decode the payload back into samples
    pub fn decode_samples(&self) -> Result<Vec<i16>> {
        pcm::decode_base64_pcm(&self.payload)
    }

    /// Length in bytes of the PCM carried by the payload, without decoding it
    pub fn pcm_len(&self) -> usize {
        let padding = self.payload.bytes().rev().take_while(|&b| b == b'=').count();
        (self.payload.len() / 4 * 3).saturating_sub(padding)
    }

    pub fn sample_count(&self) -> usize {
        self.pcm_len() / pcm::BYTES_PER_SAMPLE
    }
}

/// Bounded accumulation buffer for gated PCM blocks
///
/// The byte counter always equals the sum of the buffered blocks' byte
/// lengths and never exceeds `max_bytes`, except for a lone block that is
/// larger than the limit by itself, which is flushed straight away.
#[derive(Debug)]
pub struct CaptureBuffer {
    blocks: Vec<Vec<i16>>,
    byte_len: usize,
    max_bytes: usize,
    base64_step: usize,
}

/// Result of appending a block
#[derive(Debug)]
pub enum PushOutcome {
    /// Block buffered, nothing flushed
    Buffered,
    /// The limit would have been exceeded; the previous contents were drained
    Overflow(io::Result<AudioChunk>),
}

impl CaptureBuffer {
    pub fn new(max_bytes: usize, base64_step: usize) -> Self {
        Self {
            blocks: Vec::new(),
            byte_len: 0,
            max_bytes,
            base64_step,
        }
    }

    /// Append a block in arrival order, draining first if it would not fit
    pub fn push(&mut self, block: Vec<i16>) -> PushOutcome {
        let block_bytes = block.len() * pcm::BYTES_PER_SAMPLE;

        if self.byte_len + block_bytes <= self.max_bytes {
            self.append(block, block_bytes);
            return PushOutcome::Buffered;
        }

        if block_bytes > self.max_bytes {
            // Cannot ever fit: ship it together with whatever is pending
            self.append(block, block_bytes);
            return match self.flush() {
                Some(chunk) => PushOutcome::Overflow(chunk),
                None => PushOutcome::Buffered,
            };
        }

        let drained = self.flush();
        self.append(block, block_bytes);
        match drained {
            Some(chunk) => PushOutcome::Overflow(chunk),
            None => PushOutcome::Buffered,
        }
    }

    /// Drain every buffered block into one encoded chunk.
    ///
    /// Returns `None` when the buffer is empty. The buffer is cleared even
    /// when encoding fails.
    pub fn flush(&mut self) -> Option<io::Result<AudioChunk>> {
        if self.blocks.is_empty() {
            return None;
        }

        let blocks = std::mem::take(&mut self.blocks);
        let total_samples = self.byte_len / pcm::BYTES_PER_SAMPLE;
        self.byte_len = 0;

        let mut combined = Vec::with_capacity(total_samples);
        for block in &blocks {
            combined.extend_from_slice(block);
        }

        let bytes = pcm::samples_to_le_bytes(&combined);
        Some(
            pcm::encode_base64_chunked(&bytes, self.base64_step).map(|payload| AudioChunk {
                kind: ChunkKind::AudioData,
                payload,
                timestamp: chrono::Utc::now().timestamp_millis(),
            }),
        )
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn append(&mut self, block: Vec<i16>, block_bytes: usize) {
        if block.is_empty() {
            return;
        }
        self.byte_len += block_bytes;
        self.blocks.push(block);
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_BYTES, DEFAULT_BASE64_STEP)
    }
}
