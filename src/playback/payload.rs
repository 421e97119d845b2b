use anyhow::Result;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;

use crate::error::AudioError;

/// Response audio handed to the engine
pub enum AudioPayload {
    /// Fully buffered bytes
    Bytes(Vec<u8>),
    /// Pull-based byte stream, drained to completion before playback
    Stream(BoxStream<'static, Result<Vec<u8>>>),
}

impl AudioPayload {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Collapse the payload into one contiguous buffer of at most `limit` bytes
    pub async fn into_bytes(self, limit: usize) -> Result<Vec<u8>, AudioError> {
        match self {
            Self::Bytes(bytes) => {
                if bytes.len() > limit {
                    return Err(AudioError::PayloadTooLarge { limit });
                }
                Ok(bytes)
            }
            Self::Stream(mut stream) => {
                let mut chunks = Vec::new();
                let mut total = 0usize;

                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(AudioError::stream_read)?;
                    total += chunk.len();
                    if total > limit {
                        return Err(AudioError::PayloadTooLarge { limit });
                    }
                    chunks.push(chunk);
                }

                let mut bytes = Vec::with_capacity(total);
                for chunk in chunks {
                    bytes.extend_from_slice(&chunk);
                }
                Ok(bytes)
            }
        }
    }
}

impl From<Vec<u8>> for AudioPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl fmt::Debug for AudioPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}
