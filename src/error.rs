use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the capture pipeline and the playback engine.
///
/// A second `start_recording` while a session is active is not an error; it
/// returns `Ok(false)`.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Microphone access was refused by the host
    #[error("microphone permission required")]
    PermissionDenied,

    /// Stream or processing-graph construction failed; all resources were released
    #[error("failed to set up audio capture: {0}")]
    SetupFailure(#[source] BoxError),

    /// Play requested for an id that was never registered
    #[error("sound '{0}' not found")]
    SoundNotFound(String),

    #[error("failed to load sound '{id}' from {url}: {source}")]
    SoundLoad {
        id: String,
        url: String,
        #[source]
        source: BoxError,
    },

    /// Dynamic audio failed to decode or play
    #[error("audio playback failed: {0}")]
    Playback(String),

    /// A streamed payload failed while being drained
    #[error("failed to read audio stream: {0}")]
    StreamRead(#[source] BoxError),

    #[error("audio payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl AudioError {
    pub(crate) fn setup(err: anyhow::Error) -> Self {
        Self::SetupFailure(err.into())
    }

    pub(crate) fn stream_read(err: anyhow::Error) -> Self {
        Self::StreamRead(err.into())
    }
}

pub type Result<T, E = AudioError> = std::result::Result<T, E>;
