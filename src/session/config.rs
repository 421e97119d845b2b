use crate::audio::CaptureConfig;
use crate::playback::PlaybackConfig;

/// Configuration for one game session's audio services
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "session-3f2a...")
    pub session_id: String,

    /// Microphone capture settings
    pub capture: CaptureConfig,

    /// Playback engine settings
    pub playback: PlaybackConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }
}
