use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::CaptureStats;

/// Statistics about an audio session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Session age in seconds
    pub duration_secs: f64,

    /// Whether the microphone is currently recording
    pub is_recording: bool,

    /// Capture counters since the session started
    pub capture: CaptureStats,

    /// Whether a response is currently occupying the dynamic slot
    pub dynamic_active: bool,

    /// Number of looping catalog sounds
    pub looping_sounds: usize,
}
