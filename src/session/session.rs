use super::config::SessionConfig;
use super::stats::SessionStats;
use crate::audio::{AudioRecorder, CaptureHost, FrameSink};
use crate::error::AudioError;
use crate::playback::{AudioHost, AudioPayload, PlayOptions, PlaybackEngine};
use chrono::Utc;
use tracing::info;

/// Recorder and playback engine for one game session
pub struct AudioSession<C: CaptureHost, P: AudioHost> {
    /// Session identifier used in logs and stats
    session_id: String,

    /// When the session was created
    started_at: chrono::DateTime<chrono::Utc>,

    recorder: AudioRecorder<C>,

    playback: PlaybackEngine<P>,
}

impl<C: CaptureHost, P: AudioHost> AudioSession<C, P> {
    /// Create a new session from explicitly constructed hosts
    pub fn new(capture_host: C, playback_host: P, config: SessionConfig) -> Self {
        info!("Creating audio session: {}", config.session_id);

        Self {
            session_id: config.session_id,
            started_at: Utc::now(),
            recorder: AudioRecorder::new(capture_host, config.capture),
            playback: PlaybackEngine::new(playback_host, config.playback),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn recorder(&self) -> &AudioRecorder<C> {
        &self.recorder
    }

    pub fn playback(&self) -> &PlaybackEngine<P> {
        &self.playback
    }

    /// Begin streaming microphone chunks to `sink`; `Ok(false)` if already listening
    pub async fn start_listening<S: FrameSink>(&self, sink: S) -> Result<bool, AudioError> {
        self.recorder.start_recording(sink).await
    }

    pub async fn stop_listening(&self) {
        self.recorder.stop_recording().await;
    }

    /// Play audio returned by the recognition service, preempting any previous response
    pub async fn play_response(
        &self,
        payload: impl Into<AudioPayload>,
        options: PlayOptions,
    ) -> Result<bool, AudioError> {
        self.playback.play_dynamic_audio(payload, options).await
    }

    pub fn play_effect(&self, id: &str, options: PlayOptions) -> Result<(), AudioError> {
        self.playback.play_sound(id, options)
    }

    /// Start or stop the background loop at the configured volume
    pub fn background_music(&self, on: bool) {
        let volume = self.playback.config().background_volume;
        self.playback.manage_background_sound(on, volume);
    }

    /// Get current session statistics
    pub fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);

        SessionStats {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            is_recording: self.recorder.is_active(),
            capture: self.recorder.stats(),
            dynamic_active: self.playback.is_dynamic_active(),
            looping_sounds: self.playback.looping_count(),
        }
    }

    /// Stop recording (with its final flush) and silence all playback
    pub async fn shutdown(&self) -> SessionStats {
        info!("Shutting down audio session: {}", self.session_id);

        self.recorder.stop_recording().await;
        self.playback.cleanup();

        self.stats()
    }
}
