use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::audio::CaptureConfig;
use crate::playback::PlaybackConfig;
use crate::session::SessionConfig;

/// Application configuration. Every field has a default, so any subset of
/// the file (or no file at all) is valid.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub capture: CaptureSettings,
    pub playback: PlaybackSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// One of trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "talkback".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub gain: f32,
    pub silence_threshold: f32,
    pub max_buffer_bytes: usize,
    pub base64_chunk_bytes: usize,
    /// Periodic flush; unset flushes only on overflow and stop
    pub flush_interval_ms: Option<u64>,
    /// Frames per processing block for file capture
    pub block_size: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let defaults = CaptureConfig::default();
        Self {
            sample_rate: defaults.sample_rate,
            gain: defaults.gain,
            silence_threshold: defaults.silence_threshold,
            max_buffer_bytes: defaults.max_buffer_bytes,
            base64_chunk_bytes: defaults.base64_step,
            flush_interval_ms: None,
            block_size: 128,
        }
    }
}

impl CaptureSettings {
    pub fn to_capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.sample_rate,
            gain: self.gain,
            silence_threshold: self.silence_threshold,
            max_buffer_bytes: self.max_buffer_bytes,
            base64_step: self.base64_chunk_bytes,
            flush_interval: self.flush_interval_ms.map(Duration::from_millis),
            ..CaptureConfig::default()
        }
    }
}

/// A catalog entry. Listed as an array of tables so ids keep their case.
#[derive(Debug, Clone, Deserialize)]
pub struct SoundEntry {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BackgroundSettings {
    pub id: String,
    pub volume: f32,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        let defaults = PlaybackConfig::default();
        Self {
            id: defaults.background_id,
            volume: defaults.background_volume,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub dynamic_mime: String,
    pub max_dynamic_bytes: usize,
    pub sounds: Vec<SoundEntry>,
    pub background: BackgroundSettings,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        let defaults = PlaybackConfig::default();
        Self {
            dynamic_mime: defaults.dynamic_mime,
            max_dynamic_bytes: defaults.max_dynamic_bytes,
            sounds: Vec::new(),
            background: BackgroundSettings::default(),
        }
    }
}

impl PlaybackSettings {
    pub fn to_playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            dynamic_mime: self.dynamic_mime.clone(),
            max_dynamic_bytes: self.max_dynamic_bytes,
            background_id: self.background.id.clone(),
            background_volume: self.background.volume,
        }
    }

    /// `(id, url)` pairs for `PlaybackEngine::load_sounds`
    pub fn manifest(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sounds.iter().map(|s| (s.id.as_str(), s.url.as_str()))
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Like `load`, but a missing file yields the defaults
    pub fn load_or_default(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            capture: self.capture.to_capture_config(),
            playback: self.playback.to_playback_config(),
            ..SessionConfig::default()
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        self.service
            .log_level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_capture_constants() {
        let config = Config::default();
        let capture = config.capture.to_capture_config();

        assert_eq!(capture, CaptureConfig::default());
        assert_eq!(capture.sample_rate, 16000);
        assert_eq!(capture.gain, 2.5);
        assert_eq!(capture.silence_threshold, 0.001);
        assert_eq!(capture.max_buffer_bytes, 1_048_576);
        assert_eq!(capture.base64_step, 8192);
        assert_eq!(config.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_load_partial_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("talkback.toml");
        let mut file = std::fs::File::create(&path)?;
        writeln!(
            file,
            r#"
[service]
log_level = "debug"

[capture]
flush_interval_ms = 250

[playback.background]
id = "backgroundSound"
volume = 0.2

[[playback.sounds]]
id = "footStep"
url = "assets/sounds/footstep.mp3"
"#
        )?;

        let config = Config::load(path.to_str().unwrap())?;

        assert_eq!(config.log_level(), tracing::Level::DEBUG);
        assert_eq!(config.service.name, "talkback");
        assert_eq!(
            config.capture.to_capture_config().flush_interval,
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.capture.gain, 2.5);
        let playback = config.playback.to_playback_config();
        assert_eq!(playback.background_id, "backgroundSound");
        assert_eq!(playback.background_volume, 0.2);

        let manifest: Vec<_> = config.playback.manifest().collect();
        assert_eq!(manifest, vec![("footStep", "assets/sounds/footstep.mp3")]);

        Ok(())
    }

    #[test]
    fn test_load_or_default_without_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("missing");

        let config = Config::load_or_default(path.to_str().unwrap())?;
        assert_eq!(config.playback.dynamic_mime, "audio/mpeg");
        assert_eq!(config.playback.to_playback_config(), PlaybackConfig::default());
        assert!(Config::load(path.to_str().unwrap()).is_err());

        Ok(())
    }
}
