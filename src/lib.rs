pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;

pub use audio::{
    AudioChunk, AudioRecorder, CaptureConfig, CaptureHost, CaptureStats, ChannelSink, FrameSink,
    WavCaptureHost,
};
pub use config::Config;
pub use error::AudioError;
pub use playback::{
    AudioHost, AudioPayload, AudioResource, HeadlessAudioHost, PlayOptions, PlaybackConfig,
    PlaybackEngine,
};
pub use session::{AudioSession, SessionConfig, SessionStats};
