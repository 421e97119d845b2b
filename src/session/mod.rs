//! Audio session composition
//!
//! `AudioSession` owns the recorder and the playback engine for the lifetime
//! of one game session, and is the host-facing entry point for the
//! record -> recognise -> respond round trip:
//! - `start_listening` / `stop_listening` drive the microphone
//! - `play_response` plays audio returned by the recognition service
//! - `play_effect` plays catalog sounds
//! - `shutdown` releases everything

mod config;
mod session;
mod stats;

pub use config::SessionConfig;
pub use session::AudioSession;
pub use stats::SessionStats;
