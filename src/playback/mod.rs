//! Sound effect and response audio playback
//!
//! The engine keeps a catalog of preloaded named sounds plus a single
//! dynamic slot for response audio. Output goes through an `AudioHost`;
//! `HeadlessAudioHost` is the bundled implementation.

mod engine;
mod headless;
mod options;
mod payload;
mod resource;

pub use engine::{PlaybackConfig, PlaybackEngine};
pub use headless::{HeadlessAudioHost, HeadlessResource};
pub use options::{clamp_volume, PlayOptions};
pub use payload::AudioPayload;
pub use resource::{AudioBlob, AudioHost, AudioResource, EndListener, ObjectUrl, ResourceEvent};
