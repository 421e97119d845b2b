//! Microphone capture pipeline
//!
//! - `pcm`: float to 16-bit conversion and base64 transport encoding
//! - `processor`: real-time silence gate run on the host's audio thread
//! - `chunk`: bounded accumulation buffer and the outbound chunk shape
//! - `recorder`: session lifecycle (permission, start, flush, teardown)
//! - `file`: WAV file capture host

pub mod backend;
pub mod chunk;
pub mod file;
pub mod pcm;
pub mod processor;
pub mod recorder;
mod stats;

pub use backend::{
    BlockHandler, CaptureHost, GraphLayout, MicrophoneConstraints, MicrophoneStream,
    ProcessingGraph, StreamSettings,
};
pub use chunk::{AudioChunk, CaptureBuffer, ChunkKind, PushOutcome};
pub use file::{write_pcm_wav, AudioFile, WavCaptureHost};
pub use processor::FrameProcessor;
pub use recorder::{AudioRecorder, CaptureConfig, ChannelSink, FrameSink};
pub use stats::CaptureStats;
