use anyhow::Result;

/// Constraints used when requesting a microphone stream
#[derive(Debug, Clone, PartialEq)]
pub struct MicrophoneConstraints {
    /// Requested sample rate in Hz
    pub sample_rate: u32,
    /// Requested channel count (1 = mono)
    pub channels: u16,
    pub auto_gain_control: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl MicrophoneConstraints {
    /// Minimal request used to check for permission
    pub fn permission_check() -> Self {
        Self {
            sample_rate: 0,
            channels: 1,
            auto_gain_control: false,
            echo_cancellation: false,
            noise_suppression: false,
        }
    }
}

impl Default for MicrophoneConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // Recognition services expect 16kHz
            channels: 1,        // Mono
            auto_gain_control: true,
            // Raw signal works better for recognition than processed voice
            echo_cancellation: false,
            noise_suppression: false,
        }
    }
}

/// Settings a stream actually ended up with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Shape of the real-time processing graph: source -> gain -> frame processor
#[derive(Debug, Clone, PartialEq)]
pub struct GraphLayout {
    /// Processing context sample rate in Hz
    pub sample_rate: u32,
    /// Fixed amplification applied by the gain node
    pub gain: f32,
}

/// Per-block callback installed as the graph's frame processor.
///
/// Hosts invoke it from their real-time audio thread with one block of
/// post-gain mono samples. It never blocks.
pub type BlockHandler = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A live microphone stream made of one or more tracks
pub trait MicrophoneStream: Send + 'static {
    fn settings(&self) -> StreamSettings;

    /// Stop every track; must be idempotent
    fn stop_tracks(&mut self);
}

/// A running processing graph.
///
/// Teardown calls arrive in the order processor, gain, source, close. Once
/// `disconnect_processor` returns the block handler must not be invoked again.
/// It may block until an in-flight handler call returns, so it must not wait
/// on anything longer than one block.
pub trait ProcessingGraph: Send + 'static {
    /// Actual sample rate of the processing context
    fn sample_rate(&self) -> u32;

    fn disconnect_processor(&mut self);

    fn disconnect_gain(&mut self);

    fn disconnect_source(&mut self);

    /// Close the processing context
    fn close(&mut self);
}

/// Microphone acquisition plus a real-time processing host.
///
/// Implementations:
/// - `WavCaptureHost`: a WAV file stands in for the microphone (CLI, tests)
/// - Embedders provide their own for platform audio stacks
#[async_trait::async_trait]
pub trait CaptureHost: Send + Sync + 'static {
    type Stream: MicrophoneStream;
    type Graph: ProcessingGraph;

    /// Request a microphone stream. An error means access was refused or no
    /// device is available.
    async fn request_microphone(&self, constraints: &MicrophoneConstraints) -> Result<Self::Stream>;

    /// Wire source -> gain -> processor for `stream` and start delivering blocks
    /// to `processor`. On error the host must not keep any partially built nodes.
    async fn build_graph(
        &self,
        stream: &mut Self::Stream,
        layout: &GraphLayout,
        processor: BlockHandler,
    ) -> Result<Self::Graph>;

    /// Get host name for logging
    fn name(&self) -> &str;
}
