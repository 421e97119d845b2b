use anyhow::anyhow;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backend::{CaptureHost, GraphLayout, MicrophoneConstraints, MicrophoneStream, ProcessingGraph};
use super::chunk::{AudioChunk, CaptureBuffer, PushOutcome, DEFAULT_BASE64_STEP, DEFAULT_MAX_BUFFER_BYTES};
use super::processor::FrameProcessor;
use super::stats::{CaptureCounters, CaptureStats};
use crate::error::AudioError;

/// Capture pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Microphone and processing context sample rate
    pub sample_rate: u32,
    pub channels: u16,
    pub auto_gain_control: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    /// Fixed amplification applied before the frame processor
    pub gain: f32,
    /// Blocks whose peak amplitude is at or below this are dropped
    pub silence_threshold: f32,
    /// Accumulation buffer limit in bytes
    pub max_buffer_bytes: usize,
    /// Bytes fed to the base64 encoder per step
    pub base64_step: usize,
    /// Flush on a timer as well as on overflow and stop
    pub flush_interval: Option<Duration>,
}

impl CaptureConfig {
    pub fn constraints(&self) -> MicrophoneConstraints {
        MicrophoneConstraints {
            sample_rate: self.sample_rate,
            channels: self.channels,
            auto_gain_control: self.auto_gain_control,
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
        }
    }

    pub fn layout(&self) -> GraphLayout {
        GraphLayout {
            sample_rate: self.sample_rate,
            gain: self.gain,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let mic = MicrophoneConstraints::default();
        Self {
            sample_rate: mic.sample_rate,
            channels: mic.channels,
            auto_gain_control: mic.auto_gain_control,
            echo_cancellation: mic.echo_cancellation,
            noise_suppression: mic.noise_suppression,
            gain: 2.5,
            silence_threshold: 0.001,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            base64_step: DEFAULT_BASE64_STEP,
            flush_interval: None,
        }
    }
}

/// Destination for flushed chunks.
///
/// A failing sink never stops the pipeline: the error is logged and the
/// buffer is already clear for the next chunk.
pub trait FrameSink: Send + 'static {
    fn deliver(&mut self, chunk: AudioChunk) -> anyhow::Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(AudioChunk) -> anyhow::Result<()> + Send + 'static,
{
    fn deliver(&mut self, chunk: AudioChunk) -> anyhow::Result<()> {
        self(chunk)
    }
}

/// Sink that forwards chunks into a tokio channel
pub struct ChannelSink(pub mpsc::UnboundedSender<AudioChunk>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AudioChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&mut self, chunk: AudioChunk) -> anyhow::Result<()> {
        self.0
            .send(chunk)
            .map_err(|_| anyhow!("Chunk receiver was dropped"))
    }
}

/// The single active capture session
struct ActiveSession<H: CaptureHost> {
    id: Uuid,
    stream: H::Stream,
    graph: H::Graph,
    stop_tx: Option<oneshot::Sender<()>>,
    pump: JoinHandle<()>,
}

impl<H: CaptureHost> ActiveSession<H> {
    /// Ask the pump to drain and flush; later calls are no-ops
    fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    /// Release nodes downstream-first so no node outlives its consumer, then the tracks
    fn teardown(&mut self) {
        self.graph.disconnect_processor();
        self.graph.disconnect_gain();
        self.graph.disconnect_source();
        self.graph.close();
        self.stream.stop_tracks();
    }
}

/// Microphone recorder that streams base64 PCM chunks to a sink
///
/// At most one session is active at a time. Permission is checked once and
/// then cached for later sessions.
pub struct AudioRecorder<H: CaptureHost> {
    host: H,
    config: CaptureConfig,
    has_permission: AtomicBool,
    is_recording: AtomicBool,
    session: Mutex<Option<ActiveSession<H>>>,
    counters: Arc<CaptureCounters>,
}

impl<H: CaptureHost> AudioRecorder<H> {
    pub fn new(host: H, config: CaptureConfig) -> Self {
        info!(
            "Audio recorder initialized: {} ({}Hz, gain {}x, max buffer {} bytes)",
            host.name(),
            config.sample_rate,
            config.gain,
            config.max_buffer_bytes
        );

        Self {
            host,
            config,
            has_permission: AtomicBool::new(false),
            is_recording: AtomicBool::new(false),
            session: Mutex::new(None),
            counters: Arc::new(CaptureCounters::default()),
        }
    }

    /// Check microphone access and cache the result.
    ///
    /// The check stream is released immediately. Never fails; denial is `false`.
    pub async fn check_permissions(&self) -> bool {
        match self
            .host
            .request_microphone(&MicrophoneConstraints::permission_check())
            .await
        {
            Ok(mut stream) => {
                stream.stop_tracks();
                self.has_permission.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                error!("Microphone permission check failed: {:#}", e);
                self.has_permission.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Whether a previous check succeeded
    pub fn has_permission(&self) -> bool {
        self.has_permission.load(Ordering::SeqCst)
    }

    /// Forget a cached grant so the next start checks again
    pub fn invalidate_permission(&self) {
        self.has_permission.store(false, Ordering::SeqCst);
    }

    /// Start a capture session delivering chunks to `sink`
    ///
    /// Returns `Ok(false)` without touching the running session when one is
    /// already active.
    pub async fn start_recording<S: FrameSink>(&self, sink: S) -> Result<bool, AudioError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            warn!("Already recording");
            return Ok(false);
        }

        if !self.has_permission() && !self.check_permissions().await {
            return Err(AudioError::PermissionDenied);
        }

        let mut stream = self
            .host
            .request_microphone(&self.config.constraints())
            .await
            .map_err(|e| {
                error!("Failed to open microphone: {:#}", e);
                AudioError::setup(e.context("Failed to open microphone"))
            })?;

        let (block_tx, block_rx) = mpsc::unbounded_channel();
        let processor = FrameProcessor::new(
            self.config.silence_threshold,
            block_tx,
            Arc::clone(&self.counters),
        );

        let graph = match self
            .host
            .build_graph(&mut stream, &self.config.layout(), processor.into_handler())
            .await
        {
            Ok(graph) => graph,
            Err(e) => {
                error!("Error starting recording: {:#}", e);
                stream.stop_tracks();
                return Err(AudioError::setup(e.context("Failed to build processing graph")));
            }
        };

        let id = Uuid::new_v4();
        let settings = stream.settings();
        let (stop_tx, stop_rx) = oneshot::channel();
        let buffer = CaptureBuffer::new(self.config.max_buffer_bytes, self.config.base64_step);
        let pump = tokio::spawn(run_pump(
            block_rx,
            stop_rx,
            buffer,
            sink,
            Arc::clone(&self.counters),
            self.config.flush_interval,
        ));

        info!(
            "Recording started: session {} ({}Hz context, {}Hz/{}ch stream)",
            id,
            graph.sample_rate(),
            settings.sample_rate,
            settings.channels
        );

        *slot = Some(ActiveSession {
            id,
            stream,
            graph,
            stop_tx: Some(stop_tx),
            pump,
        });
        self.is_recording.store(true, Ordering::SeqCst);

        Ok(true)
    }

    /// Final flush, then full teardown. No-op when nothing is recording.
    pub async fn stop_recording(&self) {
        let mut slot = self.session.lock().await;
        let Some(mut session) = slot.take() else {
            return;
        };

        // The pump drains queued blocks and performs the final flush
        session.signal_stop();
        let pump = &mut session.pump;
        if let Err(e) = pump.await {
            error!("Capture pump for session {} panicked: {}", session.id, e);
        }

        session.teardown();
        self.is_recording.store(false, Ordering::SeqCst);

        info!("Recording stopped: session {}", session.id);
    }

    pub fn is_active(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }
}

impl<H: CaptureHost> Drop for AudioRecorder<H> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.get_mut().take() {
            warn!("Recorder dropped while session {} was active", session.id);
            // The detached pump still performs its final flush
            session.signal_stop();
            session.teardown();
        }
    }
}

/// Owns the accumulation buffer and the sink for one session
async fn run_pump<S: FrameSink>(
    mut block_rx: mpsc::UnboundedReceiver<Vec<i16>>,
    mut stop_rx: oneshot::Receiver<()>,
    mut buffer: CaptureBuffer,
    mut sink: S,
    counters: Arc<CaptureCounters>,
    flush_interval: Option<Duration>,
) {
    let mut ticker = flush_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            block = block_rx.recv() => match block {
                Some(block) => append_block(&mut buffer, block, &mut sink, &counters),
                None => break,
            },
            _ = next_tick(&mut ticker) => {
                if let Some(chunk) = buffer.flush() {
                    deliver(&mut sink, chunk, &counters);
                }
            }
        }
    }

    // Blocks already posted before the stop request belong to this session
    while let Ok(block) = block_rx.try_recv() {
        append_block(&mut buffer, block, &mut sink, &counters);
    }

    if let Some(chunk) = buffer.flush() {
        deliver(&mut sink, chunk, &counters);
    }

    debug!("Capture pump finished");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn append_block<S: FrameSink>(
    buffer: &mut CaptureBuffer,
    block: Vec<i16>,
    sink: &mut S,
    counters: &CaptureCounters,
) {
    if let PushOutcome::Overflow(chunk) = buffer.push(block) {
        counters.overflow_flushes.fetch_add(1, Ordering::Relaxed);
        debug!("Capture buffer reached {} bytes, flushing", buffer.max_bytes());
        deliver(sink, chunk, counters);
    }
}

fn deliver<S: FrameSink>(sink: &mut S, chunk: io::Result<AudioChunk>, counters: &CaptureCounters) {
    let chunk = match chunk {
        Ok(chunk) => chunk,
        Err(e) => {
            counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
            error!("Error flushing buffer: {}", e);
            return;
        }
    };

    let pcm_bytes = chunk.pcm_len();
    counters.chunks_delivered.fetch_add(1, Ordering::Relaxed);
    counters
        .bytes_delivered
        .fetch_add(pcm_bytes as u64, Ordering::Relaxed);

    if let Err(e) = sink.deliver(chunk) {
        counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
        error!("Error flushing buffer: {:#}", e);
    }
}
