use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backend::{
    BlockHandler, CaptureHost, GraphLayout, MicrophoneConstraints, MicrophoneStream,
    ProcessingGraph, StreamSettings,
};
use super::pcm;

/// A WAV file decoded to normalised float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`: channels are averaged, then the signal
    /// is decimated by the integer rate ratio.
    pub fn to_mono(&self, target_rate: u32) -> Result<Vec<f32>> {
        let channels = self.channels.max(1) as usize;
        let mono: Vec<f32> = if channels == 1 {
            self.samples.clone()
        } else {
            self.samples
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        if target_rate == 0 || self.sample_rate == target_rate {
            return Ok(mono);
        }

        if self.sample_rate < target_rate || self.sample_rate % target_rate != 0 {
            bail!(
                "Cannot convert {}Hz to {}Hz; use a rate that is a multiple of the target",
                self.sample_rate,
                target_rate
            );
        }

        let ratio = (self.sample_rate / target_rate) as usize;
        Ok(mono.into_iter().step_by(ratio).collect())
    }
}

/// Write 16-bit mono PCM to a WAV file
pub fn write_pcm_wav(path: impl AsRef<Path>, samples: &[i16], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .context("Failed to write sample to WAV")?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;

    Ok(())
}

/// Capture host that plays a WAV file into the pipeline as if it were a microphone.
///
/// Opening the file stands in for the permission prompt: a missing or
/// unreadable file is a denial. A worker thread drives the graph one block
/// at a time, optionally paced in real time.
pub struct WavCaptureHost {
    path: PathBuf,
    block_size: usize,
    realtime: bool,
    drained: Arc<watch::Sender<bool>>,
}

impl WavCaptureHost {
    pub fn new(path: impl Into<PathBuf>, block_size: usize, realtime: bool) -> Self {
        let (drained, _) = watch::channel(false);
        Self {
            path: path.into(),
            block_size: block_size.max(1),
            realtime,
            drained: Arc::new(drained),
        }
    }

    /// Resolves once the most recent graph has pushed the whole file
    pub async fn wait_drained(&self) {
        let mut rx = self.drained.subscribe();
        // Sender lives as long as self, so this only ends when drained
        let _ = rx.wait_for(|drained| *drained).await;
    }
}

pub struct WavStream {
    samples: Arc<Vec<f32>>,
    settings: StreamSettings,
    live: bool,
}

impl MicrophoneStream for WavStream {
    fn settings(&self) -> StreamSettings {
        self.settings
    }

    fn stop_tracks(&mut self) {
        self.live = false;
    }
}

pub struct WavGraph {
    sample_rate: u32,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ProcessingGraph for WavGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn disconnect_processor(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                warn!("WAV capture worker panicked");
            }
        }
    }

    fn disconnect_gain(&mut self) {}

    fn disconnect_source(&mut self) {}

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for WavGraph {
    fn drop(&mut self) {
        self.disconnect_processor();
    }
}

#[async_trait::async_trait]
impl CaptureHost for WavCaptureHost {
    type Stream = WavStream;
    type Graph = WavGraph;

    async fn request_microphone(&self, constraints: &MicrophoneConstraints) -> Result<WavStream> {
        let path = self.path.clone();
        let file = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .context("WAV loader task failed")??;

        let samples = file.to_mono(constraints.sample_rate)?;
        let sample_rate = if constraints.sample_rate == 0 {
            file.sample_rate
        } else {
            constraints.sample_rate
        };

        Ok(WavStream {
            samples: Arc::new(samples),
            settings: StreamSettings {
                sample_rate,
                channels: 1,
            },
            live: true,
        })
    }

    async fn build_graph(
        &self,
        stream: &mut WavStream,
        layout: &GraphLayout,
        mut processor: BlockHandler,
    ) -> Result<WavGraph> {
        if !stream.live {
            bail!("Microphone stream has already been stopped");
        }

        let samples = Arc::clone(&stream.samples);
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);
        let drained = Arc::clone(&self.drained);
        let block_size = self.block_size;
        let gain = layout.gain;
        let pace = if self.realtime && layout.sample_rate > 0 {
            Some(Duration::from_secs_f64(block_size as f64 / layout.sample_rate as f64))
        } else {
            None
        };

        drained.send_replace(false);

        let worker = thread::Builder::new()
            .name("wav-capture".to_string())
            .spawn(move || {
                let mut block = Vec::with_capacity(block_size);
                for part in samples.chunks(block_size) {
                    if !worker_running.load(Ordering::SeqCst) {
                        return;
                    }
                    block.clear();
                    block.extend_from_slice(part);
                    pcm::apply_gain(&mut block, gain);
                    processor(&block);

                    // disconnect_processor unparks the worker mid-pace
                    if let Some(pace) = pace {
                        let deadline = Instant::now() + pace;
                        while worker_running.load(Ordering::SeqCst) {
                            let now = Instant::now();
                            if now >= deadline {
                                break;
                            }
                            thread::park_timeout(deadline - now);
                        }
                    }
                }
                drained.send_replace(true);
            })
            .context("Failed to spawn capture worker")?;

        debug!(
            "WAV graph running: {} samples, {} per block, gain {}x",
            stream.samples.len(),
            block_size,
            gain
        );

        Ok(WavGraph {
            sample_rate: layout.sample_rate,
            running,
            worker: Some(worker),
        })
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}
