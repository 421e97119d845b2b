//! Silent audio output
//!
//! Decodes each resource with symphonia to learn its duration, then models
//! media-element timing with tokio timers: `CanPlayThrough` once decoded,
//! `Ended` when the clock reaches the end, restart on loop. Useful on servers,
//! in CI and for the CLI, where there is no sound device.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::options::clamp_volume;
use super::resource::{AudioBlob, AudioHost, AudioResource, EndListener, ObjectUrl, ResourceEvent};

const OBJECT_URL_PREFIX: &str = "blob:talkback/";

/// Shortest loop period, so zero-length loops do not spin
const MIN_LOOP_PERIOD: Duration = Duration::from_millis(10);

struct Blob {
    bytes: Arc<Vec<u8>>,
    mime: String,
}

/// Audio host with no output device
pub struct HeadlessAudioHost {
    runtime: Handle,
    blobs: Mutex<HashMap<String, Blob>>,
}

impl HeadlessAudioHost {
    /// Must be called from within a tokio runtime
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().context("Headless audio host requires a tokio runtime")?;
        Ok(Self::with_runtime(runtime))
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime,
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of object URLs not yet revoked
    pub fn live_object_urls(&self) -> usize {
        lock(&self.blobs).len()
    }

    fn resolve(&self, url: &str) -> Result<(Arc<Vec<u8>>, Hint)> {
        let mut hint = Hint::new();

        if url.starts_with(OBJECT_URL_PREFIX) {
            let blobs = lock(&self.blobs);
            let blob = blobs
                .get(url)
                .ok_or_else(|| anyhow!("Object URL {} has been revoked", url))?;
            hint.mime_type(&blob.mime);
            return Ok((Arc::clone(&blob.bytes), hint));
        }

        let path = Path::new(url);
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", url))?;
        Ok((Arc::new(bytes), hint))
    }
}

#[async_trait::async_trait]
impl AudioHost for HeadlessAudioHost {
    type Resource = HeadlessResource;

    async fn load(&self, url: &str) -> Result<HeadlessResource> {
        let (bytes, hint) = self.resolve(url)?;
        let duration = self
            .runtime
            .spawn_blocking(move || media_duration(bytes, &hint))
            .await
            .context("Audio decode task failed")?
            .with_context(|| format!("Failed to decode audio from {}", url))?;

        debug!("Loaded {} ({:.2}s)", url, duration.as_secs_f64());

        Ok(HeadlessResource {
            inner: Arc::new(Mutex::new(ResourceInner {
                duration,
                position: Duration::ZERO,
                started_at: None,
                volume: 1.0,
                looping: false,
                run: 0,
                end_listeners: Vec::new(),
                subscribers: Vec::new(),
            })),
            runtime: self.runtime.clone(),
        })
    }

    fn create_object_url(&self, blob: AudioBlob) -> Result<ObjectUrl> {
        let url = format!("{}{}", OBJECT_URL_PREFIX, Uuid::new_v4());
        lock(&self.blobs).insert(
            url.clone(),
            Blob {
                bytes: Arc::new(blob.bytes),
                mime: blob.mime,
            },
        );
        Ok(ObjectUrl::new(url))
    }

    fn revoke_object_url(&self, url: &ObjectUrl) {
        lock(&self.blobs).remove(url.as_str());
    }

    fn name(&self) -> &str {
        "headless"
    }
}

struct ResourceInner {
    duration: Duration,
    /// Position at the last start, pause or seek
    position: Duration,
    /// Set while the clock runs
    started_at: Option<Instant>,
    volume: f32,
    looping: bool,
    /// Incremented whenever a pending end timer must be ignored
    run: u64,
    end_listeners: Vec<EndListener>,
    subscribers: Vec<mpsc::UnboundedSender<ResourceEvent>>,
}

impl ResourceInner {
    fn current_position(&self) -> Duration {
        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        (self.position + elapsed).min(self.duration)
    }
}

/// A decoded resource whose playback is only simulated
pub struct HeadlessResource {
    inner: Arc<Mutex<ResourceInner>>,
    runtime: Handle,
}

impl HeadlessResource {
    pub fn duration(&self) -> Duration {
        lock(&self.inner).duration
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner).started_at.is_none()
    }

    /// Start the end-of-media timer for the current run
    fn schedule_end(&self, inner: &mut ResourceInner) {
        inner.run += 1;
        let run = inner.run;
        let first_wait = inner.duration.saturating_sub(inner.position);
        let weak = Arc::downgrade(&self.inner);

        self.runtime.spawn(run_clock(weak, run, first_wait));
    }
}

async fn run_clock(inner: Weak<Mutex<ResourceInner>>, run: u64, first_wait: Duration) {
    let mut wait = first_wait;
    loop {
        tokio::time::sleep(wait).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut state = lock(&inner);
        if state.run != run {
            return;
        }

        if state.looping {
            state.position = Duration::ZERO;
            state.started_at = Some(Instant::now());
            wait = state.duration.max(MIN_LOOP_PERIOD);
            continue;
        }

        state.started_at = None;
        state.position = state.duration;
        let listeners = std::mem::take(&mut state.end_listeners);
        let subscribers = state.subscribers.clone();
        drop(state);

        for listener in listeners {
            listener();
        }
        for subscriber in subscribers {
            let _ = subscriber.send(ResourceEvent::Ended);
        }
        return;
    }
}

impl AudioResource for HeadlessResource {
    fn play(&mut self) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.started_at.is_some() {
            return Ok(());
        }

        if inner.position >= inner.duration {
            inner.position = Duration::ZERO;
        }
        inner.started_at = Some(Instant::now());
        self.schedule_end(&mut inner);
        Ok(())
    }

    fn pause(&mut self) {
        let mut inner = lock(&self.inner);
        if inner.started_at.is_some() {
            inner.position = inner.current_position();
            inner.started_at = None;
            inner.run += 1;
        }
    }

    fn set_current_time(&mut self, seconds: f64) {
        let mut inner = lock(&self.inner);
        let target = Duration::from_secs_f64(seconds.max(0.0)).min(inner.duration);
        inner.position = target;

        if inner.started_at.is_some() {
            inner.started_at = Some(Instant::now());
            self.schedule_end(&mut inner);
        }
    }

    fn current_time(&self) -> f64 {
        lock(&self.inner).current_position().as_secs_f64()
    }

    fn set_volume(&mut self, volume: f32) {
        lock(&self.inner).volume = clamp_volume(volume);
    }

    fn volume(&self) -> f32 {
        lock(&self.inner).volume
    }

    fn set_looping(&mut self, looping: bool) {
        lock(&self.inner).looping = looping;
    }

    fn looping(&self) -> bool {
        lock(&self.inner).looping
    }

    fn once_ended(&mut self, listener: EndListener) {
        lock(&self.inner).end_listeners.push(listener);
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ResourceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Fully decoded at load time
        let _ = tx.send(ResourceEvent::CanPlayThrough);
        lock(&self.inner).subscribers.push(tx);
        rx
    }
}

impl Drop for HeadlessResource {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        inner.run += 1;
        inner.started_at = None;
        inner.end_listeners.clear();
        inner.subscribers.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Duration of the default track, from the container header when present,
/// otherwise by decoding every packet.
fn media_duration(bytes: Arc<Vec<u8>>, hint: &Hint) -> Result<Duration> {
    let source = Cursor::new(ArcBytes(bytes));
    let stream = MediaSourceStream::new(Box::new(source), Default::default());

    let detected = symphonia::default::get_probe()
        .format(hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .context("Unsupported audio format")?;
    let mut format = detected.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No audio track found"))?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| anyhow!("Audio track has no sample rate"))?;

    if let Some(frames) = params.n_frames {
        return Ok(Duration::from_secs_f64(frames as f64 / sample_rate as f64));
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    let mut frames = 0u64;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("Failed to read packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => frames += decoded.frames() as u64,
            // Corrupt frames are skipped, as players do
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(e).context("Failed to decode packet"),
        }
    }

    if frames == 0 {
        return Err(anyhow!("Audio contains no decodable frames"));
    }

    Ok(Duration::from_secs_f64(frames as f64 / sample_rate as f64))
}

/// Shared byte buffer usable as a symphonia media source
struct ArcBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}
