use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use super::options::{clamp_volume, PlayOptions};
use super::payload::AudioPayload;
use super::resource::{AudioBlob, AudioHost, AudioResource, ObjectUrl, ResourceEvent};
use crate::error::AudioError;

/// Playback engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Media type given to dynamic audio blobs
    pub dynamic_mime: String,
    /// Largest dynamic payload accepted, in bytes
    pub max_dynamic_bytes: usize,
    /// Catalog id used for background music
    pub background_id: String,
    /// Volume the background loop starts at
    pub background_volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            dynamic_mime: "audio/mpeg".to_string(),
            max_dynamic_bytes: 32 * 1024 * 1024,
            background_id: "backgroundSound".to_string(),
            background_volume: 0.3,
        }
    }
}

/// The single in-flight response playback
struct DynamicAudioHandle<R> {
    generation: u64,
    resource: R,
    url: ObjectUrl,
}

struct EngineState<R> {
    sounds: HashMap<String, R>,
    looping: HashSet<String>,
    dynamic: Option<DynamicAudioHandle<R>>,
    /// Bumped by every dynamic request and cleanup; older requests become stale
    generation: u64,
}

/// Plays named sound effects from a catalog plus one dynamic response slot
///
/// All methods are non-blocking. The state lock is never held across an
/// await point, and listeners run outside of it.
pub struct PlaybackEngine<H: AudioHost> {
    host: H,
    config: PlaybackConfig,
    state: Mutex<EngineState<H::Resource>>,
}

impl<H: AudioHost> PlaybackEngine<H> {
    pub fn new(host: H, config: PlaybackConfig) -> Self {
        info!("Playback engine initialized: {}", host.name());

        Self {
            host,
            config,
            state: Mutex::new(EngineState {
                sounds: HashMap::new(),
                looping: HashSet::new(),
                dynamic: None,
                generation: 0,
            }),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, EngineState<H::Resource>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Create and register a resource under `id`, replacing any previous entry.
    ///
    /// On failure the entry stays absent and later plays report not found.
    pub async fn load_sound(&self, id: &str, url: &str) -> Result<(), AudioError> {
        match self.host.load(url).await {
            Ok(resource) => {
                self.state().sounds.insert(id.to_string(), resource);
                debug!("Loaded sound '{}' from {}", id, url);
                Ok(())
            }
            Err(e) => {
                error!("Failed to load sound '{}' from URL: {}: {:#}", id, url, e);
                Err(AudioError::SoundLoad {
                    id: id.to_string(),
                    url: url.to_string(),
                    source: e.into(),
                })
            }
        }
    }

    /// Load a manifest of sounds, returning how many loaded
    pub async fn load_sounds<I, K, V>(&self, manifest: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut loaded = 0;
        let mut failed = 0;
        for (id, url) in manifest {
            match self.load_sound(id.as_ref(), url.as_ref()).await {
                Ok(()) => loaded += 1,
                Err(_) => failed += 1,
            }
        }

        if failed > 0 {
            error!("Error loading sounds: {} of {} failed", failed, loaded + failed);
        } else {
            info!("Loaded {} sounds", loaded);
        }
        loaded
    }

    pub fn has_sound(&self, id: &str) -> bool {
        self.state().sounds.contains_key(id)
    }

    /// Restart a catalog sound from the beginning.
    ///
    /// Unknown ids are a logged no-op reported as `SoundNotFound`. A failing
    /// platform `play()` is logged and otherwise ignored.
    pub fn play_sound(&self, id: &str, options: PlayOptions) -> Result<(), AudioError> {
        let mut guard = self.state();
        let state = &mut *guard;

        let Some(sound) = state.sounds.get_mut(id) else {
            warn!("Sound {} not found", id);
            return Err(AudioError::SoundNotFound(id.to_string()));
        };

        sound.set_looping(options.looping);
        sound.set_volume(clamp_volume(options.volume.unwrap_or(1.0)));

        if let Some(on_end) = options.on_end {
            sound.once_ended(on_end);
        }

        if options.looping {
            state.looping.insert(id.to_string());
        }

        sound.set_current_time(0.0);
        if let Err(e) = sound.play() {
            warn!("Error playing sound {}: {:#}", id, e);
        }

        Ok(())
    }

    /// Pause and rewind a catalog sound. No-op for unknown ids.
    pub fn stop_sound(&self, id: &str) {
        let mut guard = self.state();
        let state = &mut *guard;

        if let Some(sound) = state.sounds.get_mut(id) {
            sound.pause();
            sound.set_current_time(0.0);
            state.looping.remove(id);
        }
    }

    /// Stop every catalog sound and tear down dynamic playback
    pub fn stop_all_sounds(&self) {
        {
            let mut guard = self.state();
            let state = &mut *guard;
            for sound in state.sounds.values_mut() {
                sound.pause();
                sound.set_current_time(0.0);
            }
            state.looping.clear();
        }

        self.cleanup_dynamic_audio();
    }

    /// Set a catalog sound's volume, clamped to [0, 1]
    pub fn set_volume(&self, id: &str, volume: f32) {
        if let Some(sound) = self.state().sounds.get_mut(id) {
            sound.set_volume(clamp_volume(volume));
        }
    }

    pub fn volume(&self, id: &str) -> Option<f32> {
        self.state().sounds.get(id).map(|sound| sound.volume())
    }

    /// Whether `id` is currently in the looping set
    pub fn is_playing(&self, id: &str) -> bool {
        self.state().looping.contains(id)
    }

    pub fn looping_count(&self) -> usize {
        self.state().looping.len()
    }

    /// Start the background loop if it is not already running, or stop it
    pub fn manage_background_sound(&self, start: bool, volume: f32) {
        let id = self.config.background_id.as_str();
        if start {
            if !self.is_playing(id) {
                let _ = self.play_sound(id, PlayOptions::new().looping(true).volume(volume));
            }
        } else {
            self.stop_sound(id);
        }
    }

    pub fn adjust_background_volume(&self, volume: f32) {
        self.set_volume(&self.config.background_id, volume);
    }

    // ========================================================================
    // Dynamic audio
    // ========================================================================

    /// Play response audio in the dynamic slot, preempting whatever is there.
    ///
    /// The whole payload is buffered before a resource is created; playback
    /// starts once the resource can play through. Resolves `Ok(true)` after
    /// natural completion (cleanup first, then `on_end`), `Ok(false)` when a
    /// later request or a cleanup call took the slot, or an error after
    /// cleanup.
    pub async fn play_dynamic_audio(
        &self,
        source: impl Into<AudioPayload>,
        options: PlayOptions,
    ) -> Result<bool, AudioError> {
        let generation = self.begin_dynamic();

        let bytes = match source.into().into_bytes(self.config.max_dynamic_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Error playing dynamic audio: {}", e);
                self.release_dynamic(generation);
                return Err(e);
            }
        };

        if self.is_stale(generation) {
            debug!("Dynamic audio request {} superseded while buffering", generation);
            return Ok(false);
        }

        let byte_len = bytes.len();
        let url = self
            .host
            .create_object_url(AudioBlob {
                bytes,
                mime: self.config.dynamic_mime.clone(),
            })
            .map_err(|e| {
                error!("Error playing dynamic audio: {:#}", e);
                AudioError::Playback(format!("{:#}", e))
            })?;

        let mut resource = match self.host.load(url.as_str()).await {
            Ok(resource) => resource,
            Err(e) => {
                error!("Audio playback error: {:#}", e);
                self.host.revoke_object_url(&url);
                return Err(AudioError::Playback(format!("{:#}", e)));
            }
        };

        if let Some(volume) = options.volume {
            resource.set_volume(clamp_volume(volume));
        }

        let mut events = resource.subscribe();

        {
            let mut state = self.state();
            if state.generation != generation {
                drop(state);
                self.release(resource, &url);
                return Ok(false);
            }
            state.dynamic = Some(DynamicAudioHandle {
                generation,
                resource,
                url,
            });
        }

        debug!("Dynamic audio {} ready ({} bytes)", generation, byte_len);

        let mut on_end = options.on_end;
        while let Some(event) = events.recv().await {
            match event {
                ResourceEvent::CanPlayThrough => {
                    let started = {
                        let mut state = self.state();
                        match state.dynamic.as_mut() {
                            Some(handle) if handle.generation == generation => {
                                handle.resource.play()
                            }
                            _ => return Ok(false),
                        }
                    };

                    if let Err(e) = started {
                        error!("Play error: {:#}", e);
                        self.release_dynamic(generation);
                        return Err(AudioError::Playback(format!("{:#}", e)));
                    }
                }
                ResourceEvent::Ended => {
                    if !self.release_dynamic(generation) {
                        return Ok(false);
                    }
                    if let Some(on_end) = on_end.take() {
                        on_end();
                    }
                    return Ok(true);
                }
                ResourceEvent::Error(message) => {
                    if !self.release_dynamic(generation) {
                        return Ok(false);
                    }
                    error!("Audio playback error: {}", message);
                    return Err(AudioError::Playback(message));
                }
            }
        }

        // Event source went away: the resource was released by someone else
        Ok(false)
    }

    /// Release the dynamic slot. Safe to call at any time, including twice.
    pub fn cleanup_dynamic_audio(&self) {
        let handle = {
            let mut state = self.state();
            state.generation += 1;
            state.dynamic.take()
        };

        if let Some(handle) = handle {
            self.release(handle.resource, &handle.url);
        }
    }

    pub fn is_dynamic_active(&self) -> bool {
        self.state().dynamic.is_some()
    }

    /// Full teardown for scene or process shutdown
    pub fn cleanup(&self) {
        self.stop_all_sounds();
        self.cleanup_dynamic_audio();
    }

    /// Preempt the current slot and claim a new generation
    fn begin_dynamic(&self) -> u64 {
        let (generation, previous) = {
            let mut state = self.state();
            state.generation += 1;
            (state.generation, state.dynamic.take())
        };

        if let Some(previous) = previous {
            debug!("Preempting dynamic audio {}", previous.generation);
            self.release(previous.resource, &previous.url);
        }

        generation
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.state().generation != generation
    }

    /// Release the slot if it still belongs to `generation`
    fn release_dynamic(&self, generation: u64) -> bool {
        let handle = {
            let mut state = self.state();
            if state.generation != generation {
                return false;
            }
            state.dynamic.take()
        };

        if let Some(handle) = handle {
            self.release(handle.resource, &handle.url);
        }
        true
    }

    fn release(&self, mut resource: H::Resource, url: &ObjectUrl) {
        resource.pause();
        drop(resource);
        self.host.revoke_object_url(url);
    }
}
