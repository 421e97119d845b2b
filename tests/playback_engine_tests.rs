// Integration tests for the playback engine
//
// A recording audio host keeps every resource it creates so tests can drive
// lifecycle events by hand and inspect object URL bookkeeping.

use anyhow::{anyhow, bail, Result};
use futures::stream;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use talkback::playback::{AudioBlob, EndListener, ObjectUrl, ResourceEvent};
use talkback::{
    AudioError, AudioHost, AudioPayload, AudioResource, PlayOptions, PlaybackConfig,
    PlaybackEngine,
};
use tokio::sync::mpsc;

#[derive(Default)]
struct ResourceState {
    playing: bool,
    time: f64,
    volume: f32,
    looping: bool,
    play_calls: usize,
    ready_on_subscribe: bool,
    end_listeners: Vec<EndListener>,
    subscribers: Vec<mpsc::UnboundedSender<ResourceEvent>>,
}

type SharedResource = Arc<Mutex<ResourceState>>;

struct RecordedResource(SharedResource);

impl AudioResource for RecordedResource {
    fn play(&mut self) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.playing = true;
        state.play_calls += 1;
        Ok(())
    }

    fn pause(&mut self) {
        self.0.lock().unwrap().playing = false;
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.0.lock().unwrap().time = seconds;
    }

    fn current_time(&self) -> f64 {
        self.0.lock().unwrap().time
    }

    fn set_volume(&mut self, volume: f32) {
        self.0.lock().unwrap().volume = volume;
    }

    fn volume(&self) -> f32 {
        self.0.lock().unwrap().volume
    }

    fn set_looping(&mut self, looping: bool) {
        self.0.lock().unwrap().looping = looping;
    }

    fn looping(&self) -> bool {
        self.0.lock().unwrap().looping
    }

    fn once_ended(&mut self, listener: EndListener) {
        self.0.lock().unwrap().end_listeners.push(listener);
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ResourceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.0.lock().unwrap();
        if state.ready_on_subscribe {
            let _ = tx.send(ResourceEvent::CanPlayThrough);
        }
        state.subscribers.push(tx);
        rx
    }
}

impl Drop for RecordedResource {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.end_listeners.clear();
        state.subscribers.clear();
    }
}

#[derive(Default)]
struct HostState {
    resources: HashMap<String, SharedResource>,
    blobs: HashMap<String, Vec<u8>>,
    created: Vec<String>,
    revoked: Vec<String>,
    broken: HashSet<String>,
    /// Leave new resources buffering until a test emits CanPlayThrough
    hold_ready: bool,
}

#[derive(Clone, Default)]
struct RecordingHost(Arc<Mutex<HostState>>);

impl RecordingHost {
    fn state(&self) -> MutexGuard<'_, HostState> {
        self.0.lock().unwrap()
    }

    fn resource(&self, url: &str) -> SharedResource {
        Arc::clone(&self.state().resources[url])
    }

    fn is_revoked(&self, url: &str) -> bool {
        self.state().revoked.iter().any(|u| u == url)
    }

    /// Wait until the `n`th object URL exists and its resource is playing
    async fn playing_url(&self, n: usize) -> String {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let found = {
                    let state = self.state();
                    state.created.get(n).and_then(|url| {
                        let playing = state.resources.get(url)?.lock().unwrap().playing;
                        playing.then(|| url.clone())
                    })
                };
                if let Some(url) = found {
                    return url;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("dynamic audio never started")
    }

    /// Wait until the `n`th object URL has a resource listening for events
    async fn subscribed_url(&self, n: usize) -> String {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let found = {
                    let state = self.state();
                    state.created.get(n).and_then(|url| {
                        let resource = state.resources.get(url)?.lock().unwrap();
                        (!resource.subscribers.is_empty()).then(|| url.clone())
                    })
                };
                if let Some(url) = found {
                    return url;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("dynamic audio never subscribed")
    }

    fn emit(&self, url: &str, event: ResourceEvent) {
        let resource = self.resource(url);
        let (listeners, subscribers) = {
            let mut state = resource.lock().unwrap();
            state.playing = false;
            let listeners = if event == ResourceEvent::Ended {
                std::mem::take(&mut state.end_listeners)
            } else {
                Vec::new()
            };
            (listeners, state.subscribers.clone())
        };
        for listener in listeners {
            listener();
        }
        for subscriber in subscribers {
            let _ = subscriber.send(event.clone());
        }
    }
}

#[async_trait::async_trait]
impl AudioHost for RecordingHost {
    type Resource = RecordedResource;

    async fn load(&self, url: &str) -> Result<RecordedResource> {
        let mut state = self.state();
        if state.broken.contains(url) {
            bail!("404 Not Found");
        }
        if url.starts_with("blob:") && !state.blobs.contains_key(url) {
            bail!("object URL revoked");
        }

        let shared = Arc::new(Mutex::new(ResourceState {
            volume: 1.0,
            ready_on_subscribe: !state.hold_ready,
            ..ResourceState::default()
        }));
        state.resources.insert(url.to_string(), Arc::clone(&shared));
        Ok(RecordedResource(shared))
    }

    fn create_object_url(&self, blob: AudioBlob) -> Result<ObjectUrl> {
        let mut state = self.state();
        let url = format!("blob:test/{}", state.created.len());
        state.blobs.insert(url.clone(), blob.bytes);
        state.created.push(url.clone());
        Ok(ObjectUrl::new(url))
    }

    fn revoke_object_url(&self, url: &ObjectUrl) {
        let mut state = self.state();
        state.blobs.remove(url.as_str());
        state.revoked.push(url.to_string());
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn engine_with(config: PlaybackConfig) -> (RecordingHost, Arc<PlaybackEngine<RecordingHost>>) {
    let host = RecordingHost::default();
    let engine = Arc::new(PlaybackEngine::new(host.clone(), config));
    (host, engine)
}

async fn catalog_engine() -> (RecordingHost, Arc<PlaybackEngine<RecordingHost>>) {
    let (host, engine) = engine_with(PlaybackConfig::default());
    let loaded = engine
        .load_sounds([
            ("footstep", "assets/sounds/footstep.mp3"),
            ("jump", "assets/sounds/jump.mp3"),
            ("backgroundSound", "assets/sounds/backgroundmusic.mp3"),
        ])
        .await;
    assert_eq!(loaded, 3);
    (host, engine)
}

fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    (count, move || {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

// ============================================================================
// Catalog
// ============================================================================

#[tokio::test]
async fn test_failed_load_leaves_entry_absent() {
    let (host, engine) = engine_with(PlaybackConfig::default());
    host.state().broken.insert("assets/sounds/missing.mp3".to_string());

    let loaded = engine
        .load_sounds([
            ("jump", "assets/sounds/jump.mp3"),
            ("missing", "assets/sounds/missing.mp3"),
        ])
        .await;
    assert_eq!(loaded, 1);
    assert!(engine.has_sound("jump"));
    assert!(!engine.has_sound("missing"));

    let result = engine.load_sound("missing", "assets/sounds/missing.mp3").await;
    assert!(matches!(result, Err(AudioError::SoundLoad { ref id, .. }) if id == "missing"));
}

#[tokio::test]
async fn test_unknown_sound_is_reported_and_changes_nothing() {
    let (_host, engine) = catalog_engine().await;
    engine.play_sound("footstep", PlayOptions::new().looping(true)).unwrap();

    let result = engine.play_sound("nope", PlayOptions::new().looping(true));

    assert!(matches!(result, Err(AudioError::SoundNotFound(ref id)) if id == "nope"));
    assert_eq!(engine.looping_count(), 1);
    assert!(!engine.is_playing("nope"));
}

#[tokio::test]
async fn test_play_sound_restarts_from_beginning() {
    let (host, engine) = catalog_engine().await;
    let jump = host.resource("assets/sounds/jump.mp3");
    jump.lock().unwrap().time = 1.5;

    engine.play_sound("jump", PlayOptions::new()).unwrap();

    let state = jump.lock().unwrap();
    assert!(state.playing);
    assert_eq!(state.time, 0.0);
    assert_eq!(state.volume, 1.0);
    assert!(!state.looping);
}

#[tokio::test]
async fn test_volume_is_clamped() {
    let (host, engine) = catalog_engine().await;

    engine.play_sound("jump", PlayOptions::new().volume(5.0)).unwrap();
    assert_eq!(engine.volume("jump"), Some(1.0));

    engine.set_volume("jump", -1.0);
    assert_eq!(engine.volume("jump"), Some(0.0));

    engine.set_volume("jump", 0.4);
    assert_eq!(host.resource("assets/sounds/jump.mp3").lock().unwrap().volume, 0.4);

    // Unknown ids are ignored
    engine.set_volume("nope", 0.5);
    assert_eq!(engine.volume("nope"), None);
}

#[tokio::test]
async fn test_looping_set_tracks_stop() {
    let (host, engine) = catalog_engine().await;

    engine.play_sound("footstep", PlayOptions::new().looping(true)).unwrap();
    engine.play_sound("jump", PlayOptions::new()).unwrap();
    assert!(engine.is_playing("footstep"));
    assert!(!engine.is_playing("jump"), "One-shot sounds are not tracked");

    engine.stop_sound("footstep");
    assert!(!engine.is_playing("footstep"));
    let footstep = host.resource("assets/sounds/footstep.mp3");
    assert!(!footstep.lock().unwrap().playing);
    assert_eq!(footstep.lock().unwrap().time, 0.0);

    engine.stop_sound("nope");
}

#[tokio::test]
async fn test_catalog_end_listener() {
    let (host, engine) = catalog_engine().await;
    let (ended, on_end) = counter();

    engine.play_sound("jump", PlayOptions::new().on_end(on_end)).unwrap();
    host.emit("assets/sounds/jump.mp3", ResourceEvent::Ended);
    host.emit("assets/sounds/jump.mp3", ResourceEvent::Ended);

    assert_eq!(ended.load(Ordering::SeqCst), 1, "Listener fires once");
}

#[tokio::test]
async fn test_background_sound_helpers() {
    let (host, engine) = catalog_engine().await;
    let background = host.resource("assets/sounds/backgroundmusic.mp3");

    engine.manage_background_sound(true, 0.3);
    engine.manage_background_sound(true, 0.9);

    assert!(engine.is_playing("backgroundSound"));
    assert_eq!(background.lock().unwrap().play_calls, 1, "Already running");
    assert!(background.lock().unwrap().looping);
    assert_eq!(engine.volume("backgroundSound"), Some(0.3));

    engine.adjust_background_volume(0.7);
    assert_eq!(engine.volume("backgroundSound"), Some(0.7));

    engine.manage_background_sound(false, 0.0);
    assert!(!engine.is_playing("backgroundSound"));
    assert!(!background.lock().unwrap().playing);
}

// ============================================================================
// Dynamic audio
// ============================================================================

#[tokio::test]
async fn test_dynamic_audio_completes() -> Result<()> {
    let (host, engine) = engine_with(PlaybackConfig::default());

    let revoked_before_callback = Arc::new(Mutex::new(None));
    let task = {
        let engine = Arc::clone(&engine);
        let host = host.clone();
        let seen = Arc::clone(&revoked_before_callback);
        tokio::spawn(async move {
            let options = PlayOptions::new().volume(0.0).on_end(move || {
                *seen.lock().unwrap() = Some(host.is_revoked("blob:test/0"));
            });
            engine.play_dynamic_audio(vec![1u8, 2, 3], options).await
        })
    };

    let url = host.playing_url(0).await;
    assert!(engine.is_dynamic_active());
    assert_eq!(host.state().blobs[&url], vec![1, 2, 3]);
    // Zero is a real volume, not "unset"
    assert_eq!(host.resource(&url).lock().unwrap().volume, 0.0);

    host.emit(&url, ResourceEvent::Ended);

    assert!(task.await??);
    assert_eq!(*revoked_before_callback.lock().unwrap(), Some(true));
    assert!(!engine.is_dynamic_active());

    Ok(())
}

#[tokio::test]
async fn test_dynamic_audio_waits_for_can_play_through() -> Result<()> {
    let (host, engine) = engine_with(PlaybackConfig::default());
    host.state().hold_ready = true;

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.play_dynamic_audio(vec![4u8, 2], PlayOptions::new()).await })
    };

    let url = host.subscribed_url(0).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.is_dynamic_active());
    assert_eq!(host.resource(&url).lock().unwrap().play_calls, 0, "Still buffering");

    host.emit(&url, ResourceEvent::CanPlayThrough);
    assert_eq!(host.playing_url(0).await, url);
    assert_eq!(host.resource(&url).lock().unwrap().play_calls, 1);

    host.emit(&url, ResourceEvent::Ended);
    assert!(task.await??);
    assert!(host.is_revoked(&url));

    Ok(())
}

#[tokio::test]
async fn test_new_request_preempts_previous() -> Result<()> {
    let (host, engine) = engine_with(PlaybackConfig::default());
    let (first_ended, first_on_end) = counter();
    let (second_ended, second_on_end) = counter();

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .play_dynamic_audio(vec![1u8], PlayOptions::new().on_end(first_on_end))
                .await
        })
    };
    let first_url = host.playing_url(0).await;

    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .play_dynamic_audio(vec![2u8], PlayOptions::new().on_end(second_on_end))
                .await
        })
    };
    let second_url = host.playing_url(1).await;

    assert!(!first.await??, "Preempted request resolves as not completed");
    assert!(host.is_revoked(&first_url));
    assert!(!host.resource(&first_url).lock().unwrap().playing);

    // A late event for the old resource must not disturb the new one
    host.emit(&first_url, ResourceEvent::Ended);
    assert!(engine.is_dynamic_active());

    host.emit(&second_url, ResourceEvent::Ended);
    assert!(second.await??);

    assert_eq!(first_ended.load(Ordering::SeqCst), 0);
    assert_eq!(second_ended.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_playback_error_cleans_up() -> Result<()> {
    let (host, engine) = engine_with(PlaybackConfig::default());
    let (ended, on_end) = counter();

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .play_dynamic_audio(vec![0u8; 16], PlayOptions::new().on_end(on_end))
                .await
        })
    };
    let url = host.playing_url(0).await;

    host.emit(&url, ResourceEvent::Error("MEDIA_ERR_DECODE".to_string()));

    let result = task.await?;
    assert!(matches!(result, Err(AudioError::Playback(ref m)) if m.contains("MEDIA_ERR_DECODE")));
    assert!(host.is_revoked(&url));
    assert!(!engine.is_dynamic_active());
    assert_eq!(ended.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_cleanup_is_idempotent_and_cancels() -> Result<()> {
    let (host, engine) = engine_with(PlaybackConfig::default());

    engine.cleanup_dynamic_audio();

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.play_dynamic_audio(vec![9u8], PlayOptions::new()).await })
    };
    let url = host.playing_url(0).await;

    engine.cleanup_dynamic_audio();
    engine.cleanup_dynamic_audio();

    assert!(!task.await??);
    assert!(!engine.is_dynamic_active());
    assert_eq!(host.state().revoked.iter().filter(|u| **u == url).count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_stream_payload_is_buffered_in_order() -> Result<()> {
    let (host, engine) = engine_with(PlaybackConfig::default());

    let payload = AudioPayload::from_stream(stream::iter(vec![
        Ok(vec![1u8, 2]),
        Ok(vec![]),
        Ok(vec![3u8, 4, 5]),
    ]));

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.play_dynamic_audio(payload, PlayOptions::new()).await })
    };
    let url = host.playing_url(0).await;
    assert_eq!(host.state().blobs[&url], vec![1, 2, 3, 4, 5]);

    host.emit(&url, ResourceEvent::Ended);
    assert!(task.await??);

    Ok(())
}

#[tokio::test]
async fn test_stream_failure_creates_nothing() {
    let (host, engine) = engine_with(PlaybackConfig::default());

    let payload = AudioPayload::from_stream(stream::iter(vec![
        Ok(vec![1u8, 2]),
        Err(anyhow!("connection reset")),
    ]));

    let result = engine.play_dynamic_audio(payload, PlayOptions::new()).await;

    assert!(matches!(result, Err(AudioError::StreamRead(_))));
    assert!(host.state().created.is_empty());
    assert!(!engine.is_dynamic_active());
}

#[tokio::test]
async fn test_oversized_payload_is_rejected() {
    let config = PlaybackConfig {
        max_dynamic_bytes: 4,
        ..PlaybackConfig::default()
    };
    let (host, engine) = engine_with(config);

    let result = engine.play_dynamic_audio(vec![0u8; 5], PlayOptions::new()).await;

    assert!(matches!(result, Err(AudioError::PayloadTooLarge { limit: 4 })));
    assert!(host.state().created.is_empty());
}

#[tokio::test]
async fn test_stop_all_sounds_covers_everything() -> Result<()> {
    let (host, engine) = catalog_engine().await;
    engine.play_sound("footstep", PlayOptions::new().looping(true)).unwrap();
    engine.manage_background_sound(true, 0.3);

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.play_dynamic_audio(vec![7u8], PlayOptions::new()).await })
    };
    host.playing_url(0).await;

    engine.cleanup();

    assert_eq!(engine.looping_count(), 0);
    assert!(!task.await??);
    assert!(!engine.is_dynamic_active());
    assert!(!host.resource("assets/sounds/footstep.mp3").lock().unwrap().playing);
    // Catalog entries survive a stop
    assert!(engine.has_sound("footstep"));

    Ok(())
}
