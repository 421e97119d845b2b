use anyhow::Result;
use std::fmt;
use tokio::sync::mpsc;

/// Callback fired once when a resource finishes playing
pub type EndListener = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle events reported by a playable resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// Enough data is available to play to the end without stalling
    CanPlayThrough,
    /// Playback reached the end (never fired while looping)
    Ended,
    /// Decoding or playback failed
    Error(String),
}

/// A playable audio resource
///
/// State accessors mirror a media element: position, volume and loop flag are
/// plain mutable properties.
pub trait AudioResource: Send + 'static {
    /// Start or resume playback
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn set_current_time(&mut self, seconds: f64);

    fn current_time(&self) -> f64;

    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;

    fn set_looping(&mut self, looping: bool);

    fn looping(&self) -> bool;

    /// Register a listener removed after the next `Ended`
    fn once_ended(&mut self, listener: EndListener);

    /// Receive every subsequent event. The channel closes when the resource is dropped.
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ResourceEvent>;
}

/// Bytes tagged with a media type, ready to be turned into an object URL
#[derive(Debug, Clone)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Revocable URL referring to an in-memory blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl(String);

impl ObjectUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output side of the host: creates resources and manages object URLs
#[async_trait::async_trait]
pub trait AudioHost: Send + Sync + 'static {
    type Resource: AudioResource;

    /// Create a resource for `url` (a file path, asset URL or object URL).
    /// Fetching and decoding must not block the calling task.
    async fn load(&self, url: &str) -> Result<Self::Resource>;

    fn create_object_url(&self, blob: AudioBlob) -> Result<ObjectUrl>;

    /// Release the blob behind `url`; unknown URLs are ignored
    fn revoke_object_url(&self, url: &ObjectUrl);

    /// Get host name for logging
    fn name(&self) -> &str;
}
