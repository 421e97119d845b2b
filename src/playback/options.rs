use std::fmt;

use super::resource::EndListener;

/// Options accepted by both catalog and dynamic playback
///
/// `looping` only applies to catalog sounds. Volume is clamped to [0, 1];
/// catalog sounds default to full volume, dynamic audio keeps the resource's
/// own volume when none is given.
#[derive(Default)]
pub struct PlayOptions {
    pub looping: bool,
    pub volume: Option<f32>,
    pub on_end: Option<EndListener>,
}

impl PlayOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn on_end(mut self, listener: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(listener));
        self
    }
}

impl fmt::Debug for PlayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayOptions")
            .field("looping", &self.looping)
            .field("volume", &self.volume)
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

/// Clamp a volume to the [0, 1] range; NaN becomes silence
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, 1.0)
}
