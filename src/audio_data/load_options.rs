use std::time::Duration;

/// How decoded channels are folded before the data becomes a [`Sound`](crate::reader::Sound).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonoMode {
    /// Keep the file's channel layout.
    #[default]
    Keep,
    /// Average all channels into one.
    Downmix,
    /// Keep only the given channel (0-indexed).
    Channel(usize),
}

/// Decoder options for [`load_audio_file`](super::load_audio_file).
///
/// Spatial playback through the binaural reader needs mono input, so files
/// meant for it are usually loaded with [`MonoMode::Downmix`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Resample to this rate after decoding (None = keep the file's rate)
    pub target_sample_rate: Option<u32>,
    pub mono: MonoMode,
    /// Stop decoding after this much audio (None = whole file)
    pub max_duration: Option<Duration>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_sample_rate(mut self, rate: u32) -> Self {
        self.target_sample_rate = Some(rate);
        self
    }

    pub fn mono(mut self, mode: MonoMode) -> Self {
        self.mono = mode;
        self
    }

    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }
}
