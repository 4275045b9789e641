mod load_options;
mod resampler;
mod symphonia_loader;

use crate::error::{ResonarError, Result};
use crate::reader::{clamp_frames, ReadResult, Reader, Sound};
use crate::specs::{Channels, Specs};
pub use load_options::{LoadOptions, MonoMode};
pub use resampler::AudioResampler;
use std::sync::Arc;
use std::time::Duration;

pub use symphonia_loader::{load_audio_file, load_audio_file_simple};

/// Decoded audio held in memory.
///
/// Cloning is cheap; the samples are shared. `AudioData` is a [`Sound`]:
/// every reader it creates plays the same shared samples from the start.
#[derive(Debug, Clone)]
pub struct AudioData {
    inner: Arc<AudioDataInner>,
}

#[derive(Debug)]
struct AudioDataInner {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: Channels,
    duration: Duration,
    total_frames: usize,
}

impl AudioData {
    /// Wraps interleaved samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: Channels) -> Result<Self> {
        if sample_rate == 0 {
            return Err(ResonarError::AudioFormat(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if samples.len() % channels.count() != 0 {
            return Err(ResonarError::AudioFormat(format!(
                "{} samples do not form whole {}-channel frames",
                samples.len(),
                channels.count()
            )));
        }
        let total_frames = samples.len() / channels.count();
        let duration = Duration::from_secs_f64(total_frames as f64 / sample_rate as f64);
        Ok(Self {
            inner: Arc::new(AudioDataInner {
                samples,
                sample_rate,
                channels,
                duration,
                total_frames,
            }),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn channels(&self) -> Channels {
        self.inner.channels
    }

    pub fn specs(&self) -> Specs {
        Specs::new(self.inner.sample_rate as f64, self.inner.channels)
    }

    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    pub fn samples(&self) -> &[f32] {
        &self.inner.samples
    }

    pub fn total_frames(&self) -> usize {
        self.inner.total_frames
    }

    pub fn is_empty(&self) -> bool {
        self.inner.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.samples.len()
    }

    /// Get samples for a specific channel (0-indexed)
    pub fn channel_samples(&self, channel: usize) -> Result<Vec<f32>> {
        let channels = self.inner.channels.count();
        if channel >= channels {
            return Err(ResonarError::AudioFormat(format!(
                "Channel {} out of range (max: {})",
                channel,
                channels - 1
            )));
        }

        Ok(self
            .inner
            .samples
            .chunks(channels)
            .map(|frame| frame[channel])
            .collect())
    }

    /// Convert to mono by downmixing all channels
    pub fn to_mono(&self) -> Result<Self> {
        let channels = self.inner.channels.count();
        if channels == 1 {
            return Ok(self.clone());
        }

        let mono_samples: Vec<f32> = self
            .inner
            .samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        Self::new(mono_samples, self.inner.sample_rate, Channels::Mono)
    }

    /// Resample to a different sample rate using rubato
    pub fn resample(&self, target_sample_rate: u32) -> Result<Self> {
        if target_sample_rate == self.inner.sample_rate {
            return Ok(self.clone());
        }

        let resampler = AudioResampler::new(
            self.inner.sample_rate,
            target_sample_rate,
            self.inner.channels.count(),
            Some(1024),
        )?;

        let resampled_samples = resampler.resample_interleaved(&self.inner.samples)?;
        Self::new(resampled_samples, target_sample_rate, self.inner.channels)
    }
}

impl Sound for AudioData {
    fn create_reader(&self) -> Result<Box<dyn Reader>> {
        Ok(Box::new(BufferReader {
            data: self.clone(),
            position: 0,
        }))
    }
}

/// Seekable reader over shared [`AudioData`].
pub struct BufferReader {
    data: AudioData,
    position: usize,
}

impl Reader for BufferReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, position: usize) -> bool {
        self.position = position.min(self.data.total_frames());
        true
    }

    fn length(&self) -> Option<usize> {
        Some(self.data.total_frames())
    }

    fn position(&self) -> usize {
        self.position
    }

    fn specs(&self) -> Specs {
        self.data.specs()
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let channels = self.data.channels().count();
        let remaining = self.data.total_frames() - self.position;
        let frames = clamp_frames(frames, buffer, channels).min(remaining);
        let start = self.position * channels;
        let end = start + frames * channels;
        buffer[..frames * channels].copy_from_slice(&self.data.samples()[start..end]);
        self.position += frames;
        ReadResult::new(frames, self.position >= self.data.total_frames())
    }
}
