//! Configuration for Resonar

use crate::error::{ResonarError, Result};
use crate::math::Vec3;
use crate::specs::{Channels, DeviceSpecs, SampleFormat, Specs};

/// Configuration of a mixing [`Device`](crate::device::Device).
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub sample_rate: u32,
    pub channels: Channels,
    pub format: SampleFormat,
    /// Frames mixed per cycle of the mixing thread.
    pub block_size: usize,
    /// Whether the device exposes the spatial (3D) capability.
    pub enable_spatialization: bool,
    /// Blocks of latency the output sink buffers ahead of the hardware.
    pub sink_latency_blocks: usize,
    /// Capacity of the device event queue.
    pub event_capacity: usize,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: Channels::Stereo,
            format: SampleFormat::Float32,
            block_size: 512,
            enable_spatialization: true,
            sink_latency_blocks: 3,
            event_capacity: 256,
        }
    }
}

impl DeviceDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn channels(mut self, channels: Channels) -> Self {
        self.channels = channels;
        self
    }

    pub fn format(mut self, format: SampleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn enable_spatialization(mut self, enable: bool) -> Self {
        self.enable_spatialization = enable;
        self
    }

    pub fn sink_latency_blocks(mut self, blocks: usize) -> Self {
        self.sink_latency_blocks = blocks;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn device_specs(&self) -> DeviceSpecs {
        DeviceSpecs::new(
            Specs::new(self.sample_rate as f64, self.channels),
            self.format,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ResonarError::Configuration(
                "Sample rate must be greater than 0".into(),
            ));
        }
        if self.block_size == 0 {
            return Err(ResonarError::Configuration(
                "Block size must be greater than 0".into(),
            ));
        }
        if self.sink_latency_blocks == 0 {
            return Err(ResonarError::Configuration(
                "Sink latency must be at least one block".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the binaural spatializer's DSP resources.
#[derive(Debug, Clone)]
pub struct BinauralDesc {
    /// FFT size N. Convolution blocks are N / 2 frames long.
    pub fft_size: usize,
    /// Worker threads of the convolution pool.
    pub threads: usize,
}

impl Default for BinauralDesc {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .min(4);
        Self {
            fft_size: 1024,
            threads,
        }
    }
}

impl BinauralDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fft_size(mut self, size: usize) -> Self {
        self.fft_size = size;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Frames per convolution block.
    pub fn block_len(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.fft_size < 2 || !self.fft_size.is_power_of_two() {
            return Err(ResonarError::Configuration(format!(
                "FFT size must be a power of two >= 2, got {}",
                self.fft_size
            )));
        }
        if self.threads == 0 {
            return Err(ResonarError::Configuration(
                "Thread pool needs at least one worker".into(),
            ));
        }
        Ok(())
    }
}

/// How the device should treat a newly played sound.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SourceConfig {
    /// Plays directly, ignoring listener and source positions.
    #[default]
    NonSpatial,
    /// Attenuated, doppler shifted and panned relative to the listener.
    /// Only valid on devices with spatialization enabled.
    Spatial {
        /// World position of the source.
        location: Vec3,
    },
}

impl SourceConfig {
    pub fn non_spatial() -> Self {
        Self::NonSpatial
    }

    pub fn spatial(location: Vec3) -> Self {
        Self::Spatial { location }
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self, Self::Spatial { .. })
    }

    /// Returns the location if this is a spatial source
    pub fn location(&self) -> Option<Vec3> {
        match self {
            Self::Spatial { location } => Some(*location),
            Self::NonSpatial => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_desc_is_valid() {
        let desc = DeviceDesc::default();
        assert!(desc.validate().is_ok());
        assert_eq!(desc.device_specs().specs, Specs::stereo(48000.0));
    }

    #[test]
    fn test_builder() {
        let desc = DeviceDesc::new()
            .sample_rate(44100)
            .channels(Channels::Mono)
            .block_size(256)
            .enable_spatialization(false);
        assert_eq!(desc.sample_rate, 44100);
        assert_eq!(desc.channels, Channels::Mono);
        assert_eq!(desc.block_size, 256);
        assert!(!desc.enable_spatialization);
        assert!(desc.clone().block_size(0).validate().is_err());
    }

    #[test]
    fn test_binaural_desc_validation() {
        assert!(BinauralDesc::new().fft_size(1000).validate().is_err());
        assert!(BinauralDesc::new().threads(0).validate().is_err());
        let desc = BinauralDesc::new().fft_size(256).threads(2);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.block_len(), 128);
    }

    #[test]
    fn test_source_config() {
        assert!(!SourceConfig::default().is_spatial());
        let config = SourceConfig::spatial(Vec3::new(1.0, 2.0, 3.0));
        assert!(config.is_spatial());
        assert_eq!(config.location(), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(SourceConfig::non_spatial().location(), None);
    }
}
