//! Stream format descriptions.
//!
//! Every [`Reader`](crate::reader::Reader) declares the [`Specs`] of the
//! interleaved `f32` samples it produces. Devices additionally carry the
//! [`SampleFormat`] their sink converts to.

use crate::error::{ResonarError, Result};

/// Channel layouts. The discriminant is the number of interleaved channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channels {
    Mono = 1,
    Stereo = 2,
    StereoLfe = 3,
    Surround4 = 4,
    Surround5 = 5,
    Surround51 = 6,
    Surround61 = 7,
    Surround71 = 8,
}

impl Channels {
    /// Number of interleaved channels.
    pub fn count(self) -> usize {
        self as usize
    }

    /// Layout for a raw channel count.
    pub fn from_count(count: usize) -> Result<Self> {
        match count {
            1 => Ok(Self::Mono),
            2 => Ok(Self::Stereo),
            3 => Ok(Self::StereoLfe),
            4 => Ok(Self::Surround4),
            5 => Ok(Self::Surround5),
            6 => Ok(Self::Surround51),
            7 => Ok(Self::Surround61),
            8 => Ok(Self::Surround71),
            _ => Err(ResonarError::AudioFormat(format!(
                "Unsupported channel count: {}",
                count
            ))),
        }
    }
}

/// Sample formats a sink may convert the mixed `f32` stream into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    S16,
    S24,
    S32,
    Float32,
    Float64,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub fn byte_size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

/// Sample rate and channel layout of a stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Specs {
    pub rate: f64,
    pub channels: Channels,
}

impl Specs {
    pub fn new(rate: f64, channels: Channels) -> Self {
        Self { rate, channels }
    }

    pub fn mono(rate: f64) -> Self {
        Self::new(rate, Channels::Mono)
    }

    pub fn stereo(rate: f64) -> Self {
        Self::new(rate, Channels::Stereo)
    }

    /// Number of samples in one frame.
    pub fn frame_len(&self) -> usize {
        self.channels.count()
    }

    /// Converts seconds to frames at this rate, rounding down.
    pub fn seconds_to_frames(&self, seconds: f64) -> usize {
        if seconds <= 0.0 {
            0
        } else {
            (seconds * self.rate) as usize
        }
    }

    pub fn frames_to_seconds(&self, frames: usize) -> f64 {
        frames as f64 / self.rate
    }
}

/// Specs of a device: stream specs plus the sink's sample format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSpecs {
    pub specs: Specs,
    pub format: SampleFormat,
}

impl DeviceSpecs {
    pub fn new(specs: Specs, format: SampleFormat) -> Self {
        Self { specs, format }
    }

    pub fn rate(&self) -> f64 {
        self.specs.rate
    }

    pub fn channels(&self) -> Channels {
        self.specs.channels
    }
}
