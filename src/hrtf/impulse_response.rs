use crate::dsp::{FftPlan, FilterPartitions};
use crate::error::{ResonarError, Result};
use crate::reader::{read_to_end, Sound};
use crate::specs::Specs;
use std::sync::Arc;

/// A multi-channel impulse response, prepared for partitioned convolution.
///
/// Every channel is cut into partitions of the plan's block length and
/// transformed once up front.
#[derive(Debug, Clone)]
pub struct ImpulseResponse {
    specs: Specs,
    length: usize,
    channels: Vec<Arc<FilterPartitions>>,
}

impl ImpulseResponse {
    /// Prepares interleaved samples with the given specs.
    pub fn from_samples(samples: &[f32], specs: Specs, plan: &FftPlan) -> Result<Self> {
        let channel_count = specs.frame_len();
        let length = samples.len() / channel_count;
        if length == 0 {
            return Err(ResonarError::Hrtf(
                "Impulse response must contain at least one frame".to_string(),
            ));
        }

        let mut channels = Vec::with_capacity(channel_count);
        let mut planar = Vec::with_capacity(length);
        for channel in 0..channel_count {
            planar.clear();
            planar.extend(
                samples
                    .chunks_exact(channel_count)
                    .map(|frame| frame[channel]),
            );
            channels.push(Arc::new(FilterPartitions::new(&planar, plan)?));
        }

        Ok(Self {
            specs,
            length,
            channels,
        })
    }

    /// Reads a finite sound completely and prepares it.
    pub fn from_sound(sound: &dyn Sound, plan: &FftPlan) -> Result<Self> {
        let mut reader = sound.create_reader()?;
        let length = reader.length().ok_or_else(|| {
            ResonarError::Hrtf("Impulse response sound must have a known length".to_string())
        })?;
        let specs = reader.specs();
        let samples = read_to_end(reader.as_mut(), length);
        Self::from_samples(&samples, specs, plan)
    }

    pub fn specs(&self) -> Specs {
        self.specs
    }

    /// Length in frames.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&Arc<FilterPartitions>> {
        self.channels.get(index)
    }
}
