use super::{clamp_frames, ReadResult, Reader, Sound};
use crate::error::{ResonarError, Result};
use crate::specs::Specs;
use std::f64::consts::TAU;

/// Infinite mono sine tone.
#[derive(Debug, Clone)]
pub struct Sine {
    frequency: f32,
    sample_rate: f64,
}

impl Sine {
    pub fn new(frequency: f32, sample_rate: f64) -> Result<Self> {
        if sample_rate <= 0.0 {
            return Err(ResonarError::AudioFormat(
                "Sample rate must be greater than 0".into(),
            ));
        }
        Ok(Self {
            frequency,
            sample_rate,
        })
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }
}

impl Sound for Sine {
    fn create_reader(&self) -> Result<Box<dyn Reader>> {
        Ok(Box::new(SineReader {
            frequency: self.frequency as f64,
            specs: Specs::mono(self.sample_rate),
            position: 0,
        }))
    }
}

pub struct SineReader {
    frequency: f64,
    specs: Specs,
    position: usize,
}

impl Reader for SineReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, position: usize) -> bool {
        self.position = position;
        true
    }

    fn length(&self) -> Option<usize> {
        None
    }

    fn position(&self) -> usize {
        self.position
    }

    fn specs(&self) -> Specs {
        self.specs
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let frames = clamp_frames(frames, buffer, 1);
        let step = TAU * self.frequency / self.specs.rate;
        for (i, sample) in buffer[..frames].iter_mut().enumerate() {
            *sample = ((self.position + i) as f64 * step).sin() as f32;
        }
        self.position += frames;
        ReadResult::new(frames, false)
    }
}

/// Infinite silence in any layout.
#[derive(Debug, Clone)]
pub struct Silence {
    specs: Specs,
}

impl Silence {
    pub fn new(specs: Specs) -> Self {
        Self { specs }
    }
}

impl Sound for Silence {
    fn create_reader(&self) -> Result<Box<dyn Reader>> {
        Ok(Box::new(SilenceReader {
            specs: self.specs,
            position: 0,
        }))
    }
}

pub struct SilenceReader {
    specs: Specs,
    position: usize,
}

impl Reader for SilenceReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, position: usize) -> bool {
        self.position = position;
        true
    }

    fn length(&self) -> Option<usize> {
        None
    }

    fn position(&self) -> usize {
        self.position
    }

    fn specs(&self) -> Specs {
        self.specs
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let channels = self.specs.frame_len();
        let frames = clamp_frames(frames, buffer, channels);
        buffer[..frames * channels].fill(0.0);
        self.position += frames;
        ReadResult::new(frames, false)
    }
}
