use crate::error::Result;
use crate::reader::{clamp_frames, ReadResult, Reader, Sound};
use crate::specs::Specs;
use std::sync::Arc;

/// Plays another sound after a stretch of silence.
pub struct Delay {
    sound: Arc<dyn Sound>,
    delay: f32,
}

impl Delay {
    /// `delay` is in seconds; negative values mean no delay.
    pub fn new(sound: Arc<dyn Sound>, delay: f32) -> Self {
        Self {
            sound,
            delay: delay.max(0.0),
        }
    }

    pub fn delay(&self) -> f32 {
        self.delay
    }
}

impl Sound for Delay {
    fn create_reader(&self) -> Result<Box<dyn Reader>> {
        let reader = self.sound.create_reader()?;
        Ok(Box::new(DelayReader::new(reader, self.delay)))
    }
}

pub struct DelayReader {
    reader: Box<dyn Reader>,
    /// Delay in frames.
    delay: usize,
    /// Frames of silence still to emit.
    remaining: usize,
}

impl DelayReader {
    pub fn new(reader: Box<dyn Reader>, delay: f32) -> Self {
        let delay = (delay.max(0.0) as f64 * reader.specs().rate).round() as usize;
        Self {
            reader,
            delay,
            remaining: delay,
        }
    }
}

impl Reader for DelayReader {
    fn is_seekable(&self) -> bool {
        self.reader.is_seekable()
    }

    fn seek(&mut self, position: usize) -> bool {
        if position < self.delay {
            if !self.reader.seek(0) {
                return false;
            }
            self.remaining = self.delay - position;
        } else {
            if !self.reader.seek(position - self.delay) {
                return false;
            }
            self.remaining = 0;
        }
        true
    }

    fn length(&self) -> Option<usize> {
        self.reader.length().map(|length| length + self.delay)
    }

    fn position(&self) -> usize {
        self.delay - self.remaining + self.reader.position()
    }

    fn specs(&self) -> Specs {
        self.reader.specs()
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let channels = self.reader.specs().frame_len();
        let frames = clamp_frames(frames, buffer, channels);

        let silent = self.remaining.min(frames);
        buffer[..silent * channels].fill(0.0);
        self.remaining -= silent;

        if silent < frames || (frames == 0 && self.remaining == 0) {
            let result = self
                .reader
                .read(frames - silent, &mut buffer[silent * channels..]);
            return ReadResult::new(silent + result.frames, result.eos);
        }
        ReadResult::new(silent, false)
    }
}
