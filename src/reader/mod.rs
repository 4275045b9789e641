//! The pull-based streaming audio graph.
//!
//! A [`Sound`] is an immutable description of audio that can be played any
//! number of times at once; every call to [`Sound::create_reader`] returns a
//! fresh [`Reader`] holding the per-playback state. Effects are Sounds that
//! wrap other Sounds and whose Readers wrap the inner Readers, so a chain of
//! Sounds produces a matching chain of Readers.
//!
//! Positions and lengths are counted in frames (one sample per channel).
//! Sample data is always interleaved `f32`.

mod generator;

pub use generator::{Silence, SilenceReader, Sine, SineReader};

use crate::error::Result;
use crate::specs::Specs;
use std::sync::Arc;

/// Outcome of one [`Reader::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadResult {
    /// Frames written to the front of the buffer. Never more than requested.
    pub frames: usize,
    /// Set once the reader will never produce further non-silent data.
    pub eos: bool,
}

impl ReadResult {
    pub fn new(frames: usize, eos: bool) -> Self {
        Self { frames, eos }
    }
}

/// Stateful producer of interleaved samples for one playback.
///
/// Readers are owned exclusively by whoever created them (a device handle or
/// a wrapping effect reader) and are never shared.
pub trait Reader: Send {
    /// Whether [`seek`](Reader::seek) can reposition the stream.
    fn is_seekable(&self) -> bool;

    /// Moves to `position` (in frames). Returns `false` if the reader can't seek.
    fn seek(&mut self, position: usize) -> bool;

    /// Total length in frames, `None` when unknown or infinite.
    fn length(&self) -> Option<usize>;

    /// Current position in frames.
    fn position(&self) -> usize;

    fn specs(&self) -> Specs;

    /// Reads up to `frames` frames into the front of `buffer`.
    ///
    /// `buffer` must hold at least `frames * channels` samples; readers clamp
    /// the request to what fits. A request of zero frames is valid and only
    /// reports the end-of-stream state.
    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult;
}

impl<R: Reader + ?Sized> Reader for Box<R> {
    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }

    fn seek(&mut self, position: usize) -> bool {
        (**self).seek(position)
    }

    fn length(&self) -> Option<usize> {
        (**self).length()
    }

    fn position(&self) -> usize {
        (**self).position()
    }

    fn specs(&self) -> Specs {
        (**self).specs()
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        (**self).read(frames, buffer)
    }
}

/// Immutable, re-entrant factory of Readers.
pub trait Sound: Send + Sync {
    fn create_reader(&self) -> Result<Box<dyn Reader>>;
}

impl<S: Sound + ?Sized> Sound for Arc<S> {
    fn create_reader(&self) -> Result<Box<dyn Reader>> {
        (**self).create_reader()
    }
}

/// Clamps a frame request to what `buffer` can hold.
pub(crate) fn clamp_frames(frames: usize, buffer: &[f32], channels: usize) -> usize {
    frames.min(buffer.len() / channels.max(1))
}

/// Reads until `frames` frames were produced or the reader hits end-of-stream.
///
/// Readers may legally return short reads without being finished; this keeps
/// pulling. A reader that returns nothing without signalling end-of-stream
/// ends the loop early.
pub fn read_fully(reader: &mut dyn Reader, frames: usize, buffer: &mut [f32]) -> ReadResult {
    let channels = reader.specs().frame_len();
    let frames = clamp_frames(frames, buffer, channels);
    let mut done = 0;
    loop {
        let result = reader.read(frames - done, &mut buffer[done * channels..]);
        done += result.frames;
        if result.eos {
            return ReadResult::new(done, true);
        }
        if done >= frames || result.frames == 0 {
            return ReadResult::new(done, false);
        }
    }
}

/// Reads a reader to its end, stopping after `limit` frames.
pub fn read_to_end(reader: &mut dyn Reader, limit: usize) -> Vec<f32> {
    const CHUNK: usize = 1024;
    let channels = reader.specs().frame_len();
    let mut samples = Vec::new();
    let mut chunk = vec![0.0; CHUNK * channels];
    let mut total = 0;
    while total < limit {
        let request = CHUNK.min(limit - total);
        let result = reader.read(request, &mut chunk);
        samples.extend_from_slice(&chunk[..result.frames * channels]);
        total += result.frames;
        if result.eos || result.frames == 0 {
            break;
        }
    }
    samples
}

#[cfg(test)]
pub(crate) mod testing {
    //! Readers with scripted behaviour for effect and mixer tests.

    use super::*;
    use crate::specs::Channels;

    /// Finite in-memory reader with a configurable maximum chunk per call.
    pub struct VecReader {
        pub samples: Vec<f32>,
        pub specs: Specs,
        pub position: usize,
        pub chunk: usize,
        pub seekable: bool,
    }

    impl VecReader {
        pub fn new(samples: Vec<f32>, channels: Channels) -> Self {
            Self {
                samples,
                specs: Specs::new(48000.0, channels),
                position: 0,
                chunk: usize::MAX,
                seekable: true,
            }
        }

        pub fn mono(samples: Vec<f32>) -> Self {
            Self::new(samples, Channels::Mono)
        }

        pub fn chunked(mut self, chunk: usize) -> Self {
            self.chunk = chunk;
            self
        }

        pub fn unseekable(mut self) -> Self {
            self.seekable = false;
            self
        }

        fn total(&self) -> usize {
            self.samples.len() / self.specs.frame_len()
        }
    }

    impl Reader for VecReader {
        fn is_seekable(&self) -> bool {
            self.seekable
        }

        fn seek(&mut self, position: usize) -> bool {
            if !self.seekable {
                return false;
            }
            self.position = position.min(self.total());
            true
        }

        fn length(&self) -> Option<usize> {
            Some(self.total())
        }

        fn position(&self) -> usize {
            self.position
        }

        fn specs(&self) -> Specs {
            self.specs
        }

        fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
            let channels = self.specs.frame_len();
            let frames = clamp_frames(frames, buffer, channels)
                .min(self.chunk)
                .min(self.total() - self.position);
            let start = self.position * channels;
            buffer[..frames * channels]
                .copy_from_slice(&self.samples[start..start + frames * channels]);
            self.position += frames;
            ReadResult::new(frames, self.position >= self.total())
        }
    }

    pub struct VecSound {
        pub samples: Vec<f32>,
        pub channels: Channels,
    }

    impl Sound for VecSound {
        fn create_reader(&self) -> Result<Box<dyn Reader>> {
            Ok(Box::new(VecReader::new(self.samples.clone(), self.channels)))
        }
    }
}
