use crate::error::{ResonarError, Result};
use crate::reader::{clamp_frames, ReadResult, Reader};
use crate::specs::Specs;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Source frames handed to rubato per chunk.
const RESAMPLE_CHUNK: usize = 64;

/// Pitch is clamped to this range, which also bounds rubato's buffers.
const MAX_PITCH: f64 = 32.0;
const MIN_PITCH: f64 = 1.0 / MAX_PITCH;

/// Streaming sample-rate converter with variable pitch, built on rubato.
///
/// Converts the inner reader's rate to `target_rate` and additionally plays
/// it `pitch` times faster. Pitch changes ramp over one rubato chunk.
///
/// While the rates match and the pitch is exactly one the inner reader is
/// read directly, so the output is bit-identical to the input. Once a
/// conversion is needed the resampler stays engaged until the next seek.
pub struct ResampleReader<R> {
    reader: R,
    resampler: FastFixedIn<f32>,
    source_rate: f64,
    target_rate: f64,
    pitch: f64,
    /// Source frames advanced per output frame.
    step: f64,
    channels: usize,
    resampling: bool,
    interleaved: Vec<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    /// Source frames collected for the next chunk.
    filled: usize,
    /// Converted frames waiting in `output`.
    pending: usize,
    pending_position: usize,
    /// Frames of resampler delay still to discard.
    skip: usize,
    /// Output frames since the resampler was last reset, and the number the
    /// source frames fed so far are worth.
    delivered: usize,
    owed: f64,
    input_eos: bool,
    source_position: f64,
}

impl<R: Reader> ResampleReader<R> {
    pub fn new(reader: R, target_rate: f64) -> Result<Self> {
        let specs = reader.specs();
        let channels = specs.frame_len();
        if channels == 0 || !(specs.rate > 0.0) || !(target_rate > 0.0) {
            return Err(ResonarError::AudioFormat(format!(
                "Can't resample {} channels from {} Hz to {} Hz",
                channels, specs.rate, target_rate
            )));
        }

        let resampler = FastFixedIn::<f32>::new(
            target_rate / specs.rate,
            MAX_PITCH,
            PolynomialDegree::Septic,
            RESAMPLE_CHUNK,
            channels,
        )
        .map_err(|e| ResonarError::AudioFormat(format!("Failed to create resampler: {}", e)))?;
        let output = vec![vec![0.0; resampler.output_frames_max()]; channels];

        let mut resampler = Self {
            reader,
            resampler,
            source_rate: specs.rate,
            target_rate,
            pitch: 1.0,
            step: 1.0,
            channels,
            resampling: false,
            interleaved: vec![0.0; RESAMPLE_CHUNK * channels],
            input: vec![vec![0.0; RESAMPLE_CHUNK]; channels],
            output,
            filled: 0,
            pending: 0,
            pending_position: 0,
            skip: 0,
            delivered: 0,
            owed: 0.0,
            input_eos: false,
            source_position: 0.0,
        };
        resampler.update_step();
        resampler.restart();
        Ok(resampler)
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    /// Sets the playback speed factor. Non-finite or non-positive values are ignored.
    pub fn set_pitch(&mut self, pitch: f64) {
        if !pitch.is_finite() || pitch <= 0.0 {
            return;
        }
        let pitch = pitch.clamp(MIN_PITCH, MAX_PITCH);
        if pitch == self.pitch {
            return;
        }
        self.pitch = pitch;
        self.update_step();

        if self.resampling {
            if let Err(e) = self.resampler.set_resample_ratio_relative(1.0 / pitch, true) {
                log::warn!("Resampler rejected pitch {}: {}", pitch, e);
            }
        } else if !self.is_unit_ratio() {
            self.restart();
        }
    }

    pub fn inner(&self) -> &R {
        &self.reader
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Position in source frames.
    pub fn source_position(&self) -> usize {
        self.source_position.round() as usize
    }

    pub fn source_rate(&self) -> f64 {
        self.source_rate
    }

    /// Seeks the inner reader to a position in source frames.
    pub fn seek_source(&mut self, position: usize) -> bool {
        if !self.reader.seek(position) {
            return false;
        }
        self.source_position = position as f64;
        self.restart();
        true
    }

    fn update_step(&mut self) {
        self.step = self.source_rate * self.pitch / self.target_rate;
    }

    fn is_unit_ratio(&self) -> bool {
        self.source_rate == self.target_rate && self.pitch == 1.0
    }

    /// Clears every buffered frame and picks the direct path if it applies.
    fn restart(&mut self) {
        self.resampling = !self.is_unit_ratio();
        self.filled = 0;
        self.pending = 0;
        self.pending_position = 0;
        self.delivered = 0;
        self.owed = 0.0;
        self.input_eos = false;
        if !self.resampling {
            return;
        }

        self.resampler.reset();
        if let Err(e) = self.resampler.set_resample_ratio_relative(1.0 / self.pitch, false) {
            log::warn!("Resampler rejected pitch {}: {}", self.pitch, e);
        }
        self.skip = self.resampler.output_delay();
    }

    /// Output frames the source frames fed so far amount to, once the
    /// inner reader has ended.
    fn remaining(&self) -> usize {
        (self.owed.round() as usize).saturating_sub(self.delivered)
    }

    /// Collects source frames for the next chunk. Returns `false` when the
    /// inner reader is starved.
    fn fill_chunk(&mut self) -> bool {
        let channels = self.channels;
        while self.filled < RESAMPLE_CHUNK && !self.input_eos {
            let wanted = RESAMPLE_CHUNK - self.filled;
            let result = self
                .reader
                .read(wanted, &mut self.interleaved[..wanted * channels]);
            let frames = &self.interleaved[..result.frames * channels];
            for (i, frame) in frames.chunks_exact(channels).enumerate() {
                for (wave, &sample) in self.input.iter_mut().zip(frame) {
                    wave[self.filled + i] = sample;
                }
            }
            self.filled += result.frames;
            self.owed += result.frames as f64 / self.step;
            if result.eos {
                self.input_eos = true;
            } else if result.frames == 0 {
                return false;
            }
        }
        for wave in &mut self.input {
            wave[self.filled..].fill(0.0);
        }
        true
    }

    fn process_chunk(&mut self) -> bool {
        match self
            .resampler
            .process_into_buffer(&self.input, &mut self.output, None)
        {
            Ok((_, frames)) => {
                let skipped = self.skip.min(frames);
                self.skip -= skipped;
                self.pending = frames;
                self.pending_position = skipped;
                self.filled = 0;
                true
            }
            Err(e) => {
                log::error!("Resampling failed, ending the stream: {}", e);
                false
            }
        }
    }

    fn read_resampled(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let channels = self.channels;
        let mut done = 0;
        loop {
            let limit = if self.input_eos {
                self.remaining()
            } else {
                usize::MAX
            };
            if limit == 0 {
                return ReadResult::new(done, true);
            }
            if done == frames {
                return ReadResult::new(done, false);
            }

            let available = (self.pending - self.pending_position).min(limit);
            if available > 0 {
                let count = available.min(frames - done);
                let start = self.pending_position;
                for (i, frame) in buffer[done * channels..(done + count) * channels]
                    .chunks_exact_mut(channels)
                    .enumerate()
                {
                    for (out, wave) in frame.iter_mut().zip(&self.output) {
                        *out = wave[start + i];
                    }
                }
                self.pending_position += count;
                self.delivered += count;
                self.source_position += count as f64 * self.step;
                done += count;
                continue;
            }

            if !self.fill_chunk() {
                return ReadResult::new(done, false);
            }
            if !self.process_chunk() {
                self.input_eos = true;
                self.owed = self.delivered as f64;
                return ReadResult::new(done, true);
            }
        }
    }
}

impl<R: Reader> Reader for ResampleReader<R> {
    fn is_seekable(&self) -> bool {
        self.reader.is_seekable()
    }

    /// `position` is in output frames.
    fn seek(&mut self, position: usize) -> bool {
        self.seek_source((position as f64 * self.step).round() as usize)
    }

    fn length(&self) -> Option<usize> {
        let length = self.reader.length()?;
        Some((length as f64 / self.step).ceil() as usize)
    }

    fn position(&self) -> usize {
        (self.source_position / self.step).round() as usize
    }

    fn specs(&self) -> Specs {
        Specs::new(self.target_rate, self.reader.specs().channels)
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let frames = clamp_frames(frames, buffer, self.channels);
        if self.resampling {
            return self.read_resampled(frames, buffer);
        }
        let result = self.reader.read(frames, buffer);
        self.source_position += result.frames as f64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_to_end;
    use crate::reader::testing::VecReader;
    use crate::specs::Channels;

    #[test]
    fn test_unit_ratio_is_exact() {
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut reader =
            ResampleReader::new(VecReader::mono(input.clone()).chunked(77), 48000.0).unwrap();
        assert_eq!(reader.length(), Some(1000));
        let out = read_to_end(&mut reader, usize::MAX);
        assert_eq!(out, input);
        assert_eq!(reader.source_position(), 1000);
    }

    #[test]
    fn test_upsampling_doubles_length() {
        let mut reader = ResampleReader::new(VecReader::mono(vec![1.0; 300]), 96000.0).unwrap();
        assert_eq!(reader.length(), Some(600));
        let out = read_to_end(&mut reader, 50);
        assert_eq!(out.len(), 600);
        // Away from the edges a constant signal stays constant.
        for sample in &out[20..580] {
            assert!((sample - 1.0).abs() < 1e-3, "{}", sample);
        }
        assert_eq!(reader.source_position(), 300);
    }

    #[test]
    fn test_pitch_halves_length() {
        let input = vec![0.5; 1000];
        let mut reader =
            ResampleReader::new(VecReader::new(input, Channels::Stereo), 48000.0).unwrap();
        reader.set_pitch(2.0);
        let out = read_to_end(&mut reader, usize::MAX);
        assert_eq!(out.len(), 500);
        for sample in &out[20..480] {
            assert!((sample - 0.5).abs() < 1e-3, "{}", sample);
        }
    }

    #[test]
    fn test_pitch_change_mid_stream_keeps_playing() {
        let mut reader = ResampleReader::new(VecReader::mono(vec![1.0; 2000]), 48000.0).unwrap();
        let mut buffer = [0.0; 100];
        assert_eq!(reader.read(100, &mut buffer), ReadResult::new(100, false));
        assert!(buffer.iter().all(|&s| s == 1.0));

        reader.set_pitch(1.5);
        let out = read_to_end(&mut reader, 100);
        let expected = (1900.0 / 1.5f64).round() as usize;
        assert!(out.len().abs_diff(expected) <= 1, "{}", out.len());
        assert!(out[20..out.len() - 20].iter().all(|s| (s - 1.0).abs() < 1e-3));
    }

    #[test]
    fn test_invalid_pitch_is_ignored() {
        let mut reader = ResampleReader::new(VecReader::mono(vec![0.0]), 48000.0).unwrap();
        reader.set_pitch(0.0);
        reader.set_pitch(f64::NAN);
        assert_eq!(reader.pitch(), 1.0);
    }

    #[test]
    fn test_seek_in_source_frames() {
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let mut reader = ResampleReader::new(VecReader::mono(input), 48000.0).unwrap();
        read_to_end(&mut reader, 4);
        assert!(reader.seek(7));
        assert_eq!(reader.position(), 7);
        assert_eq!(read_to_end(&mut reader, usize::MAX), vec![7.0, 8.0, 9.0]);
        assert!(reader.seek_source(0));
        assert_eq!(read_to_end(&mut reader, 2), vec![0.0, 1.0]);
    }

    #[test]
    fn test_seek_while_resampling() {
        let mut reader = ResampleReader::new(VecReader::mono(vec![1.0; 400]), 24000.0).unwrap();
        read_to_end(&mut reader, usize::MAX);
        assert!(reader.seek_source(200));
        assert_eq!(reader.source_position(), 200);
        assert_eq!(read_to_end(&mut reader, 33).len(), 100);
    }

    #[test]
    fn test_starved_reader_resumes() {
        struct Stutter {
            inner: VecReader,
            starve: bool,
        }
        impl Reader for Stutter {
            fn is_seekable(&self) -> bool {
                false
            }
            fn seek(&mut self, _: usize) -> bool {
                false
            }
            fn length(&self) -> Option<usize> {
                None
            }
            fn position(&self) -> usize {
                self.inner.position()
            }
            fn specs(&self) -> Specs {
                self.inner.specs()
            }
            fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
                self.starve = !self.starve;
                if self.starve {
                    ReadResult::new(0, false)
                } else {
                    self.inner.read(frames.min(16), buffer)
                }
            }
        }

        for target in [48000.0, 96000.0] {
            let inner = VecReader::mono(vec![1.0; 100]);
            let mut reader =
                ResampleReader::new(Stutter { inner, starve: false }, target).unwrap();
            let mut collected = Vec::new();
            let mut buffer = [0.0; 32];
            for _ in 0..256 {
                let result = reader.read(32, &mut buffer);
                collected.extend_from_slice(&buffer[..result.frames]);
                if result.eos {
                    break;
                }
            }
            assert_eq!(collected.len(), (100.0 * target / 48000.0) as usize);
        }
    }
}
