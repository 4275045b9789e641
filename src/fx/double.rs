use crate::error::{ResonarError, Result};
use crate::reader::{clamp_frames, ReadResult, Reader, Sound};
use crate::specs::Specs;
use std::sync::Arc;

/// Plays two sounds one after the other.
pub struct Double {
    first: Arc<dyn Sound>,
    second: Arc<dyn Sound>,
}

impl Double {
    pub fn new(first: Arc<dyn Sound>, second: Arc<dyn Sound>) -> Self {
        Self { first, second }
    }
}

impl Sound for Double {
    fn create_reader(&self) -> Result<Box<dyn Reader>> {
        let first = self.first.create_reader()?;
        let second = self.second.create_reader()?;
        Ok(Box::new(DoubleReader::new(first, second)?))
    }
}

pub struct DoubleReader {
    first: Box<dyn Reader>,
    second: Box<dyn Reader>,
    first_finished: bool,
    /// Frames the first reader produced before it finished.
    first_played: usize,
}

impl DoubleReader {
    /// Both readers must have identical specs.
    pub fn new(first: Box<dyn Reader>, second: Box<dyn Reader>) -> Result<Self> {
        let (a, b) = (first.specs(), second.specs());
        if a != b {
            return Err(ResonarError::AudioFormat(format!(
                "Sequenced readers differ in specs: {:?} vs {:?}",
                a, b
            )));
        }
        Ok(Self {
            first,
            second,
            first_finished: false,
            first_played: 0,
        })
    }
}

impl Reader for DoubleReader {
    fn is_seekable(&self) -> bool {
        self.first.is_seekable() && self.second.is_seekable()
    }

    fn seek(&mut self, position: usize) -> bool {
        match self.first.length() {
            Some(first_length) if position >= first_length => {
                if !self.second.seek(position - first_length) {
                    return false;
                }
                self.first_finished = true;
                self.first_played = first_length;
            }
            _ => {
                if !self.first.seek(position) {
                    return false;
                }
                self.first_finished = false;
                self.first_played = 0;
                self.second.seek(0);
            }
        }
        true
    }

    fn length(&self) -> Option<usize> {
        Some(self.first.length()? + self.second.length()?)
    }

    fn position(&self) -> usize {
        if self.first_finished {
            self.first_played + self.second.position()
        } else {
            self.first.position()
        }
    }

    fn specs(&self) -> Specs {
        self.first.specs()
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let channels = self.first.specs().frame_len();
        let frames = clamp_frames(frames, buffer, channels);
        let mut done = 0;

        if !self.first_finished {
            let result = self.first.read(frames, buffer);
            if !result.eos {
                return result;
            }
            self.first_finished = true;
            self.first_played = self.first.position();
            done = result.frames;
            if done == frames && frames > 0 {
                return ReadResult::new(done, false);
            }
        }

        let result = self
            .second
            .read(frames - done, &mut buffer[done * channels..]);
        ReadResult::new(done + result.frames, result.eos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_to_end;
    use crate::reader::testing::{VecReader, VecSound};
    use crate::specs::Channels;

    fn pair(a: Vec<f32>, b: Vec<f32>) -> DoubleReader {
        DoubleReader::new(
            Box::new(VecReader::mono(a)),
            Box::new(VecReader::mono(b)),
        )
        .unwrap()
    }

    #[test]
    fn test_plays_both_in_order() {
        let mut reader = pair(vec![1.0, 2.0, 3.0], vec![4.0, 5.0]);
        assert_eq!(reader.length(), Some(5));
        let out = read_to_end(&mut reader, usize::MAX);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(reader.position(), 5);
    }

    #[test]
    fn test_read_spans_both_readers() {
        let mut reader = pair(vec![1.0, 2.0], vec![3.0, 4.0]);
        let mut buffer = [0.0; 3];
        assert_eq!(reader.read(3, &mut buffer), ReadResult::new(3, false));
        assert_eq!(buffer, [1.0, 2.0, 3.0]);
        assert_eq!(reader.position(), 3);
        assert_eq!(reader.read(3, &mut buffer), ReadResult::new(1, true));
        assert_eq!(buffer[0], 4.0);
    }

    #[test]
    fn test_seek_into_second() {
        let mut reader = pair(vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]);
        assert!(reader.seek(4));
        assert_eq!(reader.position(), 4);
        assert_eq!(read_to_end(&mut reader, usize::MAX), vec![5.0, 6.0]);

        assert!(reader.seek(1));
        assert_eq!(reader.position(), 1);
        assert_eq!(
            read_to_end(&mut reader, usize::MAX),
            vec![2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn test_mismatched_specs_fail() {
        let first: Arc<dyn Sound> = Arc::new(VecSound {
            samples: vec![0.0],
            channels: Channels::Mono,
        });
        let second: Arc<dyn Sound> = Arc::new(VecSound {
            samples: vec![0.0, 0.0],
            channels: Channels::Stereo,
        });
        assert!(Double::new(first.clone(), second).create_reader().is_err());
        assert!(Double::new(first.clone(), first).create_reader().is_ok());
    }

    #[test]
    fn test_empty_first_reader() {
        let mut reader = pair(vec![], vec![7.0]);
        assert_eq!(read_to_end(&mut reader, usize::MAX), vec![7.0]);
    }

    #[test]
    fn test_short_first_reads_are_returned() {
        let mut reader = DoubleReader::new(
            Box::new(VecReader::mono(vec![1.0, 2.0, 3.0]).chunked(1)),
            Box::new(VecReader::mono(vec![4.0])),
        )
        .unwrap();
        let mut buffer = [0.0; 4];
        assert_eq!(reader.read(4, &mut buffer), ReadResult::new(1, false));
        assert_eq!(read_to_end(&mut reader, usize::MAX), vec![2.0, 3.0, 4.0]);
    }
}
