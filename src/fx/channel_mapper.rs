use crate::reader::{clamp_frames, ReadResult, Reader};
use crate::specs::{Channels, Specs};

/// Converts a reader's channel layout to the device layout.
///
/// Matching layouts pass through untouched. Mono feeds the front left and
/// right channels (or just the one channel of a mono target); other
/// layouts fold their channels round-robin onto the target and average
/// whatever lands on the same output channel.
///
/// A mono source can additionally be panned with [`set_pan`](Self::set_pan),
/// which the device uses to place spatial sources on a stereo field.
pub struct ChannelMapper<R> {
    reader: R,
    target: Channels,
    /// Left and right gains for mono sources.
    pan: Option<(f32, f32)>,
    scratch: Vec<f32>,
}

impl<R: Reader> ChannelMapper<R> {
    pub fn new(reader: R, target: Channels) -> Self {
        Self {
            reader,
            target,
            pan: None,
            scratch: Vec::new(),
        }
    }

    pub fn inner(&self) -> &R {
        &self.reader
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Pans a mono source by its azimuth in degrees (0 = front, 90 = right).
    /// `None` restores the centred, unattenuated mapping.
    pub fn set_pan(&mut self, azimuth: Option<f32>) {
        self.pan = azimuth.map(pan_gains);
    }
}

/// Constant-power gains for an azimuth in degrees.
pub(crate) fn pan_gains(azimuth: f32) -> (f32, f32) {
    let position = azimuth.to_radians().sin();
    let theta = (position + 1.0) * std::f32::consts::FRAC_PI_4;
    (theta.cos(), theta.sin())
}

impl<R: Reader> Reader for ChannelMapper<R> {
    fn is_seekable(&self) -> bool {
        self.reader.is_seekable()
    }

    fn seek(&mut self, position: usize) -> bool {
        self.reader.seek(position)
    }

    fn length(&self) -> Option<usize> {
        self.reader.length()
    }

    fn position(&self) -> usize {
        self.reader.position()
    }

    fn specs(&self) -> Specs {
        Specs::new(self.reader.specs().rate, self.target)
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let source = self.reader.specs().frame_len();
        let target = self.target.count();
        if source == target {
            return self.reader.read(frames, buffer);
        }

        let frames = clamp_frames(frames, buffer, target);
        if self.scratch.len() < frames * source {
            self.scratch.resize(frames * source, 0.0);
        }
        let result = self.reader.read(frames, &mut self.scratch[..frames * source]);
        let input = &self.scratch[..result.frames * source];
        let output = &mut buffer[..result.frames * target];

        if source == 1 {
            let (left, right) = match (self.pan, target) {
                (Some(gains), 2..) => gains,
                _ => (1.0, 1.0),
            };
            for (sample, frame) in input.iter().zip(output.chunks_exact_mut(target)) {
                frame.fill(0.0);
                frame[0] = sample * left;
                if target > 1 {
                    frame[1] = sample * right;
                }
            }
        } else {
            for (in_frame, out_frame) in input
                .chunks_exact(source)
                .zip(output.chunks_exact_mut(target))
            {
                out_frame.fill(0.0);
                for (i, sample) in in_frame.iter().enumerate() {
                    out_frame[i % target] += sample;
                }
                for (j, out) in out_frame.iter_mut().enumerate() {
                    let folded = (source + target - 1 - j) / target;
                    if folded > 1 {
                        *out /= folded as f32;
                    }
                }
            }
        }

        result
    }
}
