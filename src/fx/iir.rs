use crate::error::{ResonarError, Result};
use crate::reader::{ReadResult, Reader, Sound};
use crate::specs::Specs;
use std::f64::consts::PI;
use std::sync::Arc;

/// General IIR filter in direct form I.
///
/// Computes `a[0]*y[n] = sum(b[k]*x[n-k]) - sum(a[k]*y[n-k], k >= 1)` for
/// every channel independently.
pub struct IirFilter {
    sound: Arc<dyn Sound>,
    b: Vec<f32>,
    a: Vec<f32>,
}

impl IirFilter {
    pub fn new(sound: Arc<dyn Sound>, b: Vec<f32>, a: Vec<f32>) -> Result<Self> {
        validate_coefficients(&b, &a)?;
        Ok(Self { sound, b, a })
    }
}

impl Sound for IirFilter {
    fn create_reader(&self) -> Result<Box<dyn Reader>> {
        let reader = self.sound.create_reader()?;
        Ok(Box::new(IirFilterReader::new(
            reader,
            self.b.clone(),
            self.a.clone(),
        )?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    Lowpass,
    Highpass,
}

/// Second order low- or highpass.
///
/// Coefficients depend on the sample rate, so they are computed when a
/// reader is created.
pub struct Biquad {
    sound: Arc<dyn Sound>,
    kind: BiquadKind,
    frequency: f32,
    q: f32,
}

impl Biquad {
    pub fn lowpass(sound: Arc<dyn Sound>, frequency: f32, q: f32) -> Self {
        Self {
            sound,
            kind: BiquadKind::Lowpass,
            frequency,
            q,
        }
    }

    pub fn highpass(sound: Arc<dyn Sound>, frequency: f32, q: f32) -> Self {
        Self {
            sound,
            kind: BiquadKind::Highpass,
            frequency,
            q,
        }
    }

    pub fn kind(&self) -> BiquadKind {
        self.kind
    }
}

impl Sound for Biquad {
    fn create_reader(&self) -> Result<Box<dyn Reader>> {
        let reader = self.sound.create_reader()?;
        let (b, a) = biquad_coefficients(self.kind, self.frequency, self.q, reader.specs().rate)?;
        Ok(Box::new(IirFilterReader::new(reader, b, a)?))
    }
}

/// RBJ cookbook coefficients as `(b, a)`.
pub fn biquad_coefficients(
    kind: BiquadKind,
    frequency: f32,
    q: f32,
    rate: f64,
) -> Result<(Vec<f32>, Vec<f32>)> {
    if !(frequency > 0.0) || frequency as f64 >= rate / 2.0 {
        return Err(ResonarError::Configuration(format!(
            "Cutoff {} Hz must lie between 0 and the Nyquist frequency {} Hz",
            frequency,
            rate / 2.0
        )));
    }
    if !(q > 0.0) {
        return Err(ResonarError::Configuration(format!(
            "Q must be positive, got {}",
            q
        )));
    }

    let w0 = 2.0 * PI * frequency as f64 / rate;
    let (sin, cos) = w0.sin_cos();
    let alpha = sin / (2.0 * q as f64);

    let (b0, b1) = match kind {
        BiquadKind::Lowpass => ((1.0 - cos) / 2.0, 1.0 - cos),
        BiquadKind::Highpass => ((1.0 + cos) / 2.0, -(1.0 + cos)),
    };
    let b = vec![b0 as f32, b1 as f32, b0 as f32];
    let a = vec![
        (1.0 + alpha) as f32,
        (-2.0 * cos) as f32,
        (1.0 - alpha) as f32,
    ];
    Ok((b, a))
}

fn validate_coefficients(b: &[f32], a: &[f32]) -> Result<()> {
    if b.is_empty() {
        return Err(ResonarError::Configuration(
            "IIR filter needs at least one feed-forward coefficient".to_string(),
        ));
    }
    match a.first() {
        None => Err(ResonarError::Configuration(
            "IIR filter needs at least one feedback coefficient".to_string(),
        )),
        Some(&a0) if a0 == 0.0 => Err(ResonarError::Configuration(
            "First feedback coefficient must not be zero".to_string(),
        )),
        Some(_) => Ok(()),
    }
}

pub struct IirFilterReader {
    reader: Box<dyn Reader>,
    b: Vec<f32>,
    a: Vec<f32>,
    channels: usize,
    /// Input history, `b.len()` frames.
    x: Vec<f32>,
    /// Output history, `a.len()` frames.
    y: Vec<f32>,
    x_index: usize,
    y_index: usize,
}

impl IirFilterReader {
    pub fn new(reader: Box<dyn Reader>, b: Vec<f32>, a: Vec<f32>) -> Result<Self> {
        validate_coefficients(&b, &a)?;
        let a0 = a[0];
        let b: Vec<f32> = b.iter().map(|c| c / a0).collect();
        let a: Vec<f32> = a.iter().map(|c| c / a0).collect();
        let channels = reader.specs().frame_len();
        Ok(Self {
            x: vec![0.0; b.len() * channels],
            y: vec![0.0; a.len() * channels],
            reader,
            b,
            a,
            channels,
            x_index: 0,
            y_index: 0,
        })
    }

    fn reset(&mut self) {
        self.x.fill(0.0);
        self.y.fill(0.0);
        self.x_index = 0;
        self.y_index = 0;
    }
}

impl Reader for IirFilterReader {
    fn is_seekable(&self) -> bool {
        self.reader.is_seekable()
    }

    fn seek(&mut self, position: usize) -> bool {
        if !self.reader.seek(position) {
            return false;
        }
        self.reset();
        true
    }

    fn length(&self) -> Option<usize> {
        self.reader.length()
    }

    fn position(&self) -> usize {
        self.reader.position()
    }

    fn specs(&self) -> Specs {
        self.reader.specs()
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let result = self.reader.read(frames, buffer);
        let channels = self.channels;
        let (nb, na) = (self.b.len(), self.a.len());

        for frame in buffer[..result.frames * channels].chunks_exact_mut(channels) {
            for (channel, sample) in frame.iter_mut().enumerate() {
                self.x[self.x_index * channels + channel] = *sample;

                let mut acc = 0.0;
                for (k, b) in self.b.iter().enumerate() {
                    let slot = (self.x_index + nb - k) % nb;
                    acc += b * self.x[slot * channels + channel];
                }
                for (k, a) in self.a.iter().enumerate().skip(1) {
                    let slot = (self.y_index + na - k) % na;
                    acc -= a * self.y[slot * channels + channel];
                }

                self.y[self.y_index * channels + channel] = acc;
                *sample = acc;
            }
            self.x_index = (self.x_index + 1) % nb;
            self.y_index = (self.y_index + 1) % na;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_to_end;
    use crate::reader::testing::{VecReader, VecSound};
    use crate::specs::Channels;

    fn filtered(samples: Vec<f32>, b: Vec<f32>, a: Vec<f32>) -> Vec<f32> {
        let mut reader =
            IirFilterReader::new(Box::new(VecReader::mono(samples)), b, a).unwrap();
        read_to_end(&mut reader, usize::MAX)
    }

    #[test]
    fn test_identity_filter() {
        let input = vec![0.5, -0.25, 1.0, 0.0, 0.75];
        assert_eq!(filtered(input.clone(), vec![1.0], vec![1.0]), input);
    }

    #[test]
    fn test_zero_filter() {
        let input = vec![0.5, -0.25, 1.0];
        assert_eq!(filtered(input, vec![0.0], vec![1.0]), vec![0.0; 3]);
    }

    #[test]
    fn test_fir_difference() {
        let out = filtered(vec![1.0, 3.0, 6.0, 10.0], vec![1.0, -1.0], vec![1.0]);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_feedback_accumulates() {
        // y[n] = x[n] + y[n-1]
        let out = filtered(vec![1.0, 1.0, 1.0, 1.0], vec![1.0], vec![1.0, -1.0]);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_coefficients_are_normalised_by_a0() {
        let out = filtered(vec![2.0, 4.0], vec![1.0], vec![2.0]);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_channels_are_independent() {
        let reader = VecReader::new(vec![1.0, 10.0, 1.0, 10.0, 1.0, 10.0], Channels::Stereo);
        let mut reader =
            IirFilterReader::new(Box::new(reader), vec![1.0], vec![1.0, -1.0]).unwrap();
        let out = read_to_end(&mut reader, usize::MAX);
        assert_eq!(out, vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
    }

    #[test]
    fn test_invalid_coefficients() {
        let sound: Arc<dyn Sound> = Arc::new(VecSound {
            samples: vec![0.0],
            channels: Channels::Mono,
        });
        assert!(IirFilter::new(sound.clone(), vec![1.0], vec![]).is_err());
        assert!(IirFilter::new(sound.clone(), vec![1.0], vec![0.0, 1.0]).is_err());
        assert!(IirFilter::new(sound.clone(), vec![], vec![1.0]).is_err());
        assert!(IirFilter::new(sound, vec![1.0], vec![1.0]).is_ok());
    }

    #[test]
    fn test_seek_resets_history() {
        let mut reader = IirFilterReader::new(
            Box::new(VecReader::mono(vec![1.0; 4])),
            vec![1.0],
            vec![1.0, -1.0],
        )
        .unwrap();
        read_to_end(&mut reader, 3);
        assert!(reader.seek(0));
        assert_eq!(read_to_end(&mut reader, usize::MAX), vec![1.0, 2.0, 3.0, 4.0]);

        let mut fixed = IirFilterReader::new(
            Box::new(VecReader::mono(vec![1.0]).unseekable()),
            vec![1.0],
            vec![1.0],
        )
        .unwrap();
        assert!(!fixed.is_seekable());
        assert!(!fixed.seek(0));
    }

    #[test]
    fn test_lowpass_passes_dc_and_highpass_blocks_it() {
        let sound: Arc<dyn Sound> = Arc::new(VecSound {
            samples: vec![1.0; 4800],
            channels: Channels::Mono,
        });
        let mut low = Biquad::lowpass(sound.clone(), 1000.0, 0.707)
            .create_reader()
            .unwrap();
        let mut high = Biquad::highpass(sound, 1000.0, 0.707)
            .create_reader()
            .unwrap();
        let low = read_to_end(low.as_mut(), usize::MAX);
        let high = read_to_end(high.as_mut(), usize::MAX);
        assert!((low[4799] - 1.0).abs() < 1e-3);
        assert!(high[4799].abs() < 1e-3);
    }

    #[test]
    fn test_biquad_rejects_bad_cutoff() {
        assert!(biquad_coefficients(BiquadKind::Lowpass, 0.0, 0.7, 48000.0).is_err());
        assert!(biquad_coefficients(BiquadKind::Highpass, 30000.0, 0.7, 48000.0).is_err());
        assert!(biquad_coefficients(BiquadKind::Lowpass, 100.0, 0.0, 48000.0).is_err());
    }
}
