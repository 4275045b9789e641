use crate::error::{ResonarError, Result};
use rubato::{FftFixedIn, Resampler};

/// Offline sample-rate converter for decoded audio, built on rubato.
///
/// The whole signal is converted at once; the resampler's output delay is
/// trimmed so the result lines up with the input and has
/// `round(frames * target / source)` frames.
pub struct AudioResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    channels: usize,
    chunk_size: usize,
}

impl AudioResampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: usize,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(ResonarError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        if channels == 0 {
            return Err(ResonarError::AudioFormat(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            channels,
            chunk_size: chunk_size.unwrap_or(1024).max(1),
        })
    }

    pub fn resample_interleaved(&self, interleaved_samples: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(interleaved_samples.to_vec());
        }

        let frames = interleaved_samples.len() / self.channels;
        if frames == 0 {
            return Ok(Vec::new());
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2,
            self.channels,
        )
        .map_err(|e| ResonarError::AudioLoading(format!("Failed to create resampler: {}", e)))?;

        let delay = resampler.output_delay();
        let expected = (frames as f64 * self.resample_ratio()).round() as usize;

        let mut planar_out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); self.channels];
        let mut chunk = vec![vec![0.0f32; self.chunk_size]; self.channels];
        let mut input_frame = 0;

        while planar_out[0].len() < expected + delay {
            for (channel, wave) in chunk.iter_mut().enumerate() {
                for (i, sample) in wave.iter_mut().enumerate() {
                    let frame = input_frame + i;
                    *sample = if frame < frames {
                        interleaved_samples[frame * self.channels + channel]
                    } else {
                        0.0
                    };
                }
            }

            let waves_out = resampler
                .process(&chunk, None)
                .map_err(|e| ResonarError::AudioLoading(format!("Resampling error: {}", e)))?;
            if waves_out[0].is_empty() {
                break;
            }
            for (out, wave) in planar_out.iter_mut().zip(waves_out) {
                out.extend_from_slice(&wave);
            }
            input_frame += self.chunk_size;
        }

        let available = planar_out[0].len().saturating_sub(delay).min(expected);
        let mut interleaved = Vec::with_capacity(available * self.channels);
        for frame in delay..delay + available {
            for channel in &planar_out {
                interleaved.push(channel[frame]);
            }
        }

        Ok(interleaved)
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    pub fn resample_ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampler_creation() {
        let resampler = AudioResampler::new(44100, 48000, 2, None).unwrap();
        assert_eq!(resampler.source_sample_rate(), 44100);
        assert_eq!(resampler.target_sample_rate(), 48000);
        assert!((resampler.resample_ratio() - 48000.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_resampler_no_resampling_needed() {
        let resampler = AudioResampler::new(44100, 44100, 1, None).unwrap();
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resampler.resample_interleaved(&samples).unwrap(), samples);
    }

    #[test]
    fn test_resampled_length_follows_ratio() {
        let resampler = AudioResampler::new(24000, 48000, 2, Some(256)).unwrap();
        let samples = vec![0.25; 1000 * 2];
        let out = resampler.resample_interleaved(&samples).unwrap();
        assert_eq!(out.len(), 2000 * 2);
    }

    #[test]
    fn test_invalid_sample_rates() {
        assert!(AudioResampler::new(0, 48000, 2, None).is_err());
        assert!(AudioResampler::new(44100, 0, 2, None).is_err());
        assert!(AudioResampler::new(44100, 48000, 0, None).is_err());
    }
}
