use crate::error::{ResonarError, Result};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Forward and inverse complex FFTs of one size, shared between convolvers.
///
/// The plans are immutable; callers bring their own scratch buffers so the
/// same plan can run on several threads at once.
pub struct FftPlan {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch_len: usize,
}

impl FftPlan {
    /// `size` must be a power of two, at least 2.
    pub fn new(size: usize) -> Result<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(ResonarError::Configuration(format!(
                "FFT size must be a power of two >= 2, got {}",
                size
            )));
        }

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        log::debug!("Planned {}-point FFT", size);

        Ok(Self {
            size,
            forward,
            inverse,
            scratch_len,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Samples consumed per convolution block (half the transform size).
    pub fn block_len(&self) -> usize {
        self.size / 2
    }

    /// Length of the scratch buffer [`forward`](Self::forward) and
    /// [`inverse`](Self::inverse) need.
    pub fn scratch_len(&self) -> usize {
        self.scratch_len
    }

    pub fn make_scratch(&self) -> Vec<Complex32> {
        vec![Complex32::new(0.0, 0.0); self.scratch_len]
    }

    /// In-place forward transform of `buffer` (length [`size`](Self::size)).
    pub fn forward(&self, buffer: &mut [Complex32], scratch: &mut [Complex32]) {
        self.forward.process_with_scratch(buffer, scratch);
    }

    /// In-place inverse transform, not normalised: the result is scaled by
    /// [`size`](Self::size).
    pub fn inverse(&self, buffer: &mut [Complex32], scratch: &mut [Complex32]) {
        self.inverse.process_with_scratch(buffer, scratch);
    }

    /// Spectrum of `samples`, zero padded to the transform size.
    ///
    /// `samples` longer than the transform size are truncated.
    pub fn spectrum(&self, samples: &[f32]) -> Vec<Complex32> {
        let mut buffer: Vec<Complex32> = (0..self.size)
            .map(|i| Complex32::new(samples.get(i).copied().unwrap_or(0.0), 0.0))
            .collect();
        let mut scratch = self.make_scratch();
        self.forward(&mut buffer, &mut scratch);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(FftPlan::new(0).is_err());
        assert!(FftPlan::new(1).is_err());
        assert!(FftPlan::new(12).is_err());
        assert_eq!(FftPlan::new(16).unwrap().block_len(), 8);
    }

    #[test]
    fn test_inverse_of_forward_scales_by_size() {
        let plan = FftPlan::new(8).unwrap();
        let input = [1.0, -2.0, 3.0, 0.5, 0.0, 0.0, 0.0, 0.0];
        let mut buffer = plan.spectrum(&input);
        let mut scratch = plan.make_scratch();
        plan.inverse(&mut buffer, &mut scratch);
        for (value, expected) in buffer.iter().zip(input) {
            assert!((value.re / 8.0 - expected).abs() < 1e-5);
            assert!(value.im.abs() < 1e-5);
        }
    }

    #[test]
    fn test_spectrum_of_impulse_is_flat() {
        let plan = FftPlan::new(16).unwrap();
        for bin in plan.spectrum(&[1.0]) {
            assert!((bin.re - 1.0).abs() < 1e-6 && bin.im.abs() < 1e-6);
        }
    }
}
