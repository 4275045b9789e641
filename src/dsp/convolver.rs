use crate::dsp::FftPlan;
use crate::error::{ResonarError, Result};
use rustfft::num_complex::Complex32;
use std::sync::Arc;

const ZERO: Complex32 = Complex32::new(0.0, 0.0);

/// One filter channel cut into block-sized pieces, each already transformed.
#[derive(Debug, Clone)]
pub struct FilterPartitions {
    partitions: Vec<Vec<Complex32>>,
    length: usize,
    fft_size: usize,
}

impl FilterPartitions {
    /// Splits `samples` into blocks of `plan.block_len()` and transforms each
    /// block zero padded to the plan size.
    pub fn new(samples: &[f32], plan: &FftPlan) -> Result<Self> {
        if samples.is_empty() {
            return Err(ResonarError::Configuration(
                "Impulse response must not be empty".to_string(),
            ));
        }
        let partitions = samples
            .chunks(plan.block_len())
            .map(|block| plan.spectrum(block))
            .collect();
        Ok(Self {
            partitions,
            length: samples.len(),
            fft_size: plan.size(),
        })
    }

    /// Filter length in samples.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }
}

/// Result of one [`Convolver::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvolveResult {
    /// Leading output samples that belong to the convolution.
    pub frames: usize,
    /// The input has ended and every tail sample has been emitted.
    pub finished: bool,
}

/// Uniformly partitioned overlap-add FFT convolution of one channel.
///
/// Each call consumes up to `L = N/2` input samples and produces `L` output
/// samples, where `N` is the plan size. Input spectra are kept in a ring
/// (the frequency domain delay line) and multiplied with the matching filter
/// partitions, so filters much longer than a block cost one transform pair
/// per block.
///
/// A convolver is used by one thread at a time.
pub struct Convolver {
    plan: Arc<FftPlan>,
    filter: Arc<FilterPartitions>,
    delay_line: Vec<Vec<Complex32>>,
    head: usize,
    accumulator: Vec<Complex32>,
    overlap: Vec<f32>,
    scratch: Vec<Complex32>,
    frames_in: usize,
    frames_out: usize,
}

impl Convolver {
    pub fn new(filter: Arc<FilterPartitions>, plan: Arc<FftPlan>) -> Result<Self> {
        Self::check_filter(&filter, &plan)?;
        let size = plan.size();
        Ok(Self {
            delay_line: vec![vec![ZERO; size]; filter.partition_count()],
            head: 0,
            accumulator: vec![ZERO; size],
            overlap: vec![0.0; plan.block_len()],
            scratch: plan.make_scratch(),
            frames_in: 0,
            frames_out: 0,
            filter,
            plan,
        })
    }

    pub fn block_len(&self) -> usize {
        self.plan.block_len()
    }

    pub fn filter(&self) -> &Arc<FilterPartitions> {
        &self.filter
    }

    /// Convolves one block.
    ///
    /// `input` holds at most [`block_len`](Self::block_len) samples; `None`
    /// (or a short block) feeds silence, which is how the filter tail is
    /// flushed after the input ended. `output` must hold `block_len` samples
    /// and is always fully written; only the first `frames` samples of the
    /// result are part of the convolution.
    pub fn process(&mut self, input: Option<&[f32]>, output: &mut [f32]) -> ConvolveResult {
        let size = self.plan.size();
        let block = self.plan.block_len();
        let input = input.unwrap_or(&[]);
        let fed = input.len().min(block);

        let slot = &mut self.delay_line[self.head];
        for (i, bin) in slot.iter_mut().enumerate() {
            *bin = if i < fed {
                Complex32::new(input[i], 0.0)
            } else {
                ZERO
            };
        }
        self.plan.forward(slot, &mut self.scratch);

        self.accumulator.fill(ZERO);
        let ring = self.delay_line.len();
        for (k, partition) in self.filter.partitions.iter().enumerate() {
            let spectrum = &self.delay_line[(self.head + ring - k) % ring];
            for ((acc, x), h) in self.accumulator.iter_mut().zip(spectrum).zip(partition) {
                *acc += x * h;
            }
        }
        self.plan.inverse(&mut self.accumulator, &mut self.scratch);

        let scale = 1.0 / size as f32;
        for i in 0..block {
            let sample = self.accumulator[i].re * scale + self.overlap[i];
            if let Some(out) = output.get_mut(i) {
                *out = sample;
            }
            self.overlap[i] = self.accumulator[block + i].re * scale;
        }
        self.head = (self.head + 1) % ring;

        self.frames_in += fed;
        let total = if self.frames_in == 0 {
            0
        } else {
            self.frames_in + self.filter.len() - 1
        };
        let frames = block.min(total.saturating_sub(self.frames_out));
        self.frames_out += frames;

        ConvolveResult {
            frames,
            finished: fed < block && self.frames_out >= total,
        }
    }

    /// Replaces the filter while keeping the input history, so the new
    /// filter applies seamlessly from the next block.
    pub fn set_filter(&mut self, filter: Arc<FilterPartitions>) -> Result<()> {
        Self::check_filter(&filter, &self.plan)?;
        let wanted = filter.partition_count();
        let ring = self.delay_line.len();
        if wanted != ring {
            // Re-linearise the ring newest first, then pad or cut.
            let mut reordered: Vec<Vec<Complex32>> = (0..ring)
                .map(|k| std::mem::take(&mut self.delay_line[(self.head + ring - 1 - k) % ring]))
                .collect();
            reordered.resize(wanted, vec![ZERO; self.plan.size()]);
            reordered.reverse();
            self.delay_line = reordered;
            self.head = 0;
        }
        self.filter = filter;
        Ok(())
    }

    /// Copies the whole streaming state of `other`, including its filter.
    ///
    /// Doesn't allocate when both convolvers use filters with the same
    /// number of partitions.
    pub fn copy_state_from(&mut self, other: &Convolver) {
        self.delay_line.clone_from(&other.delay_line);
        self.head = other.head;
        self.overlap.clone_from_slice(&other.overlap);
        self.frames_in = other.frames_in;
        self.frames_out = other.frames_out;
        self.filter = Arc::clone(&other.filter);
    }

    /// Fails when `filter` wasn't partitioned for `plan`.
    pub fn check_filter(filter: &FilterPartitions, plan: &FftPlan) -> Result<()> {
        if filter.fft_size != plan.size() {
            return Err(ResonarError::Configuration(format!(
                "Filter was partitioned for a {}-point FFT, convolver uses {}",
                filter.fft_size,
                plan.size()
            )));
        }
        Ok(())
    }

    /// Clears all history as if no input had been processed.
    pub fn reset(&mut self) {
        for spectrum in &mut self.delay_line {
            spectrum.fill(ZERO);
        }
        self.overlap.fill(0.0);
        self.head = 0;
        self.frames_in = 0;
        self.frames_out = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(input: &[f32], filter: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; input.len() + filter.len() - 1];
        for (i, x) in input.iter().enumerate() {
            for (j, h) in filter.iter().enumerate() {
                out[i + j] += x * h;
            }
        }
        out
    }

    fn run(convolver: &mut Convolver, input: &[f32]) -> Vec<f32> {
        let block = convolver.block_len();
        let mut out = Vec::new();
        let mut buffer = vec![0.0; block];
        for chunk in input.chunks(block) {
            let result = convolver.process(Some(chunk), &mut buffer);
            out.extend_from_slice(&buffer[..result.frames]);
        }
        loop {
            let result = convolver.process(None, &mut buffer);
            out.extend_from_slice(&buffer[..result.frames]);
            if result.finished {
                break;
            }
        }
        out
    }

    fn convolver(filter: &[f32], size: usize) -> Convolver {
        let plan = Arc::new(FftPlan::new(size).unwrap());
        let filter = Arc::new(FilterPartitions::new(filter, &plan).unwrap());
        Convolver::new(filter, plan).unwrap()
    }

    #[test]
    fn test_impulse_reproduces_filter() {
        let filter: Vec<f32> = (1..=11).map(|i| i as f32 * 0.1).collect();
        let mut convolver = convolver(&filter, 8);
        let out = run(&mut convolver, &[1.0]);
        assert_eq!(out.len(), filter.len());
        for (a, b) in out.iter().zip(&filter) {
            assert!((a - b).abs() < 1e-5, "{} != {}", a, b);
        }
    }

    #[test]
    fn test_matches_direct_convolution() {
        let input: Vec<f32> = (0..50).map(|i| (i as f32 * 0.3).sin()).collect();
        let filter: Vec<f32> = (0..13).map(|i| 1.0 / (i as f32 + 1.0)).collect();
        let mut convolver = convolver(&filter, 8);
        assert_eq!(convolver.filter().partition_count(), 4);

        let out = run(&mut convolver, &input);
        let expected = direct(&input, &filter);
        assert_eq!(out.len(), expected.len());
        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
        }
    }

    #[test]
    fn test_no_input_finishes_immediately() {
        let mut convolver = convolver(&[1.0, 0.5], 8);
        let mut buffer = vec![1.0; 4];
        let result = convolver.process(None, &mut buffer);
        assert_eq!(result, ConvolveResult { frames: 0, finished: true });
        assert_eq!(buffer, vec![0.0; 4]);
    }

    #[test]
    fn test_copy_state_continues_identically() {
        let filter = [0.5, 0.25, 0.125, 1.0, -1.0];
        let mut a = convolver(&filter, 8);
        let mut b = convolver(&[1.0], 8);
        b.set_filter(Arc::clone(a.filter())).unwrap();

        let mut out_a = vec![0.0; 4];
        let mut out_b = vec![0.0; 4];
        a.process(Some(&[1.0, 2.0, 3.0, 4.0][..]), &mut out_a);
        b.copy_state_from(&a);

        let next = [0.5, -0.5, 0.25, 0.0];
        let ra = a.process(Some(&next[..]), &mut out_a);
        let rb = b.process(Some(&next[..]), &mut out_b);
        assert_eq!(ra, rb);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut convolver = convolver(&[1.0, 1.0, 1.0, 1.0, 1.0], 8);
        let mut buffer = vec![0.0; 4];
        convolver.process(Some(&[1.0; 4][..]), &mut buffer);
        convolver.reset();
        let out = run(&mut convolver, &[2.0]);
        for sample in out {
            assert!((sample - 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_set_filter_keeps_history() {
        let mut convolver = convolver(&[1.0], 8);
        let mut buffer = vec![0.0; 4];
        convolver.process(Some(&[1.0, 0.0, 0.0, 0.0][..]), &mut buffer);

        // A delayed impulse response now reaches back into the previous block.
        let plan = Arc::new(FftPlan::new(8).unwrap());
        let mut delayed = vec![0.0; 6];
        delayed[5] = 1.0;
        let filter = Arc::new(FilterPartitions::new(&delayed, &plan).unwrap());
        convolver.set_filter(filter).unwrap();

        convolver.process(Some(&[0.0; 4][..]), &mut buffer);
        assert!((buffer[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mismatched_plan_is_rejected() {
        let small = FftPlan::new(8).unwrap();
        let filter = Arc::new(FilterPartitions::new(&[1.0], &small).unwrap());
        let large = Arc::new(FftPlan::new(16).unwrap());
        assert!(Convolver::check_filter(&filter, &large).is_err());
        assert!(Convolver::check_filter(&filter, &small).is_ok());
        assert!(Convolver::new(Arc::clone(&filter), Arc::clone(&large)).is_err());

        let mut convolver = convolver(&[1.0], 16);
        assert!(convolver.set_filter(filter).is_err());
    }
}
