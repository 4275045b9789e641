use crate::config::BinauralDesc;
use crate::dsp::{ConvolveResult, Convolver, FftPlan, FilterPartitions, TaskHandle, ThreadPool};
use crate::error::{ResonarError, Result};
use crate::hrtf::{Hrtf, Source};
use crate::reader::{clamp_frames, read_fully, ReadResult, Reader, Sound};
use crate::specs::{Channels, Specs};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;

/// Left and right for the current response, then left and right for the
/// previous one while crossfading.
const LANES: usize = 4;

/// Renders a mono sound binaurally through an [`Hrtf`].
pub struct Binaural {
    sound: Arc<dyn Sound>,
    hrtf: Arc<Hrtf>,
    source: Arc<Source>,
    pool: Arc<ThreadPool>,
}

impl Binaural {
    pub fn new(
        sound: Arc<dyn Sound>,
        hrtf: Arc<Hrtf>,
        source: Arc<Source>,
        pool: Arc<ThreadPool>,
    ) -> Self {
        Self {
            sound,
            hrtf,
            source,
            pool,
        }
    }

    /// Creates the spatializer with its own worker pool sized by `desc`.
    ///
    /// `hrtf` must have been prepared for `desc.fft_size`, see
    /// [`Hrtf::from_desc`].
    pub fn from_desc(
        desc: &BinauralDesc,
        sound: Arc<dyn Sound>,
        hrtf: Arc<Hrtf>,
        source: Arc<Source>,
    ) -> Result<Self> {
        desc.validate()?;
        if hrtf.plan().size() != desc.fft_size {
            return Err(ResonarError::Configuration(format!(
                "HRTF was prepared for a {}-point FFT, expected {}",
                hrtf.plan().size(),
                desc.fft_size
            )));
        }
        let pool = Arc::new(ThreadPool::new(desc.threads)?);
        Ok(Self::new(sound, hrtf, source, pool))
    }
}

impl Sound for Binaural {
    fn create_reader(&self) -> Result<Box<dyn Reader>> {
        let reader = self.sound.create_reader()?;
        Ok(Box::new(BinauralReader::new(
            reader,
            Arc::clone(&self.hrtf),
            Arc::clone(&self.source),
            Arc::clone(&self.pool),
        )?))
    }
}

struct Lane {
    convolver: Convolver,
    output: Vec<f32>,
}

impl Lane {
    fn new(filter: Arc<FilterPartitions>, plan: Arc<FftPlan>) -> Result<Box<Self>> {
        let output = vec![0.0; plan.block_len()];
        Ok(Box::new(Self {
            convolver: Convolver::new(filter, plan)?,
            output,
        }))
    }
}

/// Streams a mono reader as stereo through the response closest to the
/// source's direction.
///
/// Input is processed in blocks of half the FFT size. For each block the
/// left and right convolutions run in parallel on the thread pool. When
/// the source moves onto a different measured direction, the next block is
/// additionally rendered with the previous response and crossfaded
/// linearly into the new one.
///
/// The output continues for `response length - 1` frames after the input
/// ended, so the filter tail is never cut off. A starved input is padded
/// with a silent block, which lengthens the stream by that block.
pub struct BinauralReader {
    reader: Box<dyn Reader>,
    hrtf: Arc<Hrtf>,
    source: Arc<Source>,
    pool: Arc<ThreadPool>,
    block_len: usize,
    /// Silent frames inserted for a starved input since the last seek.
    padding: usize,
    lanes: [Option<Box<Lane>>; LANES],
    input: Arc<Vec<f32>>,
    stereo: Vec<f32>,
    ring_producer: HeapProd<f32>,
    ring_consumer: HeapCons<f32>,
    /// Direction last read from the source.
    azimuth: f32,
    elevation: f32,
    /// Direction of the response in use.
    real_azimuth: f32,
    real_elevation: f32,
    crossfade: bool,
    input_eos: bool,
    output_eos: bool,
    position: usize,
    rate: f64,
}

impl BinauralReader {
    pub fn new(
        reader: Box<dyn Reader>,
        hrtf: Arc<Hrtf>,
        source: Arc<Source>,
        pool: Arc<ThreadPool>,
    ) -> Result<Self> {
        let specs = reader.specs();
        if specs.channels != Channels::Mono {
            return Err(ResonarError::AudioFormat(format!(
                "Binaural rendering needs a mono reader, got {} channels",
                specs.channels.count()
            )));
        }
        let hrtf_specs = hrtf
            .specs()
            .ok_or_else(|| ResonarError::Hrtf("The HRTF contains no responses".to_string()))?;
        if hrtf_specs.rate != specs.rate {
            return Err(ResonarError::AudioFormat(format!(
                "Reader rate {} Hz does not match the HRTF rate {} Hz",
                specs.rate, hrtf_specs.rate
            )));
        }

        let (azimuth, elevation) = (source.azimuth(), source.elevation());
        let lookup = hrtf
            .impulse_response(azimuth, elevation)
            .ok_or_else(|| ResonarError::Hrtf("The HRTF contains no responses".to_string()))?;
        let left = channel(&lookup.response, 0)?;
        let right = channel(&lookup.response, 1)?;

        let plan = Arc::clone(hrtf.plan());
        let block_len = plan.block_len();
        let lanes = [
            Some(Lane::new(Arc::clone(&left), Arc::clone(&plan))?),
            Some(Lane::new(Arc::clone(&right), Arc::clone(&plan))?),
            Some(Lane::new(left, Arc::clone(&plan))?),
            Some(Lane::new(right, plan)?),
        ];
        let (ring_producer, ring_consumer) = HeapRb::<f32>::new(block_len * 2).split();

        log::debug!(
            "Binaural reader at {:.1}°/{:.1}° using response {:.1}°/{:.1}°",
            azimuth,
            elevation,
            lookup.azimuth,
            lookup.elevation
        );

        Ok(Self {
            reader,
            hrtf,
            source,
            pool,
            block_len,
            padding: 0,
            lanes,
            input: Arc::new(vec![0.0; block_len]),
            stereo: vec![0.0; block_len * 2],
            ring_producer,
            ring_consumer,
            azimuth,
            elevation,
            real_azimuth: lookup.azimuth,
            real_elevation: lookup.elevation,
            crossfade: false,
            input_eos: false,
            output_eos: false,
            position: 0,
            rate: specs.rate,
        })
    }

    /// Swaps in a new response when the source moved onto another
    /// measured direction.
    fn update_direction(&mut self) {
        let (azimuth, elevation) = (self.source.azimuth(), self.source.elevation());
        if azimuth == self.azimuth && elevation == self.elevation {
            return;
        }
        self.azimuth = azimuth;
        self.elevation = elevation;

        let Some(lookup) = self.hrtf.impulse_response(azimuth, elevation) else {
            return;
        };
        if lookup.azimuth == self.real_azimuth && lookup.elevation == self.real_elevation {
            return;
        }
        let (Ok(left), Ok(right)) = (channel(&lookup.response, 0), channel(&lookup.response, 1))
        else {
            return;
        };
        let plan = self.hrtf.plan();
        if let Err(e) = Convolver::check_filter(&left, plan)
            .and_then(|()| Convolver::check_filter(&right, plan))
        {
            log::warn!("Keeping previous HRTF response: {}", e);
            return;
        }

        let (current, previous) = self.lanes.split_at_mut(2);
        for ((current, previous), filter) in current.iter_mut().zip(previous).zip([left, right]) {
            if let (Some(current), Some(previous)) = (current.as_mut(), previous.as_mut()) {
                // While a crossfade is pending the previous lanes still hold
                // the last response that was actually rendered.
                if !self.crossfade {
                    previous.convolver.copy_state_from(&current.convolver);
                }
                if let Err(e) = current.convolver.set_filter(filter) {
                    log::error!("Failed to switch HRTF response: {}", e);
                }
            }
        }

        log::trace!(
            "Binaural response moved to {:.1}°/{:.1}°",
            lookup.azimuth,
            lookup.elevation
        );
        self.real_azimuth = lookup.azimuth;
        self.real_elevation = lookup.elevation;
        self.crossfade = true;
    }

    /// Convolves one block of input into the ring buffer.
    fn process_block(&mut self) {
        let mut fed = 0;
        if !self.input_eos {
            let input = Arc::make_mut(&mut self.input);
            let result = read_fully(self.reader.as_mut(), self.block_len, input);
            self.input_eos = result.eos;
            fed = result.frames;
            if !result.eos && fed < self.block_len {
                // Starved input plays as silence to keep the stream going.
                input[fed..].fill(0.0);
                self.padding += self.block_len - fed;
                fed = self.block_len;
            }
        }

        let active = if self.crossfade { LANES } else { 2 };
        let mut tasks: [Option<TaskHandle<(Box<Lane>, ConvolveResult)>>; LANES] = Default::default();
        for (index, task) in tasks.iter_mut().enumerate().take(active) {
            let Some(mut lane) = self.lanes[index].take() else {
                continue;
            };
            let input = Arc::clone(&self.input);
            *task = Some(self.pool.submit(move || {
                let feed = if fed > 0 { Some(&input[..fed]) } else { None };
                let result = lane.convolver.process(feed, &mut lane.output);
                drop(input);
                (lane, result)
            }));
        }

        let mut result = ConvolveResult::default();
        for (index, task) in tasks.iter_mut().enumerate() {
            let Some(task) = task.take() else {
                continue;
            };
            match task.get() {
                Ok((lane, lane_result)) => {
                    if index == 0 {
                        result = lane_result;
                    }
                    self.lanes[index] = Some(lane);
                }
                Err(e) => log::error!("Binaural convolution failed: {}", e),
            }
        }
        if self.lanes.iter().any(Option::is_none) {
            self.rebuild_lanes();
            result = ConvolveResult {
                frames: self.block_len,
                finished: false,
            };
        }

        self.render(result.frames);
        self.crossfade = false;
        self.output_eos = result.finished;
    }

    /// Interleaves the lane outputs into the ring, crossfading when needed.
    fn render(&mut self, frames: usize) {
        let [Some(left), Some(right), Some(prev_left), Some(prev_right)] = &self.lanes else {
            self.stereo[..frames * 2].fill(0.0);
            self.ring_producer.push_slice(&self.stereo[..frames * 2]);
            return;
        };

        for (i, frame) in self.stereo[..frames * 2].chunks_exact_mut(2).enumerate() {
            if self.crossfade {
                let w = (i + 1) as f32 / frames as f32;
                frame[0] = prev_left.output[i] * (1.0 - w) + left.output[i] * w;
                frame[1] = prev_right.output[i] * (1.0 - w) + right.output[i] * w;
            } else {
                frame[0] = left.output[i];
                frame[1] = right.output[i];
            }
        }
        self.ring_producer.push_slice(&self.stereo[..frames * 2]);
    }

    /// Replaces lanes lost to a failed task. Their history is gone, so
    /// every lane restarts from silence.
    fn rebuild_lanes(&mut self) {
        let Some(lookup) = self.hrtf.impulse_response(self.real_azimuth, self.real_elevation) else {
            return;
        };
        for (index, lane) in self.lanes.iter_mut().enumerate() {
            match lane {
                Some(lane) => {
                    lane.convolver.reset();
                    lane.output.fill(0.0);
                }
                None => {
                    let filter = channel(&lookup.response, index % 2);
                    match filter.and_then(|f| Lane::new(f, Arc::clone(self.hrtf.plan()))) {
                        Ok(new_lane) => *lane = Some(new_lane),
                        Err(e) => log::error!("Failed to rebuild binaural lane: {}", e),
                    }
                }
            }
        }
    }
}

fn channel(
    response: &crate::hrtf::ImpulseResponse,
    index: usize,
) -> Result<Arc<FilterPartitions>> {
    response
        .channel(index)
        .cloned()
        .ok_or_else(|| ResonarError::Hrtf(format!("HRTF response lacks channel {}", index)))
}

impl Reader for BinauralReader {
    fn is_seekable(&self) -> bool {
        self.reader.is_seekable()
    }

    fn seek(&mut self, position: usize) -> bool {
        if !self.reader.seek(position) {
            return false;
        }
        for lane in self.lanes.iter_mut().flatten() {
            lane.convolver.reset();
        }
        self.ring_consumer.clear();
        self.crossfade = false;
        self.input_eos = false;
        self.output_eos = false;
        self.padding = 0;
        self.position = position;
        true
    }

    fn length(&self) -> Option<usize> {
        let response = self.lanes[0]
            .as_ref()
            .map_or(1, |lane| lane.convolver.filter().len());
        Some(self.reader.length()? + self.padding + response - 1)
    }

    fn position(&self) -> usize {
        self.position
    }

    fn specs(&self) -> Specs {
        Specs::stereo(self.rate)
    }

    fn read(&mut self, frames: usize, buffer: &mut [f32]) -> ReadResult {
        let frames = clamp_frames(frames, buffer, 2);
        if !self.output_eos {
            self.update_direction();
        }

        let mut done = 0;
        while done < frames {
            let popped = self
                .ring_consumer
                .pop_slice(&mut buffer[done * 2..frames * 2]);
            done += popped / 2;
            if done == frames || self.output_eos {
                break;
            }
            self.process_block();
        }

        self.position += done;
        ReadResult::new(done, self.output_eos && self.ring_consumer.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hrtf::ImpulseResponse;
    use crate::reader::read_to_end;
    use crate::reader::testing::VecReader;

    /// Store whose responses are a left/right gain pair per direction.
    fn gain_hrtf(entries: &[(f32, f32, f32)]) -> Arc<Hrtf> {
        let plan = Arc::new(FftPlan::new(16).unwrap());
        let mut hrtf = Hrtf::new(Arc::clone(&plan));
        for &(azimuth, left, right) in entries {
            let response =
                ImpulseResponse::from_samples(&[left, right], Specs::stereo(48000.0), &plan)
                    .unwrap();
            hrtf.add_impulse_response(response, azimuth, 0.0).unwrap();
        }
        Arc::new(hrtf)
    }

    fn pool() -> Arc<ThreadPool> {
        Arc::new(ThreadPool::new(2).unwrap())
    }

    #[test]
    fn test_impulse_reproduces_response() {
        let plan = Arc::new(FftPlan::new(16).unwrap());
        let mut hrtf = Hrtf::new(Arc::clone(&plan));
        let response: Vec<f32> = (0..20).flat_map(|i| [i as f32, -(i as f32)]).collect();
        hrtf.add_impulse_response(
            ImpulseResponse::from_samples(&response, Specs::stereo(48000.0), &plan).unwrap(),
            0.0,
            0.0,
        )
        .unwrap();

        let mut reader = BinauralReader::new(
            Box::new(VecReader::mono(vec![1.0])),
            Arc::new(hrtf),
            Arc::new(Source::default()),
            pool(),
        )
        .unwrap();
        assert_eq!(reader.length(), Some(20));

        let out = read_to_end(&mut reader, usize::MAX);
        assert_eq!(out.len(), response.len());
        for (a, b) in out.iter().zip(&response) {
            assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
        }
        assert_eq!(reader.position(), 20);
    }

    #[test]
    fn test_stream_longer_than_a_block() {
        let hrtf = gain_hrtf(&[(0.0, 0.5, 0.25)]);
        let input: Vec<f32> = (0..100).map(|i| (i as f32 * 0.1).sin()).collect();
        let mut reader = BinauralReader::new(
            Box::new(VecReader::mono(input.clone()).chunked(5)),
            hrtf,
            Arc::new(Source::default()),
            pool(),
        )
        .unwrap();

        let mut out = Vec::new();
        let mut buffer = [0.0; 14];
        loop {
            let result = reader.read(7, &mut buffer);
            out.extend_from_slice(&buffer[..result.frames * 2]);
            if result.eos {
                break;
            }
        }
        assert_eq!(out.len(), 200);
        for (frame, x) in out.chunks_exact(2).zip(&input) {
            assert!((frame[0] - x * 0.5).abs() < 1e-5);
            assert!((frame[1] - x * 0.25).abs() < 1e-5);
        }
    }

    #[test]
    fn test_tail_is_idempotent() {
        let hrtf = gain_hrtf(&[(0.0, 1.0, 1.0)]);
        let mut reader = BinauralReader::new(
            Box::new(VecReader::mono(vec![0.5; 3])),
            hrtf,
            Arc::new(Source::default()),
            pool(),
        )
        .unwrap();
        read_to_end(&mut reader, usize::MAX);
        let mut buffer = [1.0; 8];
        assert_eq!(reader.read(4, &mut buffer), ReadResult::new(0, true));
        assert_eq!(reader.read(4, &mut buffer), ReadResult::new(0, true));
    }

    #[test]
    fn test_direction_change_crossfades() {
        let hrtf = gain_hrtf(&[(0.0, 1.0, 0.0), (90.0, 0.0, 1.0)]);
        let source = Arc::new(Source::default());
        let mut reader = BinauralReader::new(
            Box::new(VecReader::mono(vec![1.0; 64])),
            hrtf,
            Arc::clone(&source),
            pool(),
        )
        .unwrap();

        let mut buffer = [0.0; 16];
        reader.read(8, &mut buffer);
        assert!(buffer.chunks_exact(2).all(|f| (f[0] - 1.0).abs() < 1e-5 && f[1].abs() < 1e-5));

        source.set_azimuth(85.0);
        reader.read(8, &mut buffer);
        // One block of linear fade from left to right.
        for (i, frame) in buffer.chunks_exact(2).enumerate() {
            let w = (i + 1) as f32 / 8.0;
            assert!((frame[0] - (1.0 - w)).abs() < 1e-4, "frame {}: {:?}", i, frame);
            assert!((frame[1] - w).abs() < 1e-4, "frame {}: {:?}", i, frame);
        }

        reader.read(8, &mut buffer);
        assert!(buffer.chunks_exact(2).all(|f| f[0].abs() < 1e-5 && (f[1] - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_moves_within_a_block_fade_from_heard_response() {
        let hrtf = gain_hrtf(&[(0.0, 1.0, 0.0), (90.0, 0.0, 1.0), (180.0, 0.5, 0.5)]);
        let source = Arc::new(Source::default());
        let mut reader = BinauralReader::new(
            Box::new(VecReader::mono(vec![1.0; 64])),
            hrtf,
            Arc::clone(&source),
            pool(),
        )
        .unwrap();

        let mut buffer = [0.0; 16];
        reader.read(4, &mut buffer);
        source.set_azimuth(90.0);
        reader.read(2, &mut buffer);
        source.set_azimuth(180.0);
        reader.read(2, &mut buffer);
        assert!(buffer[..4]
            .chunks_exact(2)
            .all(|f| (f[0] - 1.0).abs() < 1e-5 && f[1].abs() < 1e-5));

        // The response at 90° was never rendered, so the fade runs from 0° to 180°.
        reader.read(8, &mut buffer);
        for (i, frame) in buffer.chunks_exact(2).enumerate() {
            let w = (i + 1) as f32 / 8.0;
            assert!((frame[0] - (1.0 - 0.5 * w)).abs() < 1e-4, "frame {}: {:?}", i, frame);
            assert!((frame[1] - 0.5 * w).abs() < 1e-4, "frame {}: {:?}", i, frame);
        }

        reader.read(8, &mut buffer);
        assert!(buffer.iter().all(|s| (s - 0.5).abs() < 1e-4));
    }

    #[test]
    fn test_length_follows_active_response() {
        let plan = Arc::new(FftPlan::new(16).unwrap());
        let mut hrtf = Hrtf::new(Arc::clone(&plan));
        let long = [1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let short = [1.0, 1.0];
        for (samples, azimuth) in [(&long[..], 0.0), (&short[..], 90.0)] {
            let response =
                ImpulseResponse::from_samples(samples, Specs::stereo(48000.0), &plan).unwrap();
            hrtf.add_impulse_response(response, azimuth, 0.0).unwrap();
        }
        let source = Arc::new(Source::default());
        let mut reader = BinauralReader::new(
            Box::new(VecReader::mono(vec![1.0; 20])),
            Arc::new(hrtf),
            Arc::clone(&source),
            pool(),
        )
        .unwrap();
        assert_eq!(reader.length(), Some(22));

        source.set_azimuth(90.0);
        let mut buffer = [0.0; 2];
        assert_eq!(reader.read(1, &mut buffer).frames, 1);
        assert_eq!(reader.length(), Some(20));
        let rest = read_to_end(&mut reader, usize::MAX);
        assert_eq!(rest.len() / 2 + 1, 20);
    }

    #[test]
    fn test_from_desc_checks_fft_size() {
        let desc = BinauralDesc::new().fft_size(32).threads(1);
        let hrtf = Arc::new(Hrtf::from_desc(&desc).unwrap());
        let sound: Arc<dyn Sound> = Arc::new(crate::reader::testing::VecSound {
            samples: vec![0.0; 4],
            channels: Channels::Mono,
        });
        assert!(Binaural::from_desc(
            &desc,
            Arc::clone(&sound),
            Arc::clone(&hrtf),
            Arc::new(Source::default())
        )
        .is_ok());

        let other = BinauralDesc::new().fft_size(64).threads(1);
        assert!(matches!(
            Binaural::from_desc(&other, sound, hrtf, Arc::new(Source::default())),
            Err(ResonarError::Configuration(_))
        ));
    }

    #[test]
    fn test_seek_restarts() {
        let hrtf = gain_hrtf(&[(0.0, 1.0, 2.0)]);
        let input: Vec<f32> = (0..30).map(|i| i as f32).collect();
        let mut reader = BinauralReader::new(
            Box::new(VecReader::mono(input)),
            hrtf,
            Arc::new(Source::default()),
            pool(),
        )
        .unwrap();
        read_to_end(&mut reader, 12);
        assert!(reader.seek(20));
        assert_eq!(reader.position(), 20);
        let out = read_to_end(&mut reader, usize::MAX);
        assert_eq!(out.len(), 20);
        assert!((out[0] - 20.0).abs() < 1e-4 && (out[1] - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_construction_errors() {
        let hrtf = gain_hrtf(&[(0.0, 1.0, 1.0)]);
        let stereo = VecReader::new(vec![0.0; 4], Channels::Stereo);
        assert!(BinauralReader::new(
            Box::new(stereo),
            Arc::clone(&hrtf),
            Arc::new(Source::default()),
            pool()
        )
        .is_err());

        let mut wrong_rate = VecReader::mono(vec![0.0; 4]);
        wrong_rate.specs = Specs::mono(44100.0);
        assert!(BinauralReader::new(
            Box::new(wrong_rate),
            hrtf,
            Arc::new(Source::default()),
            pool()
        )
        .is_err());

        let empty = Arc::new(Hrtf::new(Arc::new(FftPlan::new(16).unwrap())));
        assert!(BinauralReader::new(
            Box::new(VecReader::mono(vec![0.0])),
            empty,
            Arc::new(Source::default()),
            pool()
        )
        .is_err());
    }
}
