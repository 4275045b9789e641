use super::OutputSink;
use crate::error::{ResonarError, Result};
use crate::specs::DeviceSpecs;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Plays a device's stream on the default cpal output device.
///
/// The mixing thread pushes blocks into a ring buffer holding
/// `latency_blocks` blocks; the cpal callback drains it and plays silence
/// when it runs dry.
pub struct CpalSink {
    stream: cpal::Stream,
    producer: HeapProd<f32>,
    failed: Arc<AtomicBool>,
    frames_played: Arc<AtomicUsize>,
    /// How long to wait for room in the ring buffer.
    backoff: Duration,
}

impl CpalSink {
    pub fn open(specs: DeviceSpecs, block_size: usize, latency_blocks: usize) -> Result<Self> {
        let channels = specs.specs.frame_len();
        let sample_rate = specs.specs.rate as u32;

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            ResonarError::AudioDevice("No default output device available".into())
        })?;

        let config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(block_size as u32),
        };

        let default_config = device.default_output_config().map_err(|e| {
            ResonarError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;

        let capacity = block_size * channels * latency_blocks.max(1);
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let failed = Arc::new(AtomicBool::new(false));
        let frames_played = Arc::new(AtomicUsize::new(0));

        let streams = StreamParts {
            consumer,
            failed: Arc::clone(&failed),
            frames_played: Arc::clone(&frames_played),
            channels,
        };
        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => streams.build::<f32>(&device, &config)?,
            cpal::SampleFormat::I16 => streams.build::<i16>(&device, &config)?,
            cpal::SampleFormat::U16 => streams.build::<u16>(&device, &config)?,
            other => {
                return Err(ResonarError::AudioFormat(format!(
                    "Unsupported output sample format: {:?}",
                    other
                )));
            }
        };
        if default_config.sample_format() != cpal::SampleFormat::F32 {
            log::debug!(
                "Output device uses {:?}, requested {:?}",
                default_config.sample_format(),
                specs.format
            );
        }

        stream
            .play()
            .map_err(|e| ResonarError::AudioDevice(format!("Failed to start stream: {}", e)))?;

        log::info!(
            "Opened cpal output: {} Hz, {} channels, {} blocks of latency",
            sample_rate,
            channels,
            latency_blocks
        );

        Ok(Self {
            stream,
            producer,
            failed,
            frames_played,
            backoff: Duration::from_secs_f64(block_size as f64 / sample_rate as f64 / 4.0),
        })
    }

    /// Frames handed to the hardware so far, silence included.
    pub fn frames_played(&self) -> usize {
        self.frames_played.load(Ordering::Relaxed)
    }
}

impl OutputSink for CpalSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let mut written = 0;
        while written < samples.len() {
            if self.failed.load(Ordering::Acquire) {
                return Err(ResonarError::AudioDevice("Output stream failed".into()));
            }
            written += self.producer.push_slice(&samples[written..]);
            if written < samples.len() {
                std::thread::sleep(self.backoff);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::warn!("Failed to pause output stream: {}", e);
        }
        log::info!("Closed cpal output after {} frames", self.frames_played());
    }
}

/// State moved into the cpal callbacks.
struct StreamParts {
    consumer: HeapCons<f32>,
    failed: Arc<AtomicBool>,
    frames_played: Arc<AtomicUsize>,
    channels: usize,
}

impl StreamParts {
    fn build<T>(self, device: &cpal::Device, config: &cpal::StreamConfig) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let Self {
            mut consumer,
            failed,
            frames_played,
            channels,
        } = self;

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        *sample = T::from_sample(consumer.try_pop().unwrap_or(0.0));
                    }
                    frames_played.fetch_add(data.len() / channels, Ordering::Relaxed);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                    failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| ResonarError::AudioDevice(format!("Failed to build stream: {}", e)))
    }
}
