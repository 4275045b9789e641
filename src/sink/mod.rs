//! Output sinks consume the mixed stream of a device's mixing thread.

mod cpal_sink;

pub use cpal_sink::CpalSink;

use crate::error::Result;
use crate::specs::DeviceSpecs;
use std::time::Duration;

/// Destination of a device's mixed samples.
///
/// The mixing thread calls [`write`](OutputSink::write) once per block with
/// interleaved `f32` samples in the device's specs. Sinks convert to their
/// own sample format and block while they have no room, which paces the
/// mixing thread. Samples may exceed [-1, 1]; clipping is up to the sink.
pub trait OutputSink {
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Called once when the mixing thread stops.
    fn close(&mut self) {}
}

/// Discards samples in real time.
pub struct NullSink {
    rate: f64,
    channels: usize,
}

impl NullSink {
    pub fn new(specs: DeviceSpecs) -> Self {
        Self {
            rate: specs.specs.rate,
            channels: specs.specs.frame_len(),
        }
    }
}

impl OutputSink for NullSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let frames = samples.len() / self.channels;
        std::thread::sleep(Duration::from_secs_f64(frames as f64 / self.rate));
        Ok(())
    }
}
