//! Resonar: a streaming audio graph with a software mixing device and an
//! HRTF binaural spatializer.
//!
//! Audio is described by immutable [`Sound`]s. Playing a Sound on a
//! [`Device`] creates a [`Reader`] for that playback and returns a [`Handle`]
//! to control it. Effects such as [`Delay`], [`IirFilter`], [`Double`] and
//! [`Binaural`] wrap other Sounds, so a chain of Sounds becomes a chain of
//! Readers that the device's mixing thread pulls from once per block.
//!
//! ```no_run
//! use resonar::{Device, DeviceDesc, Delay, Sine};
//! use std::sync::Arc;
//!
//! # fn main() -> resonar::Result<()> {
//! let device = Device::open_default(DeviceDesc::default())?;
//! let echo = Delay::new(Arc::new(Sine::new(440.0, 48000.0)?), 0.25);
//! let handle = device.play(&echo, false)?;
//! handle.set_volume(0.5);
//! # Ok(())
//! # }
//! ```

pub mod audio_data;
pub mod config;
pub mod device;
pub mod dsp;
pub mod error;
pub mod events;
pub mod fx;
pub mod hrtf;
pub mod math;
pub mod reader;
pub mod sink;
pub mod specs;

pub use audio_data::{AudioData, LoadOptions, MonoMode, load_audio_file};
pub use config::{BinauralDesc, DeviceDesc, SourceConfig};
pub use device::{
    Device, DeviceLock, DistanceModel, Handle, HandleId, SpatialDevice, SpatialHandle, Status,
};
pub use error::{ResonarError, Result};
pub use events::DeviceEvent;
pub use fx::{Binaural, Biquad, Delay, Double, IirFilter};
pub use hrtf::{Hrtf, ImpulseResponse, Source};
pub use reader::{ReadResult, Reader, Silence, Sine, Sound};
pub use sink::{CpalSink, NullSink, OutputSink};
pub use specs::{Channels, DeviceSpecs, SampleFormat, Specs};
