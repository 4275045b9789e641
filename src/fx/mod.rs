//! Effects: Sounds wrapping other Sounds, and the Readers they create.
//!
//! Each effect Sound holds its inner Sound behind an `Arc` and builds a fresh
//! inner Reader per playback, so one effect chain can play many times at once.

mod binaural;
mod channel_mapper;
mod delay;
mod double;
mod iir;
mod resample;

pub use binaural::{Binaural, BinauralReader};
pub use channel_mapper::ChannelMapper;
pub use delay::{Delay, DelayReader};
pub use double::{Double, DoubleReader};
pub use iir::{Biquad, BiquadKind, IirFilter, IirFilterReader, biquad_coefficients};
pub use resample::ResampleReader;
