//! Signal processing building blocks used by the binaural renderer.

mod convolver;
mod fft;
mod thread_pool;

pub use convolver::{ConvolveResult, Convolver, FilterPartitions};
pub use fft::FftPlan;
pub use thread_pool::{TaskHandle, ThreadPool};
