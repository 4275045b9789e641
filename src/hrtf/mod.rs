//! Head-related transfer functions.
//!
//! An [`Hrtf`] holds measured stereo impulse responses keyed by direction.
//! The binaural reader convolves a mono signal with the response closest to
//! the direction of its [`Source`].

mod impulse_response;
mod source;

pub use impulse_response::ImpulseResponse;
pub use source::Source;

use crate::config::BinauralDesc;
use crate::dsp::FftPlan;
use crate::error::{ResonarError, Result};
use crate::reader::Sound;
use crate::specs::{Channels, Specs};
use source::normalize_azimuth;
use std::sync::Arc;

/// Result of a direction lookup: the response and the direction it was
/// actually measured at.
#[derive(Debug, Clone)]
pub struct HrtfLookup {
    pub response: Arc<ImpulseResponse>,
    pub azimuth: f32,
    pub elevation: f32,
}

struct Ring {
    elevation: f32,
    /// Sorted by azimuth.
    responses: Vec<(f32, Arc<ImpulseResponse>)>,
}

/// Direction-indexed store of stereo impulse responses.
///
/// Filled once, then shared read-only (usually behind an `Arc`) by any
/// number of binaural readers. All responses share one sample rate and are
/// prepared for the store's FFT plan.
pub struct Hrtf {
    plan: Arc<FftPlan>,
    specs: Option<Specs>,
    /// Sorted by elevation.
    rings: Vec<Ring>,
    count: usize,
}

impl Hrtf {
    pub fn new(plan: Arc<FftPlan>) -> Self {
        Self {
            plan,
            specs: None,
            rings: Vec::new(),
            count: 0,
        }
    }

    /// Creates an empty store with an FFT plan of `desc.fft_size` points.
    pub fn from_desc(desc: &BinauralDesc) -> Result<Self> {
        desc.validate()?;
        Ok(Self::new(Arc::new(FftPlan::new(desc.fft_size)?)))
    }

    pub fn plan(&self) -> &Arc<FftPlan> {
        &self.plan
    }

    /// Specs shared by all responses, `None` while empty.
    pub fn specs(&self) -> Option<Specs> {
        self.specs
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Prepares `sound` and stores it for the given direction.
    pub fn add_sound(&mut self, sound: &dyn Sound, azimuth: f32, elevation: f32) -> Result<()> {
        let response = ImpulseResponse::from_sound(sound, &self.plan)?;
        self.add_impulse_response(response, azimuth, elevation)
    }

    /// Stores a response for a direction, replacing any previous one there.
    ///
    /// Responses must be stereo (left, right), match the sample rate of the
    /// responses already stored and be prepared with this store's plan.
    pub fn add_impulse_response(
        &mut self,
        response: ImpulseResponse,
        azimuth: f32,
        elevation: f32,
    ) -> Result<()> {
        let specs = response.specs();
        if specs.channels != Channels::Stereo {
            return Err(ResonarError::Hrtf(format!(
                "HRTF responses must be stereo, got {} channels",
                specs.channels.count()
            )));
        }
        if let Some(existing) = self.specs {
            if existing.rate != specs.rate {
                return Err(ResonarError::Hrtf(format!(
                    "HRTF response at {} Hz does not match the store's {} Hz",
                    specs.rate, existing.rate
                )));
            }
        }
        if let Some(partitions) = response.channel(0) {
            if partitions.fft_size() != self.plan.size() {
                return Err(ResonarError::Hrtf(format!(
                    "HRTF response was prepared for a {}-point FFT, store uses {}",
                    partitions.fft_size(),
                    self.plan.size()
                )));
            }
        }
        if !elevation.is_finite() {
            return Err(ResonarError::Hrtf("Elevation must be finite".to_string()));
        }

        let azimuth = normalize_azimuth(azimuth);
        let elevation = elevation.clamp(-90.0, 90.0);
        let response = Arc::new(response);

        let ring = match self
            .rings
            .binary_search_by(|ring| ring.elevation.total_cmp(&elevation))
        {
            Ok(index) => &mut self.rings[index],
            Err(index) => {
                self.rings.insert(
                    index,
                    Ring {
                        elevation,
                        responses: Vec::new(),
                    },
                );
                &mut self.rings[index]
            }
        };
        match ring
            .responses
            .binary_search_by(|(a, _)| a.total_cmp(&azimuth))
        {
            Ok(index) => ring.responses[index].1 = response,
            Err(index) => {
                ring.responses.insert(index, (azimuth, response));
                self.count += 1;
            }
        }

        self.specs = Some(specs);
        Ok(())
    }

    /// Finds the stored response closest to a direction.
    ///
    /// Picks the nearest measured elevation first, then the nearest azimuth
    /// within it, wrapping around at 360°. Returns `None` when empty.
    pub fn impulse_response(&self, azimuth: f32, elevation: f32) -> Option<HrtfLookup> {
        let ring = self.rings.iter().min_by(|a, b| {
            (a.elevation - elevation)
                .abs()
                .total_cmp(&(b.elevation - elevation).abs())
        })?;

        let azimuth = normalize_azimuth(azimuth);
        let (found, response) = ring.responses.iter().min_by(|(a, _), (b, _)| {
            angular_distance(*a, azimuth).total_cmp(&angular_distance(*b, azimuth))
        })?;

        Some(HrtfLookup {
            response: Arc::clone(response),
            azimuth: *found,
            elevation: ring.elevation,
        })
    }
}

fn angular_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}
