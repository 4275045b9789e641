//! Distance attenuation, cones, doppler and panning for spatial handles.
//!
//! Everything here is a pure function of listener and source parameters so
//! the mixer can evaluate it per block without touching shared state.

use crate::math::{self, Quat, Vec3};

/// Speed of sound in air in m/s.
pub const DEFAULT_SPEED_OF_SOUND: f32 = 343.3;

const EPSILON: f32 = 1e-6;

/// Bounds for the doppler pitch factor.
const MIN_DOPPLER: f32 = 1.0 / 16.0;
const MAX_DOPPLER: f32 = 16.0;

/// How gain falls off with distance.
///
/// The clamped variants treat distances below the reference distance as the
/// reference distance and distances beyond the maximum as the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceModel {
    /// No attenuation.
    None,
    /// `ref / (ref + rolloff * (d - ref))`
    Inverse,
    #[default]
    InverseClamped,
    /// `1 - rolloff * (d - ref) / (max - ref)`
    Linear,
    LinearClamped,
    /// `(d / ref) ^ -rolloff`
    Exponent,
    ExponentClamped,
}

impl DistanceModel {
    /// Gain for a source at `distance`.
    ///
    /// `attenuation` is the rolloff factor. Degenerate parameters (zero
    /// reference distance, maximum not above the reference) yield full gain.
    pub fn gain(self, distance: f32, reference: f32, maximum: f32, attenuation: f32) -> f32 {
        let clamped = matches!(
            self,
            Self::InverseClamped | Self::LinearClamped | Self::ExponentClamped
        );
        let distance = if clamped {
            // max/min instead of clamp: maximum may be below reference.
            distance.max(reference).min(maximum)
        } else {
            distance
        };

        let gain = match self {
            Self::None => 1.0,
            Self::Inverse | Self::InverseClamped => {
                let denominator = reference + attenuation * (distance - reference);
                if denominator <= EPSILON {
                    1.0
                } else {
                    reference / denominator
                }
            }
            Self::Linear | Self::LinearClamped => {
                let range = maximum - reference;
                if range <= EPSILON {
                    1.0
                } else {
                    1.0 - attenuation * (distance - reference) / range
                }
            }
            Self::Exponent | Self::ExponentClamped => {
                if reference <= EPSILON || distance <= EPSILON {
                    1.0
                } else {
                    (distance / reference).powf(-attenuation)
                }
            }
        };
        gain.max(0.0)
    }
}

/// Listener pose shared by all spatial handles of a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Listener {
    pub location: Vec3,
    pub velocity: Vec3,
    pub orientation: Quat,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            location: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

/// Per-handle 3D parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SpatialParams {
    pub location: Vec3,
    pub velocity: Vec3,
    pub orientation: Quat,
    /// Location and velocity are relative to the listener.
    pub relative: bool,
    pub volume_maximum: f32,
    pub volume_minimum: f32,
    pub distance_maximum: f32,
    pub distance_reference: f32,
    pub attenuation: f32,
    /// Full cone angles in degrees.
    pub cone_angle_outer: f32,
    pub cone_angle_inner: f32,
    pub cone_volume_outer: f32,
}

impl SpatialParams {
    pub fn at(location: Vec3) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self {
            location: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            relative: false,
            volume_maximum: 1.0,
            volume_minimum: 0.0,
            distance_maximum: f32::MAX,
            distance_reference: 1.0,
            attenuation: 1.0,
            cone_angle_outer: 360.0,
            cone_angle_inner: 360.0,
            cone_volume_outer: 0.0,
        }
    }
}

/// Device-wide spatial settings captured once per mixing cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Scene {
    pub listener: Listener,
    pub speed_of_sound: f32,
    pub doppler_factor: f32,
    pub distance_model: DistanceModel,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            listener: Listener::default(),
            speed_of_sound: DEFAULT_SPEED_OF_SOUND,
            doppler_factor: 1.0,
            distance_model: DistanceModel::default(),
        }
    }
}

/// What the mixer applies to one spatial handle for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SpatialMix {
    pub gain: f32,
    pub pitch: f32,
    /// Azimuth of the source as seen by the listener, `None` when the
    /// source sits on the listener.
    pub azimuth: Option<f32>,
}

impl Scene {
    pub fn evaluate(&self, params: &SpatialParams) -> SpatialMix {
        // Source to listener, and both velocities, in one common space.
        let (to_listener, listener_velocity) = if params.relative {
            (-params.location, Vec3::ZERO)
        } else {
            (
                self.listener.location - params.location,
                self.listener.velocity,
            )
        };
        let distance = to_listener.length();

        let mut gain = self.distance_model.gain(
            distance,
            params.distance_reference,
            params.distance_maximum,
            params.attenuation,
        );
        if distance > EPSILON {
            gain *= cone_gain(params, to_listener / distance);
        }
        let gain = gain.max(params.volume_minimum).min(params.volume_maximum);

        let pitch = doppler_pitch(
            to_listener,
            listener_velocity,
            params.velocity,
            self.speed_of_sound,
            self.doppler_factor,
        );

        let azimuth = (distance > EPSILON).then(|| {
            let local = if params.relative {
                params.location
            } else {
                self.listener.orientation.inverse() * (params.location - self.listener.location)
            };
            math::azimuth_elevation(local).0
        });

        SpatialMix {
            gain,
            pitch,
            azimuth,
        }
    }
}

/// Gain from the source's directivity cone. `direction` is the unit vector
/// from the source to the listener.
pub(crate) fn cone_gain(params: &SpatialParams, direction: Vec3) -> f32 {
    if params.cone_angle_outer >= 360.0 {
        return 1.0;
    }
    let facing = math::forward(params.orientation);
    // Compare against full cone angles.
    let angle = facing.dot(direction).clamp(-1.0, 1.0).acos().to_degrees() * 2.0;
    let inner = params.cone_angle_inner.min(params.cone_angle_outer);
    let outer = params.cone_angle_outer;

    if angle <= inner {
        1.0
    } else if angle >= outer {
        params.cone_volume_outer
    } else {
        let t = (angle - inner) / (outer - inner);
        1.0 + t * (params.cone_volume_outer - 1.0)
    }
}

/// Pitch factor of the doppler effect.
///
/// `to_listener` points from the source to the listener. Velocities
/// along it are clamped just below the speed of sound, so the factor stays
/// finite.
pub(crate) fn doppler_pitch(
    to_listener: Vec3,
    listener_velocity: Vec3,
    source_velocity: Vec3,
    speed_of_sound: f32,
    doppler_factor: f32,
) -> f32 {
    let distance = to_listener.length();
    if doppler_factor <= 0.0 || speed_of_sound <= 0.0 || distance <= EPSILON {
        return 1.0;
    }
    let direction = to_listener / distance;
    let limit = speed_of_sound / doppler_factor * (1.0 - 1e-3);
    let listener_speed = listener_velocity.dot(direction).min(limit);
    let source_speed = source_velocity.dot(direction).min(limit);

    let pitch = (speed_of_sound - doppler_factor * listener_speed)
        / (speed_of_sound - doppler_factor * source_speed);
    pitch.max(MIN_DOPPLER).min(MAX_DOPPLER)
}
