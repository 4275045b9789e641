use crate::math::{self, Vec3};
use std::sync::atomic::{AtomicU32, Ordering};

/// Direction and distance of a binaural source relative to the listener.
///
/// Shared between the application, which moves the source, and the reader
/// rendering it. Each value is stored atomically on its own, so a reader
/// may observe an azimuth from one update and an elevation from the next.
#[derive(Debug)]
pub struct Source {
    azimuth: AtomicU32,
    elevation: AtomicU32,
    distance: AtomicU32,
}

impl Source {
    /// Angles in degrees; azimuth clockwise from the front, elevation upwards.
    pub fn new(azimuth: f32, elevation: f32, distance: f32) -> Self {
        let source = Self {
            azimuth: AtomicU32::new(0),
            elevation: AtomicU32::new(0),
            distance: AtomicU32::new(0),
        };
        source.set_azimuth(azimuth);
        source.set_elevation(elevation);
        source.set_distance(distance);
        source
    }

    pub fn azimuth(&self) -> f32 {
        load(&self.azimuth)
    }

    /// Wraps into `[0, 360)`.
    pub fn set_azimuth(&self, azimuth: f32) {
        store(&self.azimuth, normalize_azimuth(azimuth));
    }

    pub fn elevation(&self) -> f32 {
        load(&self.elevation)
    }

    /// Clamps into `[-90, 90]`.
    pub fn set_elevation(&self, elevation: f32) {
        if elevation.is_finite() {
            store(&self.elevation, elevation.clamp(-90.0, 90.0));
        }
    }

    pub fn distance(&self) -> f32 {
        load(&self.distance)
    }

    pub fn set_distance(&self, distance: f32) {
        if distance.is_finite() {
            store(&self.distance, distance.max(0.0));
        }
    }

    /// Points the source along `direction`, given in listener space.
    pub fn set_direction(&self, direction: Vec3) {
        let (azimuth, elevation) = math::azimuth_elevation(direction);
        self.set_azimuth(azimuth);
        self.set_elevation(elevation);
        self.set_distance(direction.length());
    }
}

impl Default for Source {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }
}

pub(crate) fn normalize_azimuth(azimuth: f32) -> f32 {
    if !azimuth.is_finite() {
        return 0.0;
    }
    let wrapped = azimuth.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

fn load(value: &AtomicU32) -> f32 {
    f32::from_bits(value.load(Ordering::Relaxed))
}

fn store(value: &AtomicU32, v: f32) {
    value.store(v.to_bits(), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angles_are_normalised() {
        let source = Source::new(-90.0, 120.0, -1.0);
        assert_eq!(source.azimuth(), 270.0);
        assert_eq!(source.elevation(), 90.0);
        assert_eq!(source.distance(), 0.0);

        source.set_azimuth(720.0);
        assert_eq!(source.azimuth(), 0.0);
        source.set_azimuth(f32::NAN);
        assert_eq!(source.azimuth(), 0.0);
    }

    #[test]
    fn test_set_direction() {
        let source = Source::default();
        source.set_direction(Vec3::new(2.0, 0.0, 0.0));
        assert!((source.azimuth() - 90.0).abs() < 1e-4);
        assert!(source.elevation().abs() < 1e-4);
        assert!((source.distance() - 2.0).abs() < 1e-6);
    }
}
