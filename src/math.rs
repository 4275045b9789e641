//! Math types for Resonar

pub use glam::{Quat, Vec3};

/// Direction an orientation faces. Listeners and sources look down -Z.
pub fn forward(orientation: Quat) -> Vec3 {
    orientation * (-Vec3::Z)
}

/// Converts a direction into (azimuth, elevation) in degrees.
///
/// Azimuth is measured clockwise from straight ahead (-Z) when looking down
/// from +Y, so a source on the right (+X) is at 90°. The result lies in
/// `[0, 360)`. Elevation is positive above the horizontal plane.
pub fn azimuth_elevation(direction: Vec3) -> (f32, f32) {
    let length = direction.length();
    if length <= f32::EPSILON {
        return (0.0, 0.0);
    }
    let d = direction / length;
    let elevation = d.y.clamp(-1.0, 1.0).asin().to_degrees();
    let mut azimuth = d.x.atan2(-d.z).to_degrees();
    if azimuth < 0.0 {
        azimuth += 360.0;
    }
    if azimuth >= 360.0 {
        azimuth -= 360.0;
    }
    (azimuth, elevation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_of_identity() {
        assert_eq!(forward(Quat::IDENTITY), Vec3::new(0.0, 0.0, -1.0));
        let turned = Quat::from_rotation_y(-std::f32::consts::FRAC_PI_2);
        assert!((forward(turned) - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_azimuth_elevation() {
        let (az, el) = azimuth_elevation(Vec3::new(0.0, 0.0, -2.0));
        assert!(az.abs() < 1e-4 && el.abs() < 1e-4);

        let (az, _) = azimuth_elevation(Vec3::new(1.0, 0.0, 0.0));
        assert!((az - 90.0).abs() < 1e-4);

        let (az, _) = azimuth_elevation(Vec3::new(-1.0, 0.0, 0.0));
        assert!((az - 270.0).abs() < 1e-4);

        let (_, el) = azimuth_elevation(Vec3::new(0.0, 1.0, 0.0));
        assert!((el - 90.0).abs() < 1e-4);

        assert_eq!(azimuth_elevation(Vec3::ZERO), (0.0, 0.0));
    }
}
