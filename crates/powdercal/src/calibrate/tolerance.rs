use serde::{Deserialize, Serialize};

use crate::geometry::{wrap_degrees, BeamEnvironment, DetectorPose};

/// Angular noise (degrees of 2θ) at which [`FitTolerances::for_angular_noise`]
/// reaches its loosest values.
const NOISE_SATURATION_DEG: f64 = 0.05;

/// Acceptance bounds for a calibrated geometry against a reference.
///
/// Rings are symmetric about the beam, so a rotation of the detector about
/// the beam leaves them unchanged. Orientation is therefore compared through
/// the tilt between normal and beam and the roll of the detector relative to
/// the tilt direction; both are unchanged by such a rotation. Roll is loose
/// because the tilt direction is only weakly constrained at small tilt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitTolerances {
    /// Beam-centre distance (mm).
    pub distance_mm: f64,
    /// Difference of the normal-to-beam tilt (radians).
    pub tilt_rad: f64,
    /// Difference of the tilt direction in the pixel frame (degrees).
    pub roll_deg: f64,
    /// Wavelength difference (Å).
    pub wavelength_angstrom: f64,
}

impl FitTolerances {
    /// Bounds for fits on noise-free ring points.
    pub fn noise_free() -> Self {
        Self {
            distance_mm: 5.0,
            tilt_rad: 1e-2,
            roll_deg: 5.0,
            wavelength_angstrom: 1e-1,
        }
    }

    /// Bounds for ring points perturbed by `sigma_deg` of angular noise,
    /// interpolated linearly from [`noise_free`](Self::noise_free) up to a
    /// ceiling reached at 0.05°.
    pub fn for_angular_noise(sigma_deg: f64) -> Self {
        let t = (sigma_deg.abs() / NOISE_SATURATION_DEG).min(1.0);
        let base = Self::noise_free();
        Self {
            tilt_rad: base.tilt_rad + t * 0.5e-2,
            roll_deg: base.roll_deg + t * 55.0,
            ..base
        }
    }
}

impl Default for FitTolerances {
    fn default() -> Self {
        Self::noise_free()
    }
}

/// Differences between two detector geometries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseDeviation {
    pub distance_mm: f64,
    pub tilt_rad: f64,
    pub roll_deg: f64,
    pub wavelength_angstrom: f64,
    /// Beam-centre offset (pixels).
    pub beam_centre_px: f64,
}

impl PoseDeviation {
    pub fn between(
        pose: &DetectorPose,
        beam: &BeamEnvironment,
        reference: &DetectorPose,
        reference_beam: &BeamEnvironment,
    ) -> Self {
        let roll = pose.tilt_direction().to_degrees();
        let ref_roll = reference.tilt_direction().to_degrees();
        let [x, y] = pose.beam_centre_coords();
        let [rx, ry] = reference.beam_centre_coords();
        Self {
            distance_mm: (pose.beam_centre_distance() - reference.beam_centre_distance()).abs(),
            tilt_rad: (pose.tilt_angle() - reference.tilt_angle()).abs(),
            roll_deg: wrap_degrees(roll - ref_roll).abs(),
            wavelength_angstrom: (beam.wavelength() - reference_beam.wavelength()).abs(),
            beam_centre_px: (x - rx).hypot(y - ry),
        }
    }

    /// Whether every bounded component is within `tol`.
    pub fn accepts(&self, tol: &FitTolerances) -> bool {
        self.distance_mm <= tol.distance_mm
            && self.tilt_rad <= tol.tilt_rad
            && self.roll_deg <= tol.roll_deg
            && self.wavelength_angstrom <= tol.wavelength_angstrom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelGrid;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Vector3};

    #[test]
    fn noise_tolerances_interpolate_and_saturate() {
        assert_eq!(FitTolerances::for_angular_noise(0.0), FitTolerances::noise_free());
        let loose = FitTolerances::for_angular_noise(1.0);
        assert_relative_eq!(loose.tilt_rad, 1.5e-2);
        assert_relative_eq!(loose.roll_deg, 60.0);
        let mid = FitTolerances::for_angular_noise(0.025);
        assert_relative_eq!(mid.roll_deg, 32.5);
    }

    #[test]
    fn deviation_of_rolled_pose() {
        let grid = PixelGrid::square(1000, 1000, 0.1).unwrap();
        let beam = BeamEnvironment::from_wavelength(1.0).unwrap();
        let a = DetectorPose::from_beam_centre(100.0, [500.0, 500.0], [5.0, 0.0, 179.0], grid).unwrap();
        let b = DetectorPose::from_beam_centre(101.0, [503.0, 504.0], [5.0, 0.0, -179.0], grid).unwrap();
        let dev = PoseDeviation::between(&a, &beam, &b, &beam);
        assert_relative_eq!(dev.distance_mm, 1.0, epsilon = 1e-9);
        assert_relative_eq!(dev.roll_deg, 2.0, epsilon = 1e-9);
        assert_relative_eq!(dev.beam_centre_px, 5.0, epsilon = 1e-9);
        assert!(dev.tilt_rad < 1e-9);
        assert!(dev.accepts(&FitTolerances::noise_free()));
        assert!(!dev.accepts(&FitTolerances {
            distance_mm: 0.5,
            ..FitTolerances::noise_free()
        }));
    }

    #[test]
    fn rotation_about_beam_is_not_a_deviation() {
        let grid = PixelGrid::square(4000, 4000, 0.1).unwrap();
        let beam = BeamEnvironment::from_wavelength(1.5).unwrap();
        let truth = DetectorPose::from_beam_centre(150.0, [100.0, 2000.0], [30.0, 2.0, 10.0], grid).unwrap();
        let spun = truth.rotated(&Rotation3::from_axis_angle(&Vector3::z_axis(), 3f64.to_radians()));
        assert!(!spun.is_close(&truth, 1e-6, 1e-6));

        let dev = PoseDeviation::between(&spun, &beam, &truth, &beam);
        assert!(dev.distance_mm < 1e-9, "{:?}", dev);
        assert!(dev.tilt_rad < 1e-12, "{:?}", dev);
        assert!(dev.roll_deg < 1e-9, "{:?}", dev);
        assert!(dev.beam_centre_px < 1e-8, "{:?}", dev);
        assert!(dev.accepts(&FitTolerances::noise_free()));

        let mut tipped = truth.clone();
        tipped.set_normal_angles_in_degrees(31.0, 2.0, 10.0).unwrap();
        let dev = PoseDeviation::between(&tipped, &beam, &truth, &beam);
        assert!(dev.tilt_rad > 1e-2, "{:?}", dev);
    }
}
