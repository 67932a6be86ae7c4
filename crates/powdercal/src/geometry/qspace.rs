use nalgebra::Vector3;

use super::{BeamEnvironment, DetectorPose};

/// Relative tolerance on `|k_f| = |k_i|` when mapping q back to a pixel.
const EWALD_TOL: f64 = 1e-6;

/// Pixel ↔ scattering-vector mapping for one detector and beam.
///
/// `q = k (ŝ - b̂)` with `k = 2π/λ`, `b̂` the beam direction and `ŝ` the unit
/// vector from the sample to the pixel. `|q| = 4π sin θ / λ`.
#[derive(Debug, Clone)]
pub struct QSpaceMapper {
    pose: DetectorPose,
    beam: BeamEnvironment,
}

impl QSpaceMapper {
    pub fn new(pose: &DetectorPose, beam: &BeamEnvironment) -> Self {
        Self {
            pose: pose.clone(),
            beam: *beam,
        }
    }

    pub fn pose(&self) -> &DetectorPose {
        &self.pose
    }

    pub fn beam(&self) -> &BeamEnvironment {
        &self.beam
    }

    /// Scattering vector (Å⁻¹) for pixel coordinates `(x, y)`.
    pub fn q_from_pixel(&self, x: f64, y: f64) -> Vector3<f64> {
        let s = self.pose.pixel_position(x, y).normalize();
        (s - self.pose.beam_vector()) * self.beam.wavenumber()
    }

    /// Pixel coordinates that scatter into `q`.
    ///
    /// `None` when `q` is off the Ewald sphere or the scattered ray misses
    /// the detector plane.
    pub fn pixel_from_q(&self, q: &Vector3<f64>) -> Option<[f64; 2]> {
        let s = self.pose.beam_vector() + q / self.beam.wavenumber();
        if (s.norm() - 1.0).abs() > EWALD_TOL {
            return None;
        }
        self.pose.pixel_coords_of_direction(&s)
    }

    /// `|q|` (Å⁻¹) at pixel `(x, y)`.
    pub fn q_magnitude_at_pixel(&self, x: f64, y: f64) -> f64 {
        let half = 0.5 * self.pose.pixel_scattering_angle(x, y);
        2.0 * self.beam.wavenumber() * half.sin()
    }

    /// Lattice spacing (Å) diffracting into pixel `(x, y)`; `+∞` on the
    /// direct beam.
    pub fn d_spacing_at_pixel(&self, x: f64, y: f64) -> f64 {
        let q = self.q_magnitude_at_pixel(x, y);
        if q > 0.0 {
            2.0 * std::f64::consts::PI / q
        } else {
            f64::INFINITY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{PixelGrid, PoseParameters};
    use approx::assert_relative_eq;

    fn mapper() -> QSpaceMapper {
        let pose = DetectorPose::from_parameters(
            &PoseParameters {
                distance: 150.0,
                beam_centre: [800.0, 1200.0],
                yaw: 12.0,
                pitch: -6.0,
                roll: 30.0,
            },
            PixelGrid::square(2048, 2048, 0.1).unwrap(),
        )
        .unwrap();
        QSpaceMapper::new(&pose, &BeamEnvironment::from_wavelength(1.0).unwrap())
    }

    #[test]
    fn beam_centre_has_zero_q() {
        let m = mapper();
        let bc = m.pose().beam_centre_coords();
        assert!(m.q_from_pixel(bc[0], bc[1]).norm() < 1e-9);
        assert!(m.d_spacing_at_pixel(bc[0], bc[1]) > 1e6);
    }

    #[test]
    fn pixel_q_pixel_round_trip() {
        let m = mapper();
        for &(x, y) in &[(0.0, 0.0), (100.5, 1900.25), (2047.0, 2047.0)] {
            let q = m.q_from_pixel(x, y);
            let p = m.pixel_from_q(&q).unwrap();
            assert_relative_eq!(p[0], x, epsilon = 1e-6);
            assert_relative_eq!(p[1], y, epsilon = 1e-6);
            assert_relative_eq!(q.norm(), m.q_magnitude_at_pixel(x, y), epsilon = 1e-12);
        }
    }

    #[test]
    fn d_spacing_satisfies_bragg() {
        let m = mapper();
        let tth = m.pose().pixel_scattering_angle(1500.0, 300.0);
        let d = m.d_spacing_at_pixel(1500.0, 300.0);
        assert_relative_eq!(2.0 * d * (0.5 * tth).sin(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn q_off_ewald_sphere_has_no_pixel() {
        let m = mapper();
        assert!(m.pixel_from_q(&Vector3::new(0.0, 0.0, 1.0)).is_none());
    }
}
