//! Debye–Scherrer rings as conic sections on a flat detector.
//!
//! A reflection at scattering angle `2θ` sends rays along a cone with apex
//! at the sample and axis along the beam. Intersecting that cone with the
//! detector plane gives the ring. In pixel coordinates the ring satisfies
//! `pᵀ M p = 0` with `p = origin + x·h·row + y·v·col` and
//! `M = b bᵀ − cos²(2θ) I`, which expands directly into the six conic
//! coefficients.

use nalgebra::{Matrix3, Vector3};

use std::f64::consts::{FRAC_PI_2, PI};

use super::types::{Circle, ConicCoeffs, ConicError, RingConic};
use crate::geometry::{beam_basis, BeamEnvironment, DetectorPose};

/// Angular band (radians) around `α + 2θ = 90°` classified as a parabola.
const PARABOLA_TOL: f64 = 1e-9;

/// Tilt (radians) below which a square-pixel detector draws exact circles.
const UNTILTED_TOL: f64 = 1e-9;

/// Perpendicular distance (mm) below which the plane contains the sample.
const PLANE_THROUGH_SAMPLE: f64 = 1e-12;

/// Conic coefficients, in pixel coordinates, of the full scattering cone at
/// `two_theta` (radians) intersected with the detector plane.
///
/// The coefficients are not normalised. Both nappes of the cone satisfy the
/// same quadric, so for hyperbolic rings the second branch belongs to the
/// back-scattering nappe at `π − 2θ`.
pub fn ring_conic_coeffs(pose: &DetectorPose, two_theta: f64) -> ConicCoeffs {
    let b = pose.beam_vector();
    let cos2 = two_theta.cos().powi(2);
    let m = b * b.transpose() - Matrix3::identity() * cos2;
    let u = pose.row_axis() * pose.h_size();
    let w = pose.column_axis() * pose.v_size();
    let a = pose.origin();
    let form = |p: &Vector3<f64>, q: &Vector3<f64>| p.dot(&(m * q));
    ConicCoeffs([
        form(&u, &u),
        2.0 * form(&u, &w),
        form(&w, &w),
        2.0 * form(&u, &a),
        2.0 * form(&w, &a),
        form(&a, &a),
    ])
}

/// Ring traced by scattering angle `two_theta` (radians).
///
/// With `α` the tilt between beam and plane normal, the ring is closed when
/// every cone ray reaches the plane (`α + 2θ < 90°`), a parabola on the
/// boundary and a hyperbola when only part of the cone hits. An untilted
/// detector with square pixels yields a [`Circle`] of radius
/// `D·tan(2θ) / pixel` centred on the beam.
pub fn conic_from_angle(pose: &DetectorPose, two_theta: f64) -> Result<RingConic, ConicError> {
    if !(two_theta > 0.0 && two_theta < PI) {
        return Err(ConicError::NoSolution("scattering angle outside (0, 180°)"));
    }
    let distance = pose.perpendicular_distance();
    if !(distance > PLANE_THROUGH_SAMPLE) {
        return Err(ConicError::NoSolution("detector plane contains the sample"));
    }

    let alpha = pose.tilt_angle();
    if (alpha - two_theta).abs() >= FRAC_PI_2 - PARABOLA_TOL {
        return Err(ConicError::NoSolution("scattering cone misses the detector plane"));
    }

    // Widest angle between a cone ray and the normal towards the plane.
    let widest = if alpha + two_theta > PI {
        2.0 * PI - alpha - two_theta
    } else {
        alpha + two_theta
    };

    if widest < FRAC_PI_2 - PARABOLA_TOL {
        if alpha.sin() < UNTILTED_TOL && pose.grid().is_square() {
            let [cx, cy] = pose.pixel_coords(&pose.closest_point());
            return Ok(RingConic::Circle(Circle {
                cx,
                cy,
                r: distance * two_theta.tan().abs() / pose.h_size(),
            }));
        }
        let ellipse = ring_conic_coeffs(pose, two_theta)
            .to_ellipse()
            .ok_or(ConicError::Degenerate)?;
        return Ok(RingConic::from_ellipse(ellipse));
    }

    let coeffs = ring_conic_coeffs(pose, two_theta);
    if (widest - FRAC_PI_2).abs() <= PARABOLA_TOL {
        coeffs
            .to_parabola()
            .map(RingConic::Parabola)
            .ok_or(ConicError::Degenerate)
    } else {
        coeffs
            .to_hyperbola()
            .map(RingConic::Hyperbola)
            .ok_or(ConicError::Degenerate)
    }
}

/// Ring of the reflection with lattice spacing `d_spacing` (Å).
pub fn conic_from_d_spacing(
    pose: &DetectorPose,
    beam: &BeamEnvironment,
    d_spacing: f64,
) -> Result<RingConic, ConicError> {
    let two_theta = beam
        .scattering_angle(d_spacing)
        .ok_or(ConicError::NoSolution("wavelength exceeds twice the d-spacing"))?;
    conic_from_angle(pose, two_theta)
}

/// One [`conic_from_angle`] result per input angle; a failure for one angle
/// does not affect the others.
pub fn conics_from_angles(
    pose: &DetectorPose,
    two_thetas: &[f64],
) -> Vec<Result<RingConic, ConicError>> {
    two_thetas
        .iter()
        .map(|&tt| conic_from_angle(pose, tt))
        .collect()
}

/// Pixel positions where `n` rays of the `two_theta` cone, evenly spaced in
/// azimuth, hit the detector plane. Rays missing the plane are dropped, as
/// are hits outside the pixel grid when `within_bounds` is set.
pub fn ring_points(
    pose: &DetectorPose,
    two_theta: f64,
    n: usize,
    within_bounds: bool,
) -> Vec<[f64; 2]> {
    let b = pose.beam_vector();
    let (u, w) = beam_basis(&b);
    let (sin_tt, cos_tt) = two_theta.sin_cos();
    (0..n)
        .filter_map(|i| {
            let psi = 2.0 * PI * (i as f64) / (n as f64);
            let (sin_psi, cos_psi) = psi.sin_cos();
            let ray = b * cos_tt + (u * cos_psi + w * sin_psi) * sin_tt;
            pose.pixel_coords_of_direction(&ray)
        })
        .filter(|&[x, y]| !within_bounds || pose.is_inside(x, y))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conic::ConicKind;
    use crate::geometry::PixelGrid;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn grid() -> PixelGrid {
        PixelGrid::square(2048, 2048, 0.172).unwrap()
    }

    fn pose(distance: f64, bc: [f64; 2], angles: [f64; 3]) -> DetectorPose {
        DetectorPose::from_beam_centre(distance, bc, angles, grid()).unwrap()
    }

    fn assert_on_conic(conic: &RingConic, points: &[[f64; 2]], tol: f64) {
        let coeffs = conic.coeffs();
        for &[x, y] in points {
            let d = coeffs.sampson_distance(x, y);
            assert!(d < tol, "point ({x}, {y}) is {d} px off the ring");
        }
    }

    #[test]
    fn untilted_square_pixels_give_circle() {
        let pose = pose(200.0, [1024.0, 1000.0], [0.0, 0.0, 35.0]);
        let tt = 10f64.to_radians();
        let RingConic::Circle(c) = conic_from_angle(&pose, tt).unwrap() else {
            panic!("expected a circle");
        };
        assert_relative_eq!(c.cx, 1024.0, epsilon = 1e-7);
        assert_relative_eq!(c.cy, 1000.0, epsilon = 1e-7);
        assert_relative_eq!(c.r, 200.0 * tt.tan() / 0.172, epsilon = 1e-7);
        assert_on_conic(&RingConic::Circle(c), &ring_points(&pose, tt, 90, false), 1e-6);
    }

    #[test]
    fn rectangular_pixels_give_axis_aligned_ellipse() {
        let grid = PixelGrid::new(1000, 1000, 0.1, 0.2).unwrap();
        let pose = DetectorPose::from_beam_centre(100.0, [500.0, 500.0], [0.0; 3], grid).unwrap();
        let tt = 15f64.to_radians();
        let RingConic::Ellipse(e) = conic_from_angle(&pose, tt).unwrap() else {
            panic!("expected an ellipse");
        };
        let radius_mm = 100.0 * tt.tan();
        assert_relative_eq!(e.a, radius_mm / 0.1, epsilon = 1e-7);
        assert_relative_eq!(e.b, radius_mm / 0.2, epsilon = 1e-7);
        assert_abs_diff_eq!(e.angle, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn yaw_tilt_gives_ellipse_with_expected_major_axis() {
        let (yaw, roll) = (20.0f64, 30.0f64);
        let pose = pose(200.0, [1024.0, 1024.0], [yaw, 0.0, roll]);
        let tt = 15f64.to_radians();
        let alpha = yaw.to_radians();
        assert_relative_eq!(pose.tilt_angle(), alpha, epsilon = 1e-12);

        let RingConic::Ellipse(e) = conic_from_angle(&pose, tt).unwrap() else {
            panic!("expected an ellipse");
        };
        let l = pose.perpendicular_distance();
        let major = 0.5 * l * ((alpha + tt).tan() - (alpha - tt).tan()) / 0.172;
        assert_relative_eq!(e.a, major, max_relative = 1e-9);
        assert!(e.b < e.a);
        assert_relative_eq!(e.angle, (-roll).to_radians(), epsilon = 1e-9);

        let pts = ring_points(&pose, tt, 120, true);
        assert_eq!(pts.len(), 120);
        assert_on_conic(&RingConic::Ellipse(e), &pts, 1e-6);
        for &[x, y] in &pts {
            assert_relative_eq!(pose.pixel_scattering_angle(x, y), tt, epsilon = 1e-9);
        }
    }

    #[test]
    fn boundary_cone_gives_parabola() {
        let pose = pose(150.0, [300.0, 1024.0], [30.0, 0.0, 0.0]);
        let tt = 60f64.to_radians();
        let conic = conic_from_angle(&pose, tt).unwrap();
        assert_eq!(conic.kind(), ConicKind::Parabola);
        let pts = ring_points(&pose, tt, 720, true);
        assert!(pts.len() > 20);
        assert_on_conic(&conic, &pts, 1e-5);
    }

    #[test]
    fn steep_cone_gives_hyperbola() {
        let pose = pose(150.0, [300.0, 1024.0], [40.0, 0.0, 0.0]);
        let tt = 70f64.to_radians();
        let conic = conic_from_angle(&pose, tt).unwrap();
        assert_eq!(conic.kind(), ConicKind::Hyperbola);
        let pts = ring_points(&pose, tt, 720, true);
        assert!(pts.len() > 20);
        assert_on_conic(&conic, &pts, 1e-5);
    }

    #[test]
    fn unreachable_rings_have_no_solution() {
        let pose = pose(200.0, [1024.0, 1024.0], [0.0; 3]);
        for tt in [0.0, 100f64.to_radians(), PI, f64::NAN] {
            assert!(matches!(
                conic_from_angle(&pose, tt),
                Err(ConicError::NoSolution(_))
            ));
        }
        let beam = BeamEnvironment::from_wavelength(1.54).unwrap();
        assert!(matches!(
            conic_from_d_spacing(&pose, &beam, 0.5),
            Err(ConicError::NoSolution(_))
        ));
        assert!(ring_points(&pose, 100f64.to_radians(), 36, false).is_empty());
    }

    #[test]
    fn d_spacing_matches_bragg_angle() {
        let pose = pose(200.0, [1024.0, 1024.0], [0.0; 3]);
        let beam = BeamEnvironment::from_wavelength(1.5405929).unwrap();
        let d: f64 = 3.1357;
        let tt = 2.0 * (1.5405929 / (2.0 * d)).asin();
        assert_eq!(
            conic_from_d_spacing(&pose, &beam, d).unwrap(),
            conic_from_angle(&pose, tt).unwrap()
        );
    }

    #[test]
    fn angles_are_independent() {
        let pose = pose(200.0, [1024.0, 1024.0], [10.0, -5.0, 0.0]);
        let angles = [10f64.to_radians(), 120f64.to_radians(), 20f64.to_radians()];
        let all = conics_from_angles(&pose, &angles);
        assert_eq!(all.len(), 3);
        assert!(all[1].is_err());
        assert_eq!(all[0], conic_from_angle(&pose, angles[0]));
        assert_eq!(all[2], conic_from_angle(&pose, angles[2]));
    }
}
