//! Shared fixtures for unit tests.

use image::{ImageBuffer, Luma};

use crate::calibrate::RingObservation;
use crate::conic::ring_points;
use crate::geometry::{BeamEnvironment, DetectorPose};

/// Cu Kα1 wavelength (Å).
pub(crate) const CU_KA1: f64 = 1.5405929;

/// First four silicon d-spacings (Å).
pub(crate) const SILICON_D: [f64; 4] = [3.1357, 1.92022, 1.63757, 1.3578];

/// Render a ring with a Gaussian radial profile of width `sigma` (pixels),
/// smoothed once more with `imageproc`.
pub(crate) fn blurred_ring_image(
    w: u32,
    h: u32,
    centre: [f64; 2],
    radius: f64,
    sigma: f64,
) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let mut img = ImageBuffer::<Luma<f32>, Vec<f32>>::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let d = (x as f64 - centre[0]).hypot(y as f64 - centre[1]);
            let v = (-(d - radius).powi(2) / (2.0 * sigma * sigma)).exp();
            img.put_pixel(x, y, Luma([v as f32]));
        }
    }
    imageproc::filter::gaussian_blur_f32(&img, 0.7)
}

/// Exact in-bounds ring points for each d-spacing reachable at `beam`.
pub(crate) fn synthetic_rings(
    pose: &DetectorPose,
    beam: &BeamEnvironment,
    d_spacings: &[f64],
    n: usize,
) -> Vec<RingObservation> {
    d_spacings
        .iter()
        .filter_map(|&d| {
            let tt = beam.scattering_angle(d)?;
            let points = ring_points(pose, tt, n, true);
            (points.len() >= 6).then(|| RingObservation::new(d, points))
        })
        .collect()
}
