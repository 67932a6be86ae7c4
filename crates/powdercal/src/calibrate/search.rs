//! Radial peak search for ring points in an intensity image.

use image::{GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use super::CalibrationError;
use crate::conic::Circle;
use crate::monitor::ProgressMonitor;

/// Peaks must rise this many `f32` epsilons (relative to the peak value)
/// above the lowest sample, so interpolation rounding on flat regions is
/// never taken for a ring.
const PEAK_NOISE_EPSILONS: f32 = 16.0;

/// Configuration for [`find_pois_near_circle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSearchConfig {
    /// Number of evenly spaced rays around the circle.
    pub n_angles: usize,
    /// Radial search half-width around the approximate radius (pixels).
    pub half_width_px: f64,
    /// Step along each ray (pixels).
    pub step_px: f64,
    /// Minimum peak height above the lowest sample on the ray. A floor of a
    /// few `f32` rounding steps applies even when this is zero.
    pub min_peak_contrast: f32,
    /// Refine the peak position with a parabola through its neighbours.
    pub subpixel: bool,
}

impl Default for RingSearchConfig {
    fn default() -> Self {
        Self {
            n_angles: 360,
            half_width_px: 10.0,
            step_px: 0.5,
            min_peak_contrast: 0.0,
            subpixel: true,
        }
    }
}

/// Bilinear sample of `image` at `(x, y)`.
///
/// `None` when any of the four contributing pixels lies outside the image
/// or is masked (non-zero in `mask`).
fn sample(
    image: &ImageBuffer<Luma<f32>, Vec<f32>>,
    mask: Option<&GrayImage>,
    x: f64,
    y: f64,
) -> Option<f32> {
    let (w, h) = image.dimensions();
    if w < 2 || h < 2 || !(x >= 0.0 && y >= 0.0) {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    if x0 >= w - 1 || y0 >= h - 1 {
        return None;
    }
    if let Some(mask) = mask {
        let masked = [(x0, y0), (x0 + 1, y0), (x0, y0 + 1), (x0 + 1, y0 + 1)]
            .iter()
            .any(|&(mx, my)| mask.get_pixel(mx, my)[0] != 0);
        if masked {
            return None;
        }
    }

    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;
    let p00 = image.get_pixel(x0, y0)[0];
    let p10 = image.get_pixel(x0 + 1, y0)[0];
    let p01 = image.get_pixel(x0, y0 + 1)[0];
    let p11 = image.get_pixel(x0 + 1, y0 + 1)[0];
    let v = (1.0 - fx) * (1.0 - fy) * p00 + fx * (1.0 - fy) * p10 + (1.0 - fx) * fy * p01 + fx * fy * p11;
    v.is_finite().then_some(v)
}

/// Radius of the strongest interior maximum of one radial profile.
///
/// Samples are `(radius, value)` pairs; `None` entries break contiguity, so
/// a maximum only counts when both neighbours were sampled.
fn profile_peak(profile: &[(f64, Option<f32>)], config: &RingSearchConfig) -> Option<f64> {
    let mut best: Option<(usize, f32)> = None;
    let mut lowest = f32::INFINITY;
    for i in 0..profile.len() {
        let Some(v) = profile[i].1 else {
            continue;
        };
        lowest = lowest.min(v);
        if i == 0 || i + 1 == profile.len() {
            continue;
        }
        let (Some(prev), Some(next)) = (profile[i - 1].1, profile[i + 1].1) else {
            continue;
        };
        let is_max = v >= prev && v > next;
        if is_max && best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    let (i, v) = best?;
    let noise_floor = PEAK_NOISE_EPSILONS * f32::EPSILON * v.abs().max(lowest.abs());
    let contrast = v - lowest;
    if contrast <= noise_floor || contrast < config.min_peak_contrast {
        return None;
    }
    let r = profile[i].0;
    if !config.subpixel {
        return Some(r);
    }
    let (prev, next) = (profile[i - 1].1? as f64, profile[i + 1].1? as f64);
    let denom = prev - 2.0 * v as f64 + next;
    let offset = if denom.abs() > 1e-12 {
        (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    Some(r + offset * config.step_px)
}

/// Search radial rays around `approx` for the intensity peak of a ring.
///
/// Each of the `n_angles` rays is sampled from `r − half_width` to
/// `r + half_width`; the strongest interior local maximum gives one point.
/// Rays without a peak (flat, masked or leaving the image) are skipped.
pub fn find_pois_near_circle(
    monitor: &dyn ProgressMonitor,
    image: &ImageBuffer<Luma<f32>, Vec<f32>>,
    mask: Option<&GrayImage>,
    approx: &Circle,
    config: &RingSearchConfig,
) -> Result<Vec<[f64; 2]>, CalibrationError> {
    if !approx.is_valid() {
        return Err(CalibrationError::InvalidInput(format!(
            "approximate circle {:?} is not valid",
            approx
        )));
    }
    if !(config.step_px > 0.0 && config.half_width_px >= config.step_px) {
        return Err(CalibrationError::InvalidInput(
            "search step must be positive and no wider than the half-width".into(),
        ));
    }
    if let Some(mask) = mask {
        if mask.dimensions() != image.dimensions() {
            return Err(CalibrationError::InvalidInput(format!(
                "mask is {:?} but image is {:?}",
                mask.dimensions(),
                image.dimensions()
            )));
        }
    }

    let n_steps = (2.0 * config.half_width_px / config.step_px).round() as usize + 1;
    let r_start = approx.r - config.half_width_px;
    let mut profile = Vec::with_capacity(n_steps);
    let mut points = Vec::with_capacity(config.n_angles);

    for k in 0..config.n_angles {
        if monitor.is_cancelled() {
            return Err(CalibrationError::Cancelled);
        }
        monitor.worked(1);

        let angle = std::f64::consts::TAU * k as f64 / config.n_angles as f64;
        let (s, c) = angle.sin_cos();
        profile.clear();
        for j in 0..n_steps {
            let r = r_start + j as f64 * config.step_px;
            let value = if r > 0.0 {
                sample(image, mask, approx.cx + r * c, approx.cy + r * s)
            } else {
                None
            };
            profile.push((r, value));
        }
        if let Some(r) = profile_peak(&profile, config) {
            points.push([approx.cx + r * c, approx.cy + r * s]);
        }
    }

    tracing::debug!(
        found = points.len(),
        skipped = config.n_angles - points.len(),
        "ring point search"
    );
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::NoopMonitor;
    use crate::test_utils::blurred_ring_image;
    use std::sync::atomic::AtomicBool;

    const CENTRE: [f64; 2] = [128.3, 127.6];
    const RADIUS: f64 = 80.0;

    fn approx_circle() -> Circle {
        Circle {
            cx: CENTRE[0] + 2.0,
            cy: CENTRE[1] - 1.0,
            r: RADIUS - 3.0,
        }
    }

    #[test]
    fn bilinear_sample_interpolates() {
        let mut img = ImageBuffer::<Luma<f32>, Vec<f32>>::new(4, 4);
        img.put_pixel(1, 1, Luma([1.0]));
        img.put_pixel(2, 1, Luma([3.0]));
        let v = sample(&img, None, 1.5, 1.0).unwrap();
        assert!((v - 2.0).abs() < 1e-6);
        assert!(sample(&img, None, 3.2, 1.0).is_none());
        assert!(sample(&img, None, -0.1, 1.0).is_none());

        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(2, 2, Luma([1]));
        assert!(sample(&img, Some(&mask), 1.5, 1.5).is_none());
        assert!(sample(&img, Some(&mask), 0.5, 0.5).is_some());
    }

    #[test]
    fn rounding_ripple_is_not_a_peak() {
        let config = RingSearchConfig::default();
        let ulp = f32::EPSILON * 0.5;
        let ripple: Vec<(f64, Option<f32>)> = (0..21)
            .map(|j| (70.0 + 0.5 * j as f64, Some(0.5 + if j == 10 { ulp } else { 0.0 })))
            .collect();
        assert_eq!(profile_peak(&ripple, &config), None);

        let bump: Vec<(f64, Option<f32>)> = (0..21)
            .map(|j| (70.0 + 0.5 * j as f64, Some(0.5 + if j == 10 { 0.01 } else { 0.0 })))
            .collect();
        assert_eq!(profile_peak(&bump, &config), Some(75.0));
    }

    #[test]
    fn recovers_points_on_blurred_ring() {
        let img = blurred_ring_image(256, 256, CENTRE, RADIUS, 1.5);
        let pts = find_pois_near_circle(&NoopMonitor, &img, None, &approx_circle(), &RingSearchConfig::default())
            .unwrap();
        assert!(pts.len() >= 350, "found only {} points", pts.len());
        for &[x, y] in &pts {
            let d = (x - CENTRE[0]).hypot(y - CENTRE[1]);
            assert!((d - RADIUS).abs() < 0.3, "point at radius {}", d);
        }
    }

    #[test]
    fn masked_arc_is_skipped() {
        let img = blurred_ring_image(256, 256, CENTRE, RADIUS, 1.5);
        let mut mask = GrayImage::new(256, 256);
        for y in 0..256 {
            for x in 180..256 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let config = RingSearchConfig {
            min_peak_contrast: 0.1,
            ..RingSearchConfig::default()
        };
        let pts = find_pois_near_circle(&NoopMonitor, &img, Some(&mask), &approx_circle(), &config).unwrap();
        assert!(pts.len() < config.n_angles - 40);
        assert!(pts.iter().all(|p| p[0] < 180.0));
    }

    #[test]
    fn flat_image_yields_nothing_and_cancel_stops() {
        let img = ImageBuffer::<Luma<f32>, Vec<f32>>::from_pixel(64, 64, Luma([0.5]));
        let circle = Circle {
            cx: 32.0,
            cy: 32.0,
            r: 15.0,
        };
        let pts = find_pois_near_circle(&NoopMonitor, &img, None, &circle, &RingSearchConfig::default()).unwrap();
        assert!(pts.is_empty());
        let bright = ImageBuffer::<Luma<f32>, Vec<f32>>::from_pixel(64, 64, Luma([1234.5]));
        let pts = find_pois_near_circle(&NoopMonitor, &bright, None, &circle, &RingSearchConfig::default()).unwrap();
        assert!(pts.is_empty(), "{} peaks on a flat image", pts.len());

        let cancelled = AtomicBool::new(true);
        assert_eq!(
            find_pois_near_circle(&cancelled, &img, None, &circle, &RingSearchConfig::default()),
            Err(CalibrationError::Cancelled)
        );
        let bad = Circle { r: -1.0, ..circle };
        assert!(matches!(
            find_pois_near_circle(&NoopMonitor, &img, None, &bad, &RingSearchConfig::default()),
            Err(CalibrationError::InvalidInput(_))
        ));
    }
}
