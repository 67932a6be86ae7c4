//! RANSAC wrapper for outlier-robust ring fitting.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use super::fit::{circumcircle, fit_conic_direct, fit_shape, FitShape};
use super::types::{ConicError, RingConic};

/// Configuration for RANSAC ring fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Maximum number of minimal-sample hypotheses.
    pub max_iters: usize,
    /// Inlier threshold on the Sampson distance (pixels).
    pub inlier_threshold: f64,
    /// Minimum number of inliers for a valid model.
    pub min_inliers: usize,
    /// RNG seed; identical seeds give identical fits.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 500,
            inlier_threshold: 1.0,
            min_inliers: 10,
            seed: 42,
        }
    }
}

/// Result of a RANSAC fit.
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Model re-fitted on the inlier set.
    pub conic: RingConic,
    /// Number of inliers under the final model.
    pub num_inliers: usize,
    /// Per-point inlier flags under the final model.
    pub inlier_mask: Vec<bool>,
}

/// Fit `shape` robustly: score minimal-sample hypotheses by inlier count,
/// then re-fit on the best consensus set.
pub fn fit_ring_ransac(
    points: &[[f64; 2]],
    shape: FitShape,
    config: &RansacConfig,
) -> Result<RansacResult, ConicError> {
    let n = points.len();
    let k = shape.minimal_sample();
    if n < k {
        return Err(ConicError::TooFewPoints { needed: k, got: n });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best_count = 0usize;
    let mut best_model: Option<RingConic> = None;
    let mut best_mask = vec![false; n];
    let mut mask = vec![false; n];

    for _ in 0..config.max_iters {
        let sample = sample_indices(&mut rng, n, k);
        let Some(model) = minimal_model(points, &sample, shape) else {
            continue;
        };
        let count = mark_inliers(&model, points, config.inlier_threshold, &mut mask);
        if count > best_count {
            best_count = count;
            best_model = Some(model);
            std::mem::swap(&mut best_mask, &mut mask);
            if best_count * 10 > n * 9 {
                break;
            }
        }
    }

    if best_count < config.min_inliers.max(k) {
        return Err(ConicError::InsufficientInliers {
            needed: config.min_inliers.max(k),
            found: best_count,
        });
    }

    let inliers: Vec<[f64; 2]> = best_mask
        .iter()
        .zip(points)
        .filter(|(&m, _)| m)
        .map(|(_, &p)| p)
        .collect();
    let conic = fit_shape(&inliers, shape, None)
        .or(best_model)
        .ok_or(ConicError::Degenerate)?;

    let mut inlier_mask = vec![false; n];
    let num_inliers = mark_inliers(&conic, points, config.inlier_threshold, &mut inlier_mask);
    tracing::trace!(num_inliers, n, ?shape, "ransac ring fit");

    Ok(RansacResult {
        conic,
        num_inliers,
        inlier_mask,
    })
}

fn minimal_model(points: &[[f64; 2]], sample: &[usize], shape: FitShape) -> Option<RingConic> {
    match shape {
        FitShape::Circle => {
            circumcircle(points[sample[0]], points[sample[1]], points[sample[2]]).map(RingConic::Circle)
        }
        FitShape::Ellipse => {
            let pts: Vec<[f64; 2]> = sample.iter().map(|&i| points[i]).collect();
            fit_conic_direct(&pts)?.to_ellipse().map(RingConic::Ellipse)
        }
    }
}

fn mark_inliers(model: &RingConic, points: &[[f64; 2]], threshold: f64, mask: &mut [bool]) -> usize {
    let mut count = 0;
    for (m, &[x, y]) in mask.iter_mut().zip(points) {
        *m = model.sampson_distance(x, y) < threshold;
        count += *m as usize;
    }
    count
}

/// Sample `k` distinct indices from `0..n` using Fisher–Yates partial shuffle.
pub(crate) fn sample_indices(rng: &mut impl Rng, n: usize, k: usize) -> Vec<usize> {
    debug_assert!(k <= n);
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}
