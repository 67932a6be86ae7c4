//! Ring fitting with residual-based outlier trimming.

use serde::{Deserialize, Serialize};

use super::CalibrationError;
use crate::conic::{fit_ring_ransac, fit_shape, ConicError, FitShape, RansacConfig, RingConic};
use crate::monitor::ProgressMonitor;

/// Consistency constant turning a median absolute deviation into a
/// Gaussian standard deviation.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Smallest trimming threshold (pixels); exact data keeps every point.
const MIN_THRESHOLD: f64 = 1e-6;

/// Rule deciding which residuals count as outliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrimPolicy {
    /// Drop points farther than `n_sigma` RMS residuals from the mean.
    FixedSigma { n_sigma: f64 },
    /// Drop points farther than `n_mad` scaled median absolute deviations
    /// from the median.
    MedianAbsoluteDeviation { n_mad: f64 },
}

impl TrimPolicy {
    /// Centre and half-width of the accepted residual band.
    fn band(&self, residuals: &[f64]) -> (f64, f64) {
        match *self {
            Self::FixedSigma { n_sigma } => {
                let n = residuals.len().max(1) as f64;
                let mean = residuals.iter().sum::<f64>() / n;
                let var = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
                (mean, (n_sigma * var.sqrt()).max(MIN_THRESHOLD))
            }
            Self::MedianAbsoluteDeviation { n_mad } => {
                let centre = median(residuals.to_vec());
                let mad = median(residuals.iter().map(|r| (r - centre).abs()).collect());
                (centre, (n_mad * MAD_TO_SIGMA * mad).max(MIN_THRESHOLD))
            }
        }
    }
}

fn median(mut v: Vec<f64>) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        0.5 * (v[mid - 1] + v[mid])
    } else {
        v[mid]
    }
}

/// Configuration for [`fit_and_trim_outliers`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    /// Policy for non-robust fits.
    pub fixed_sigma: TrimPolicy,
    /// Policy for robust fits.
    pub robust: TrimPolicy,
    /// Consensus search used for the first robust fit.
    pub ransac: RansacConfig,
    /// Huber transition (pixels) of the robust circle refit.
    pub huber_delta_px: f64,
    /// Trim-and-refit rounds; stops early once a round removes nothing.
    pub max_rounds: usize,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            fixed_sigma: TrimPolicy::FixedSigma { n_sigma: 3.0 },
            robust: TrimPolicy::MedianAbsoluteDeviation { n_mad: 3.5 },
            ransac: RansacConfig::default(),
            huber_delta_px: 1.0,
            max_rounds: 5,
        }
    }
}

impl TrimConfig {
    pub fn policy(&self, robust: bool) -> TrimPolicy {
        if robust {
            self.robust
        } else {
            self.fixed_sigma
        }
    }
}

/// Signed distance used for trimming; exact for circles.
fn signed_residual(conic: &RingConic, [x, y]: [f64; 2]) -> f64 {
    match conic {
        RingConic::Circle(c) => c.signed_distance(x, y),
        _ => conic.coeffs().sampson_residual(x, y),
    }
}

/// Fit `shape` to `points`, drop the points whose residual falls outside the
/// band of the selected [`TrimPolicy`], and refit on the rest.
///
/// With `robust`, the first fit is a RANSAC consensus fit, trimming uses the
/// median absolute deviation and circles are refit with a Huber loss.
pub fn fit_and_trim_outliers(
    monitor: &dyn ProgressMonitor,
    points: &[[f64; 2]],
    shape: FitShape,
    robust: bool,
    config: &TrimConfig,
) -> Result<RingConic, CalibrationError> {
    let needed = shape.minimal_sample();
    if points.len() < needed {
        return Err(ConicError::TooFewPoints {
            needed,
            got: points.len(),
        }
        .into());
    }
    if monitor.is_cancelled() {
        return Err(CalibrationError::Cancelled);
    }

    let mut conic = if robust {
        fit_ring_ransac(points, shape, &config.ransac)?.conic
    } else {
        fit_shape(points, shape, None).ok_or(ConicError::Degenerate)?
    };

    let policy = config.policy(robust);
    let huber = robust.then_some(config.huber_delta_px);
    let mut kept = points.to_vec();
    let mut rounds = 0;
    while rounds < config.max_rounds.max(1) {
        if monitor.is_cancelled() {
            return Err(CalibrationError::Cancelled);
        }
        rounds += 1;
        let residuals: Vec<f64> = kept.iter().map(|&p| signed_residual(&conic, p)).collect();
        let (centre, half_width) = policy.band(&residuals);
        let next: Vec<[f64; 2]> = kept
            .iter()
            .zip(&residuals)
            .filter(|(_, &r)| (r - centre).abs() <= half_width)
            .map(|(&p, _)| p)
            .collect();
        if next.len() < needed {
            return Err(ConicError::TooFewPoints {
                needed,
                got: next.len(),
            }
            .into());
        }
        let removed = kept.len() - next.len();
        tracing::trace!(round = rounds, removed, half_width, "trim round");
        kept = next;
        conic = fit_shape(&kept, shape, huber).ok_or(ConicError::Degenerate)?;
        if removed == 0 {
            break;
        }
    }

    tracing::debug!(
        total = points.len(),
        kept = kept.len(),
        rounds,
        ?policy,
        "trimmed ring outliers"
    );
    Ok(conic)
}
