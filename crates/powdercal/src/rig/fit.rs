//! Calibration of a [`TwoCircleRig`] from beam-centre positions.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::{RigParameters, TwoCircleRig, RIG_PARAMETER_COUNT};
use crate::calibrate::CalibrationError;
use crate::geometry::DetectorPose;
use crate::monitor::ProgressMonitor;
use crate::optimize::{minimize, LeastSquaresProblem, Loss, OptimizerConfig};

/// Configuration for [`fit_detector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigFitConfig {
    pub optimizer: OptimizerConfig,
    /// Search scale of the distance (mm).
    pub distance_mm: f64,
    /// Search scale of the beam-centre offset (mm).
    pub offset_mm: f64,
    /// Search scale of every angle (degrees).
    pub angle_deg: f64,
    /// Search scale of the delta-axis position (mm).
    pub axis_offset_mm: f64,
}

impl Default for RigFitConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            distance_mm: 5.0,
            offset_mm: 1.0,
            angle_deg: 0.5,
            axis_offset_mm: 5.0,
        }
    }
}

impl RigFitConfig {
    fn scales(&self) -> [f64; RIG_PARAMETER_COUNT] {
        let (d, o, a, c) = (self.distance_mm, self.offset_mm, self.angle_deg, self.axis_offset_mm);
        [d, o, o, a, a, a, a, a, a, c, c]
    }
}

/// Outcome of [`fit_detector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoCircleFit {
    pub rig: TwoCircleRig,
    /// Sum of squared beam-centre errors (px²).
    pub residual: f64,
    /// RMS beam-centre error (px).
    pub rms_px: f64,
    pub evaluations: usize,
}

struct RigProblem<'a> {
    base: &'a DetectorPose,
    start: [f64; RIG_PARAMETER_COUNT],
    mask: [bool; RIG_PARAMETER_COUNT],
    beam: Vector3<f64>,
    gammas: &'a [f64],
    deltas: &'a [f64],
    observed: Vec<[f64; 2]>,
}

impl RigProblem<'_> {
    fn rig(&self, params: &[f64]) -> TwoCircleRig {
        let mut full = self.start;
        let mut it = params.iter();
        for (v, &free) in full.iter_mut().zip(&self.mask) {
            if free {
                if let Some(&p) = it.next() {
                    *v = p;
                }
            }
        }
        TwoCircleRig {
            params: RigParameters::from_array(full),
            beam: self.beam,
        }
    }

    fn pick(&self, values: &[f64; RIG_PARAMETER_COUNT]) -> Vec<f64> {
        values
            .iter()
            .zip(&self.mask)
            .filter(|(_, &free)| free)
            .map(|(&v, _)| v)
            .collect()
    }
}

impl LeastSquaresProblem for RigProblem<'_> {
    fn dimension(&self) -> usize {
        self.mask.iter().filter(|&&f| f).count()
    }

    fn residuals(&self, params: &[f64], out: &mut Vec<f64>) -> bool {
        out.clear();
        let rig = self.rig(params);
        for ((&gamma, &delta), &[x, y]) in self.gammas.iter().zip(self.deltas).zip(&self.observed) {
            let Ok(pose) = rig.detector_properties(self.base, gamma, delta) else {
                return false;
            };
            let [bx, by] = pose.beam_centre_coords();
            if !(bx.is_finite() && by.is_finite()) {
                return false;
            }
            out.push(bx - x);
            out.push(by - y);
        }
        true
    }
}

/// Refine `rig` so the beam centre it predicts at each `(gammas[i],
/// deltas[i])` lands on the observed pixel `(xs[i], ys[i])`.
///
/// `param_count` selects the variant of [`RigParameters::free_mask`]
/// (6, 7, 8 or 10); the other parameters keep their values from `rig`.
/// `base` supplies the pixel grid. `rig` itself is never modified.
#[allow(clippy::too_many_arguments)]
pub fn fit_detector(
    monitor: &dyn ProgressMonitor,
    base: &DetectorPose,
    rig: &TwoCircleRig,
    param_count: usize,
    gammas: &[f64],
    deltas: &[f64],
    xs: &[f64],
    ys: &[f64],
    config: &RigFitConfig,
) -> Result<TwoCircleFit, CalibrationError> {
    let n = gammas.len();
    for (what, len) in [("deltas", deltas.len()), ("xs", xs.len()), ("ys", ys.len())] {
        if len != n {
            return Err(CalibrationError::MismatchedLengths {
                what,
                expected: n,
                got: len,
            });
        }
    }
    let mask = RigParameters::free_mask(param_count).ok_or_else(|| {
        CalibrationError::InvalidInput(format!(
            "rig fits take 6, 7, 8 or 10 parameters, not {}",
            param_count
        ))
    })?;
    if 2 * n < param_count {
        return Err(CalibrationError::InvalidInput(format!(
            "{} beam-centre positions cannot determine {} parameters",
            n, param_count
        )));
    }
    let all_finite = gammas.iter().chain(deltas).chain(xs).chain(ys).all(|v| v.is_finite());
    if !all_finite {
        return Err(CalibrationError::InvalidInput(
            "non-finite angle or beam-centre position".into(),
        ));
    }

    let problem = RigProblem {
        base,
        start: rig.params.to_array(),
        mask,
        beam: rig.beam,
        gammas,
        deltas,
        observed: xs.iter().zip(ys).map(|(&x, &y)| [x, y]).collect(),
    };
    let x0 = problem.pick(&problem.start);
    let scales = problem.pick(&config.scales());
    let mut out = Vec::with_capacity(2 * n);
    if !problem.residuals(&x0, &mut out) {
        return Err(CalibrationError::InvalidInput(
            "beam misses the detector at the starting rig geometry".into(),
        ));
    }
    tracing::info!(
        positions = n,
        parameters = param_count,
        start_residual = Loss::SumOfSquares.total(&out),
        "two-circle rig fit started"
    );

    let minimum = minimize(
        &problem,
        &x0,
        &scales,
        Loss::SumOfSquares,
        &config.optimizer,
        monitor,
    )?;

    let fitted = problem.rig(&minimum.x);
    if !problem.residuals(&minimum.x, &mut out) {
        return Err(CalibrationError::NotConverged(
            "beam misses the detector at the refined rig geometry".into(),
        ));
    }
    let residual = Loss::SumOfSquares.total(&out);
    let rms_px = (residual / n.max(1) as f64).sqrt();
    tracing::info!(
        residual,
        rms_px,
        evaluations = minimum.evaluations,
        "two-circle rig fit finished"
    );

    Ok(TwoCircleFit {
        rig: fitted,
        residual,
        rms_px,
        evaluations: minimum.evaluations,
    })
}
