use serde::{Deserialize, Serialize};

use super::observation::{DetectorRings, FreeParameters, ParameterScales, RingObservation};
use super::problem::{ring_residuals, ring_rms, PowderProblem};
use super::CalibrationError;
use crate::geometry::{BeamEnvironment, DetectorPose};
use crate::monitor::ProgressMonitor;
use crate::optimize::{minimize, LeastSquaresProblem, Loss, OptimizerConfig};

/// Configuration shared by the ring-calibration fitters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub optimizer: OptimizerConfig,
    pub scales: ParameterScales,
    /// Huber transition (pixels) used when a fit is run robustly.
    pub huber_delta_px: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            scales: ParameterScales::default(),
            huber_delta_px: 1.0,
        }
    }
}

impl CalibrationConfig {
    fn loss(&self, robust: bool) -> Loss {
        if robust {
            Loss::Huber {
                delta: self.huber_delta_px,
            }
        } else {
            Loss::SumOfSquares
        }
    }
}

/// Outcome of a single-detector calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub pose: DetectorPose,
    pub beam: BeamEnvironment,
    /// Sum of squared Sampson distances (px²) at the refined geometry.
    pub residual: f64,
    /// RMS Sampson distance over all points (px).
    pub rms_px: f64,
    /// RMS Sampson distance per input ring (px), in input order.
    pub ring_rms_px: Vec<f64>,
    pub n_points: usize,
    /// Residual evaluations spent by the optimizer.
    pub evaluations: usize,
}

/// Refined pose of one detector in a joint fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorFit {
    pub pose: DetectorPose,
    /// Sum of squared Sampson distances (px²) on this detector.
    pub residual: f64,
    pub rms_px: f64,
    pub ring_rms_px: Vec<f64>,
}

/// Outcome of a multi-detector calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointCalibrationResult {
    /// Shared beam, refined when the wavelength was free.
    pub beam: BeamEnvironment,
    /// One entry per input detector, in input order.
    pub detectors: Vec<DetectorFit>,
    /// Total sum of squared Sampson distances (px²).
    pub residual: f64,
    pub evaluations: usize,
}

fn validate_rings(rings: &[RingObservation], detector: usize) -> Result<usize, CalibrationError> {
    if rings.is_empty() {
        return Err(CalibrationError::InvalidInput(format!(
            "detector {} has no rings",
            detector
        )));
    }
    let mut n_points = 0;
    for ring in rings {
        if !(ring.d_spacing.is_finite() && ring.d_spacing > 0.0) {
            return Err(CalibrationError::InvalidInput(format!(
                "d-spacing {} on detector {} is not positive",
                ring.d_spacing, detector
            )));
        }
        if ring.points.iter().any(|p| !(p[0].is_finite() && p[1].is_finite())) {
            return Err(CalibrationError::InvalidInput(format!(
                "non-finite ring point on detector {}",
                detector
            )));
        }
        n_points += ring.points.len();
    }
    Ok(n_points)
}

/// Sum of squared Sampson distances (px²) of the observed points to the
/// rings predicted by `pose` and `beam`.
///
/// Returns `+∞` when a ring is unreachable at this wavelength.
pub fn evaluate_residual(
    pose: &DetectorPose,
    beam: &BeamEnvironment,
    rings: &[RingObservation],
) -> Result<f64, CalibrationError> {
    validate_rings(rings, 0)?;
    let mut out = Vec::new();
    if !ring_residuals(pose, beam.wavelength(), rings, &mut out) {
        return Ok(f64::INFINITY);
    }
    Ok(Loss::SumOfSquares.total(&out))
}

/// Refine the `free` parameters of one detector (and optionally the
/// wavelength) so the predicted rings pass through the observed points.
///
/// With `robust`, residuals are aggregated with a Huber loss of width
/// [`CalibrationConfig::huber_delta_px`]; the reported residual is always
/// the plain sum of squares. Inputs are never modified.
pub fn fit_all_ellipses_to_qspace(
    monitor: &dyn ProgressMonitor,
    pose: &DetectorPose,
    beam: &BeamEnvironment,
    rings: &[RingObservation],
    free: FreeParameters,
    robust: bool,
    config: &CalibrationConfig,
) -> Result<CalibrationResult, CalibrationError> {
    let n_points = validate_rings(rings, 0)?;
    if n_points < free.count() {
        return Err(CalibrationError::InvalidInput(format!(
            "{} points cannot determine {} parameters",
            n_points,
            free.count()
        )));
    }
    let problem = PowderProblem::new(&[(pose, rings)], beam.wavelength(), free)?;
    tracing::info!(
        rings = rings.len(),
        n_points,
        free = free.count(),
        robust,
        "single-detector calibration started"
    );

    let x0 = problem.initial();
    let scales = problem.scales(&config.scales);
    let minimum = minimize(
        &problem,
        &x0,
        &scales,
        config.loss(robust),
        &config.optimizer,
        monitor,
    )?;

    let (wavelength, mut poses) = problem
        .poses(&minimum.x)
        .ok_or_else(|| CalibrationError::NotConverged("refined pose is invalid".into()))?;
    let beam = BeamEnvironment::from_wavelength(wavelength)?;
    let pose = poses.remove(0);

    let mut out = Vec::with_capacity(n_points);
    if !problem.residuals(&minimum.x, &mut out) {
        return Err(CalibrationError::NotConverged(
            "rings unreachable at refined geometry".into(),
        ));
    }
    let residual = Loss::SumOfSquares.total(&out);
    let rms_px = (residual / n_points.max(1) as f64).sqrt();
    tracing::info!(
        residual,
        rms_px,
        evaluations = minimum.evaluations,
        "single-detector calibration finished"
    );

    Ok(CalibrationResult {
        ring_rms_px: ring_rms(&pose, wavelength, rings),
        pose,
        beam,
        residual,
        rms_px,
        n_points,
        evaluations: minimum.evaluations,
    })
}

/// Jointly refine several detectors that share one wavelength.
///
/// `free` selects the pose parameters refined on every detector and whether
/// the shared wavelength is refined.
pub fn fit_all_ellipses_to_all_qspaces(
    monitor: &dyn ProgressMonitor,
    detectors: &[DetectorRings],
    beam: &BeamEnvironment,
    free: FreeParameters,
    config: &CalibrationConfig,
) -> Result<JointCalibrationResult, CalibrationError> {
    if detectors.is_empty() {
        return Err(CalibrationError::InvalidInput("no detectors".into()));
    }
    let mut n_points = 0;
    for (i, det) in detectors.iter().enumerate() {
        n_points += validate_rings(&det.rings, i)?;
    }
    let inputs: Vec<(&DetectorPose, &[RingObservation])> = detectors
        .iter()
        .map(|d| (&d.pose, d.rings.as_slice()))
        .collect();
    let problem = PowderProblem::new(&inputs, beam.wavelength(), free)?;
    if n_points < problem.dimension() {
        return Err(CalibrationError::InvalidInput(format!(
            "{} points cannot determine {} parameters",
            n_points,
            problem.dimension()
        )));
    }
    tracing::info!(
        detectors = detectors.len(),
        n_points,
        parameters = problem.dimension(),
        "joint calibration started"
    );

    let x0 = problem.initial();
    let scales = problem.scales(&config.scales);
    let minimum = minimize(
        &problem,
        &x0,
        &scales,
        Loss::SumOfSquares,
        &config.optimizer,
        monitor,
    )?;

    let (wavelength, poses) = problem
        .poses(&minimum.x)
        .ok_or_else(|| CalibrationError::NotConverged("refined pose is invalid".into()))?;
    let beam = BeamEnvironment::from_wavelength(wavelength)?;

    let mut total = 0.0;
    let mut fits = Vec::with_capacity(poses.len());
    let mut out = Vec::new();
    for (pose, det) in poses.into_iter().zip(detectors) {
        out.clear();
        if !ring_residuals(&pose, wavelength, &det.rings, &mut out) {
            return Err(CalibrationError::NotConverged(
                "rings unreachable at refined geometry".into(),
            ));
        }
        let residual = Loss::SumOfSquares.total(&out);
        total += residual;
        fits.push(DetectorFit {
            ring_rms_px: ring_rms(&pose, wavelength, &det.rings),
            rms_px: (residual / out.len().max(1) as f64).sqrt(),
            residual,
            pose,
        });
    }
    tracing::info!(
        residual = total,
        wavelength,
        evaluations = minimum.evaluations,
        "joint calibration finished"
    );

    Ok(JointCalibrationResult {
        beam,
        detectors: fits,
        residual: total,
        evaluations: minimum.evaluations,
    })
}
