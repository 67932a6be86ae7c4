//! Geometry refinement against observed powder rings.
//!
//! - [`fit_all_ellipses_to_qspace`]: one detector, selected pose parameters
//!   and optionally the wavelength.
//! - [`fit_all_ellipses_to_all_qspaces`]: several detectors sharing one
//!   wavelength.
//! - [`fit_and_trim_outliers`]: circle/ellipse fit with residual-based
//!   trimming.
//! - [`find_pois_near_circle`]: radial peak search around an approximate
//!   ring in an intensity image.
//!
//! Residuals are signed Sampson distances, in pixels, of each observed point
//! to the ring conic predicted by the current parameters.

mod fitter;
mod observation;
mod problem;
mod search;
mod tolerance;
mod trim;

pub use fitter::{
    evaluate_residual, fit_all_ellipses_to_all_qspaces, fit_all_ellipses_to_qspace,
    CalibrationConfig, CalibrationResult, DetectorFit, JointCalibrationResult,
};
pub use observation::{DetectorRings, FreeParameters, ParameterScales, RingObservation};
pub use search::{find_pois_near_circle, RingSearchConfig};
pub use tolerance::{FitTolerances, PoseDeviation};
pub use trim::{fit_and_trim_outliers, TrimConfig, TrimPolicy};

use crate::conic::ConicError;
use crate::geometry::GeometryError;
use crate::optimize::OptimizeError;

/// Errors from calibration entry points.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Two inputs that must be parallel have different lengths.
    MismatchedLengths {
        /// Which input was short or long.
        what: &'static str,
        /// Required length.
        expected: usize,
        /// Actual length.
        got: usize,
    },
    /// An input value is out of range or inconsistent.
    InvalidInput(String),
    /// The progress monitor requested cancellation.
    Cancelled,
    /// The optimizer ended without a usable solution.
    NotConverged(String),
    Geometry(GeometryError),
    Conic(ConicError),
}

impl std::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MismatchedLengths {
                what,
                expected,
                got,
            } => write!(f, "{}: expected {} entries, got {}", what, expected, got),
            Self::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Self::Cancelled => write!(f, "calibration cancelled"),
            Self::NotConverged(msg) => write!(f, "calibration did not converge: {}", msg),
            Self::Geometry(e) => write!(f, "geometry error: {}", e),
            Self::Conic(e) => write!(f, "conic error: {}", e),
        }
    }
}

impl std::error::Error for CalibrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Geometry(e) => Some(e),
            Self::Conic(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GeometryError> for CalibrationError {
    fn from(e: GeometryError) -> Self {
        Self::Geometry(e)
    }
}

impl From<ConicError> for CalibrationError {
    fn from(e: ConicError) -> Self {
        Self::Conic(e)
    }
}

impl From<OptimizeError> for CalibrationError {
    fn from(e: OptimizeError) -> Self {
        match e {
            OptimizeError::Cancelled => Self::Cancelled,
            OptimizeError::DimensionMismatch { expected, got } => Self::MismatchedLengths {
                what: "parameters",
                expected,
                got,
            },
            OptimizeError::NoFiniteCost => Self::NotConverged(e.to_string()),
        }
    }
}
