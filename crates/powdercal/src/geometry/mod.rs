//! Detector and beam geometry in the lab frame.
//!
//! Implements:
//! - [`DetectorPose`]: a planar pixel detector placed in the lab, with
//!   pixel ↔ lab transforms, beam-centre queries and per-pixel solid angle.
//! - Yaw/pitch/roll decomposition of detector orientations.
//! - [`BeamEnvironment`]: wavelength/energy of the incident beam.
//! - [`QSpaceMapper`]: pixel ↔ scattering-vector mapping.

mod beam;
mod euler;
mod pose;
mod qspace;
mod solid_angle;

pub use beam::{BeamEnvironment, HC_KEV_ANGSTROM};
pub use euler::{angles_from_orientation, orientation_from_angles, wrap_degrees};
pub use pose::{DetectorPose, PixelGrid, PoseParameters};
pub use qspace::QSpaceMapper;

use nalgebra::Vector3;

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors raised when constructing or mutating geometry values.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Pixel counts must both be positive.
    NonPositivePixelCount {
        /// Pixels along the row axis.
        px: u32,
        /// Pixels along the column axis.
        py: u32,
    },
    /// Pixel pitch must be positive and finite.
    NonPositivePixelSize {
        /// Pitch along the row axis (mm).
        h_size: f64,
        /// Pitch along the column axis (mm).
        v_size: f64,
    },
    /// A vector or scalar input contained NaN or infinity.
    NonFinite(&'static str),
    /// A direction vector had zero length.
    ZeroVector(&'static str),
    /// Matrix is not a proper rotation (orthonormal with det = +1).
    NotARotation,
    /// Wavelength must be positive and finite (Å).
    InvalidWavelength(f64),
    /// Energy must be positive and finite (keV).
    InvalidEnergy(f64),
    /// Distance must be positive and finite (mm).
    InvalidDistance(f64),
    /// The beam does not reach the detector plane.
    BeamMissesDetector,
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositivePixelCount { px, py } => {
                write!(f, "pixel counts must be positive, got {}x{}", px, py)
            }
            Self::NonPositivePixelSize { h_size, v_size } => {
                write!(f, "pixel pitch must be positive, got {} x {} mm", h_size, v_size)
            }
            Self::NonFinite(what) => write!(f, "{} is not finite", what),
            Self::ZeroVector(what) => write!(f, "{} has zero length", what),
            Self::NotARotation => write!(f, "orientation is not a proper rotation matrix"),
            Self::InvalidWavelength(w) => write!(f, "invalid wavelength {} Å", w),
            Self::InvalidEnergy(e) => write!(f, "invalid energy {} keV", e),
            Self::InvalidDistance(d) => write!(f, "invalid distance {} mm", d),
            Self::BeamMissesDetector => write!(f, "beam does not intersect the detector plane"),
        }
    }
}

impl std::error::Error for GeometryError {}

// ── Helpers ────────────────────────────────────────────────────────────────

/// `true` when `a` and `b` agree within `max(rel_tol * max(|a|, |b|), abs_tol)`.
#[inline]
pub(crate) fn is_close(a: f64, b: f64, rel_tol: f64, abs_tol: f64) -> bool {
    if a == b {
        return true;
    }
    (a - b).abs() <= (rel_tol * a.abs().max(b.abs())).max(abs_tol)
}

pub(crate) fn unit_vector(v: Vector3<f64>, what: &'static str) -> Result<Vector3<f64>, GeometryError> {
    if !v.iter().all(|c| c.is_finite()) {
        return Err(GeometryError::NonFinite(what));
    }
    let n = v.norm();
    if n < 1e-15 {
        return Err(GeometryError::ZeroVector(what));
    }
    Ok(v / n)
}

/// Right-handed orthonormal pair `(u, w)` perpendicular to the unit beam
/// `b`, with `u × w = b`. For `b = +z` this is `(+x, +y)`.
pub(crate) fn beam_basis(b: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let helper = if b.y.abs() < 0.9 { Vector3::y() } else { Vector3::z() };
    let u = helper.cross(b).normalize();
    (u, b.cross(&u))
}

pub(crate) fn finite_vector(v: &Vector3<f64>, what: &'static str) -> Result<(), GeometryError> {
    if v.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(GeometryError::NonFinite(what))
    }
}
