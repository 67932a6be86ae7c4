//! powdercal — detector geometry and powder-ring calibration for X-ray diffraction.
//!
//! The crate models one or more flat pixel detectors in the lab frame and the
//! conic sections that Debye–Scherrer rings trace on them. The layers are:
//!
//! 1. **Geometry** – [`DetectorPose`], [`BeamEnvironment`] and the pixel ↔ q
//!    mapping in [`QSpaceMapper`].
//! 2. **Conic** – closed-form ring conics for a d-spacing ([`conic_from_d_spacing`]),
//!    plus direct least-squares ellipse/circle fitting and RANSAC.
//! 3. **Optimize** – seeded CMA-ES search followed by a finite-difference
//!    Levenberg–Marquardt polish.
//! 4. **Calibrate** – single- and multi-detector refinement against ring point
//!    clouds, ring point search in images, outlier trimming.
//! 5. **Rig** – a detector carried by two nested rotation stages
//!    ([`TwoCircleRig`]) and its calibration.
//!
//! Lab frame conventions: the sample sits at the origin, the beam runs along
//! `+z` unless configured otherwise, `+y` is vertical. Lengths are in
//! millimetres, wavelengths in ångström, public angles in degrees unless the
//! name says radians.

pub mod calibrate;
pub mod conic;
pub mod geometry;
mod monitor;
pub mod optimize;
pub mod rig;
#[cfg(test)]
pub(crate) mod test_utils;

pub use calibrate::{
    evaluate_residual, find_pois_near_circle, fit_all_ellipses_to_all_qspaces,
    fit_all_ellipses_to_qspace, fit_and_trim_outliers, CalibrationConfig, CalibrationError,
    CalibrationResult, DetectorFit, DetectorRings, FitTolerances, FreeParameters,
    JointCalibrationResult, ParameterScales, PoseDeviation, RingObservation, RingSearchConfig,
    TrimConfig, TrimPolicy,
};
pub use conic::{
    conic_from_angle, conic_from_d_spacing, conics_from_angles, ring_conic_coeffs, ring_points,
    Circle, ConicCoeffs, ConicError, Ellipse, FitShape, Hyperbola, Parabola, RingConic,
};
pub use geometry::{
    BeamEnvironment, DetectorPose, GeometryError, PixelGrid, PoseParameters, QSpaceMapper,
};
pub use monitor::{NoopMonitor, ProgressMonitor};
pub use optimize::{Loss, OptimizerConfig};
pub use rig::{
    compute_orientation, fit_detector, FastAxis, RigFitConfig, RigParameters, TwoCircleFit,
    TwoCircleRig,
};
