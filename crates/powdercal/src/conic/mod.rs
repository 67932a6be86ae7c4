//! Conic sections for powder rings.
//!
//! Implements:
//! - Closed-form ring conics for a scattering angle or d-spacing on a posed
//!   detector (circle, ellipse, parabola or hyperbola).
//! - Conversion between general conic coefficients and geometric forms.
//! - Direct least-squares fits (Fitzgibbon et al., "Direct Least Square
//!   Fitting of Ellipses", 1999; Kåsa circles) and a RANSAC wrapper.

mod diffraction;
mod fit;
mod ransac;
mod types;

pub use diffraction::{
    conic_from_angle, conic_from_d_spacing, conics_from_angles, ring_conic_coeffs, ring_points,
};
pub use fit::{
    circumcircle, fit_circle_algebraic, fit_conic_direct, fit_ellipse_direct, fit_shape,
    refine_circle_geometric, rms_sampson_distance, FitShape,
};
pub use ransac::{fit_ring_ransac, RansacConfig, RansacResult};
pub use types::{
    conic_to_ellipse, conic_to_hyperbola, conic_to_parabola, ellipse_to_conic, Circle,
    ConicCoeffs, ConicError, ConicKind, Ellipse, Hyperbola, Parabola, RingConic,
};
