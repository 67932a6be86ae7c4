//! Conic section types and conversions between algebraic and geometric forms.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors that can occur while constructing or fitting conics.
#[derive(Debug, Clone, PartialEq)]
pub enum ConicError {
    /// Too few points for the requested operation.
    TooFewPoints {
        /// Required minimum number of points.
        needed: usize,
        /// Provided number of points.
        got: usize,
    },
    /// RANSAC could not find enough inliers.
    InsufficientInliers {
        /// Required minimum number of inliers.
        needed: usize,
        /// Number of inliers in the best model.
        found: usize,
    },
    /// The cone does not produce a ring on the detector plane.
    NoSolution(&'static str),
    /// The coefficients describe a degenerate conic (line pair, point, …).
    Degenerate,
}

impl std::fmt::Display for ConicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few points: need {}, got {}", needed, got)
            }
            Self::InsufficientInliers { needed, found } => {
                write!(f, "insufficient inliers: need {}, found {}", needed, found)
            }
            Self::NoSolution(reason) => write!(f, "no conic solution: {}", reason),
            Self::Degenerate => write!(f, "degenerate conic"),
        }
    }
}

impl std::error::Error for ConicError {}

// ── Algebraic form ─────────────────────────────────────────────────────────

/// General conic: A x² + B xy + C y² + D x + E y + F = 0.
/// Stored as [A, B, C, D, E, F].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConicCoeffs(pub [f64; 6]);

/// Algebraic type of a non-degenerate conic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConicKind {
    Circle,
    Ellipse,
    Parabola,
    Hyperbola,
}

/// Relative discriminant below which a conic counts as a parabola.
const PARABOLA_EPS: f64 = 1e-12;

/// Relative axis difference below which an ellipse counts as a circle.
const CIRCLE_EPS: f64 = 1e-9;

impl ConicCoeffs {
    /// Scale to unit Euclidean norm over all six coefficients.
    ///
    /// Returns `None` for an all-zero or non-finite conic.
    pub fn unit_norm(&self) -> Option<Self> {
        let n = self.0.iter().map(|v| v * v).sum::<f64>().sqrt();
        if !n.is_finite() || n <= 1e-300 {
            return None;
        }
        Some(Self(self.0.map(|v| v / n)))
    }

    /// Symmetric 3×3 matrix `Q` with `[x y 1] Q [x y 1]ᵀ = 0`.
    pub fn matrix(&self) -> Matrix3<f64> {
        let [a, b, c, d, e, f] = self.0;
        Matrix3::new(
            a,
            b * 0.5,
            d * 0.5,
            b * 0.5,
            c,
            e * 0.5,
            d * 0.5,
            e * 0.5,
            f,
        )
    }

    /// Algebraic distance of a point (x, y) to this conic.
    pub fn algebraic_distance(&self, x: f64, y: f64) -> f64 {
        let [a, b, c, d, e, f] = self.0;
        a * x * x + b * x * y + c * y * y + d * x + e * y + f
    }

    /// Gradient of the algebraic distance at (x, y).
    pub fn gradient(&self, x: f64, y: f64) -> [f64; 2] {
        let [a, b, c, d, e, _] = self.0;
        [2.0 * a * x + b * y + d, b * x + 2.0 * c * y + e]
    }

    /// Signed first-order geometric distance `Q(p) / |∇Q(p)|`.
    ///
    /// The sign follows the algebraic value, so it is consistent along one
    /// side of the curve; falls back to the algebraic value where the
    /// gradient vanishes.
    pub fn sampson_residual(&self, x: f64, y: f64) -> f64 {
        let alg = self.algebraic_distance(x, y);
        let [gx, gy] = self.gradient(x, y);
        let g2 = gx * gx + gy * gy;
        if g2 < 1e-30 {
            return alg;
        }
        alg / g2.sqrt()
    }

    /// Unsigned Sampson distance in pixels.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        self.sampson_residual(x, y).abs()
    }

    /// Check whether the conic represents an ellipse (discriminant B²−4AC < 0).
    pub fn is_ellipse(&self) -> bool {
        let [a, b, c, ..] = self.0;
        b * b - 4.0 * a * c < 0.0
    }

    /// Classify by the scale-free discriminant of the quadratic part.
    ///
    /// Returns `None` when the quadratic part vanishes (a line).
    pub fn kind(&self) -> Option<ConicKind> {
        let [a, b, c, ..] = self.0;
        let quad = a * a + 0.5 * b * b + c * c;
        if !(quad > 1e-300) {
            return None;
        }
        let disc = (b * b - 4.0 * a * c) / quad;
        Some(if disc.abs() <= PARABOLA_EPS {
            ConicKind::Parabola
        } else if disc > 0.0 {
            ConicKind::Hyperbola
        } else if (a - c).abs().hypot(b) <= CIRCLE_EPS * (a.abs() + c.abs()) {
            ConicKind::Circle
        } else {
            ConicKind::Ellipse
        })
    }

    /// Convert to geometric ellipse parameters.
    pub fn to_ellipse(self) -> Option<Ellipse> {
        conic_to_ellipse(&self)
    }

    pub fn to_hyperbola(self) -> Option<Hyperbola> {
        conic_to_hyperbola(&self)
    }

    pub fn to_parabola(self) -> Option<Parabola> {
        conic_to_parabola(&self)
    }

    /// Geometric form of this conic, classified by [`kind`](Self::kind).
    pub fn to_ring_conic(self) -> Result<RingConic, ConicError> {
        match self.kind().ok_or(ConicError::Degenerate)? {
            ConicKind::Circle | ConicKind::Ellipse => {
                let e = self.to_ellipse().ok_or(ConicError::Degenerate)?;
                Ok(RingConic::from_ellipse(e))
            }
            ConicKind::Parabola => self
                .to_parabola()
                .map(RingConic::Parabola)
                .ok_or(ConicError::Degenerate),
            ConicKind::Hyperbola => self
                .to_hyperbola()
                .map(RingConic::Hyperbola)
                .ok_or(ConicError::Degenerate),
        }
    }
}

// ── Geometric forms ────────────────────────────────────────────────────────

/// Geometric circle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub cx: f64,
    pub cy: f64,
    /// Radius.
    pub r: f64,
}

impl Circle {
    pub fn is_valid(&self) -> bool {
        self.r > 0.0 && self.r.is_finite() && self.cx.is_finite() && self.cy.is_finite()
    }

    pub fn to_conic(self) -> ConicCoeffs {
        ConicCoeffs([
            1.0,
            0.0,
            1.0,
            -2.0 * self.cx,
            -2.0 * self.cy,
            self.cx * self.cx + self.cy * self.cy - self.r * self.r,
        ])
    }

    /// Sample `n` points on the circle, starting at angle zero.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * (i as f64) / (n as f64);
                [self.cx + self.r * t.cos(), self.cy + self.r * t.sin()]
            })
            .collect()
    }

    /// Exact signed distance to the circle (positive outside).
    pub fn signed_distance(&self, x: f64, y: f64) -> f64 {
        (x - self.cx).hypot(y - self.cy) - self.r
    }
}

/// Geometric ellipse parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center x.
    pub cx: f64,
    /// Center y.
    pub cy: f64,
    /// Semi-major axis length.
    pub a: f64,
    /// Semi-minor axis length.
    pub b: f64,
    /// Rotation angle of the major axis from +x, in radians (−π/2, π/2].
    pub angle: f64,
}

impl Ellipse {
    /// Check basic validity: positive semi-axes, finite values.
    pub fn is_valid(&self) -> bool {
        self.a > 0.0
            && self.b > 0.0
            && self.a.is_finite()
            && self.b.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.angle.is_finite()
    }

    /// Aspect ratio a/b (always >= 1 when canonicalized).
    pub fn aspect_ratio(&self) -> f64 {
        if self.a >= self.b {
            self.a / self.b
        } else {
            self.b / self.a
        }
    }

    pub fn to_conic(self) -> ConicCoeffs {
        ellipse_to_conic(&self)
    }

    /// Sample `n` points on the ellipse boundary.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (sin_a, cos_a) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * (i as f64) / (n as f64);
                let px = self.a * t.cos();
                let py = self.b * t.sin();
                [
                    self.cx + cos_a * px - sin_a * py,
                    self.cy + sin_a * px + cos_a * py,
                ]
            })
            .collect()
    }

    /// Approximate geometric distance from a point to the ellipse boundary.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        self.to_conic().sampson_distance(x, y)
    }
}

/// Geometric parabola: vertex, semi-latus rectum and opening direction.
///
/// In the local frame `(u, w)` anchored at the vertex with `u` along the
/// opening direction, the curve is `w² = 2 p u`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parabola {
    pub vx: f64,
    pub vy: f64,
    /// Semi-latus rectum (focal distance is `p / 2`).
    pub p: f64,
    /// Opening direction from +x, in radians (−π, π].
    pub angle: f64,
}

impl Parabola {
    pub fn to_conic(self) -> ConicCoeffs {
        let (s, c) = self.angle.sin_cos();
        let (ca, cb, cc) = (s * s, -2.0 * s * c, c * c);
        let cd = -2.0 * ca * self.vx - cb * self.vy - 2.0 * self.p * c;
        let ce = -cb * self.vx - 2.0 * cc * self.vy - 2.0 * self.p * s;
        let cf = ca * self.vx * self.vx
            + cb * self.vx * self.vy
            + cc * self.vy * self.vy
            + 2.0 * self.p * (c * self.vx + s * self.vy);
        ConicCoeffs([ca, cb, cc, cd, ce, cf])
    }

    /// Points at local parameters `w = t·p` for `t` evenly spread in `±t_max`.
    pub fn sample_points(&self, n: usize, t_max: f64) -> Vec<[f64; 2]> {
        let (s, c) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = if n > 1 {
                    -t_max + 2.0 * t_max * (i as f64) / ((n - 1) as f64)
                } else {
                    0.0
                };
                let w = t * self.p;
                let u = w * w / (2.0 * self.p);
                [self.vx + c * u - s * w, self.vy + s * u + c * w]
            })
            .collect()
    }
}

/// Geometric hyperbola `u²/a² − w²/b² = 1` in a frame rotated by `angle`
/// about its centre; `angle` is the transverse axis direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperbola {
    pub cx: f64,
    pub cy: f64,
    /// Semi-transverse axis.
    pub a: f64,
    /// Semi-conjugate axis.
    pub b: f64,
    /// Transverse axis direction from +x, in radians (−π/2, π/2].
    pub angle: f64,
}

impl Hyperbola {
    pub fn to_conic(self) -> ConicCoeffs {
        let (s, c) = self.angle.sin_cos();
        let a2 = self.a * self.a;
        let b2 = self.b * self.b;
        let ca = c * c / a2 - s * s / b2;
        let cb = 2.0 * c * s * (1.0 / a2 + 1.0 / b2);
        let cc = s * s / a2 - c * c / b2;
        let cd = -2.0 * ca * self.cx - cb * self.cy;
        let ce = -cb * self.cx - 2.0 * cc * self.cy;
        let cf = ca * self.cx * self.cx + cb * self.cx * self.cy + cc * self.cy * self.cy - 1.0;
        ConicCoeffs([ca, cb, cc, cd, ce, cf])
    }

    /// Points on one branch (`branch = ±1`) for `cosh`-parameter `t ∈ ±t_max`.
    pub fn sample_branch(&self, n: usize, t_max: f64, branch: f64) -> Vec<[f64; 2]> {
        let (s, c) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = if n > 1 {
                    -t_max + 2.0 * t_max * (i as f64) / ((n - 1) as f64)
                } else {
                    0.0
                };
                let u = branch.signum() * self.a * t.cosh();
                let w = self.b * t.sinh();
                [self.cx + c * u - s * w, self.cy + s * u + c * w]
            })
            .collect()
    }
}

/// A powder ring as drawn on a detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RingConic {
    Circle(Circle),
    Ellipse(Ellipse),
    Parabola(Parabola),
    Hyperbola(Hyperbola),
}

impl RingConic {
    /// Ellipse, or circle when the axes agree.
    pub fn from_ellipse(e: Ellipse) -> Self {
        if (e.a - e.b).abs() <= CIRCLE_EPS * e.a {
            Self::Circle(Circle {
                cx: e.cx,
                cy: e.cy,
                r: 0.5 * (e.a + e.b),
            })
        } else {
            Self::Ellipse(e)
        }
    }

    pub fn kind(&self) -> ConicKind {
        match self {
            Self::Circle(_) => ConicKind::Circle,
            Self::Ellipse(_) => ConicKind::Ellipse,
            Self::Parabola(_) => ConicKind::Parabola,
            Self::Hyperbola(_) => ConicKind::Hyperbola,
        }
    }

    /// Centre for closed conics and hyperbolas; vertex for a parabola.
    pub fn centre(&self) -> [f64; 2] {
        match self {
            Self::Circle(c) => [c.cx, c.cy],
            Self::Ellipse(e) => [e.cx, e.cy],
            Self::Parabola(p) => [p.vx, p.vy],
            Self::Hyperbola(h) => [h.cx, h.cy],
        }
    }

    pub fn coeffs(&self) -> ConicCoeffs {
        match self {
            Self::Circle(c) => c.to_conic(),
            Self::Ellipse(e) => e.to_conic(),
            Self::Parabola(p) => p.to_conic(),
            Self::Hyperbola(h) => h.to_conic(),
        }
    }

    /// Whether the curve is bounded.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Circle(_) | Self::Ellipse(_))
    }

    /// `n` evenly spaced boundary points for closed conics; `None` for open
    /// ones, which have no natural finite parameterization.
    pub fn sample_points(&self, n: usize) -> Option<Vec<[f64; 2]>> {
        match self {
            Self::Circle(c) => Some(c.sample_points(n)),
            Self::Ellipse(e) => Some(e.sample_points(n)),
            _ => None,
        }
    }

    /// Sampson distance in pixels from `(x, y)` to the curve.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        match self {
            Self::Circle(c) => c.signed_distance(x, y).abs(),
            _ => self.coeffs().sampson_distance(x, y),
        }
    }
}

// ── Conversions ────────────────────────────────────────────────────────────

/// Centre of a central conic (ellipse or hyperbola), from `∇Q = 0`.
fn conic_centre(c: &ConicCoeffs) -> Option<[f64; 2]> {
    let [a, b, cc, d, e, _] = c.0;
    let denom = 4.0 * a * cc - b * b;
    if denom.abs() < 1e-300 {
        return None;
    }
    Some([(b * e - 2.0 * cc * d) / denom, (b * d - 2.0 * a * e) / denom])
}

/// Eigenvalues of the quadratic part, larger first, and the direction of
/// the eigenvector belonging to the larger one.
fn principal_axes(c: &ConicCoeffs) -> (f64, f64, f64) {
    let [a, b, cc, ..] = c.0;
    let sum = a + cc;
    let diff = ((a - cc).powi(2) + b * b).sqrt();
    let angle = if (a - cc).abs() < 1e-15 * (a.abs() + cc.abs()).max(1e-300) {
        if b > 0.0 {
            FRAC_PI_4
        } else if b < 0.0 {
            -FRAC_PI_4
        } else {
            0.0
        }
    } else {
        0.5 * b.atan2(a - cc)
    };
    (0.5 * (sum + diff), 0.5 * (sum - diff), angle)
}

/// Convert general conic coefficients to geometric ellipse parameters.
///
/// Returns `None` if the conic does not represent a real ellipse.
pub fn conic_to_ellipse(c: &ConicCoeffs) -> Option<Ellipse> {
    if !c.is_ellipse() {
        return None;
    }
    let [cx, cy] = conic_centre(c)?;
    let (lambda1, lambda2, angle) = principal_axes(c);
    let f_prime = c.algebraic_distance(cx, cy);
    if f_prime == 0.0 || !f_prime.is_finite() {
        return None;
    }

    let a_sq = -f_prime / lambda1;
    let b_sq = -f_prime / lambda2;
    if a_sq <= 0.0 || b_sq <= 0.0 {
        return None;
    }
    let semi_a = a_sq.sqrt();
    let semi_b = b_sq.sqrt();

    let (semi_a, semi_b, angle) = if semi_a >= semi_b {
        (semi_a, semi_b, angle)
    } else {
        (semi_b, semi_a, angle + FRAC_PI_2)
    };

    Some(Ellipse {
        cx,
        cy,
        a: semi_a,
        b: semi_b,
        angle: normalize_angle(angle),
    })
}

/// Convert geometric ellipse parameters to general conic coefficients.
pub fn ellipse_to_conic(e: &Ellipse) -> ConicCoeffs {
    let (sin_a, cos_a) = e.angle.sin_cos();
    let a2 = e.a * e.a;
    let b2 = e.b * e.b;

    let ca = cos_a * cos_a / a2 + sin_a * sin_a / b2;
    let cb = 2.0 * cos_a * sin_a * (1.0 / a2 - 1.0 / b2);
    let cc = sin_a * sin_a / a2 + cos_a * cos_a / b2;
    let cd = -2.0 * ca * e.cx - cb * e.cy;
    let ce = -cb * e.cx - 2.0 * cc * e.cy;
    let cf = ca * e.cx * e.cx + cb * e.cx * e.cy + cc * e.cy * e.cy - 1.0;

    ConicCoeffs([ca, cb, cc, cd, ce, cf])
}

/// Convert general conic coefficients to a geometric hyperbola.
pub fn conic_to_hyperbola(c: &ConicCoeffs) -> Option<Hyperbola> {
    let [a, b, cc, ..] = c.0;
    if b * b - 4.0 * a * cc <= 0.0 {
        return None;
    }
    let [cx, cy] = conic_centre(c)?;
    let (lambda1, lambda2, angle) = principal_axes(c);
    let f_prime = c.algebraic_distance(cx, cy);
    if f_prime == 0.0 || !f_prime.is_finite() || lambda1 <= 0.0 || lambda2 >= 0.0 {
        return None;
    }
    // λ1 u² + λ2 w² = −F'; the transverse axis is the one with matching sign.
    let (a_sq, b_sq, angle) = if f_prime < 0.0 {
        (-f_prime / lambda1, f_prime / lambda2, angle)
    } else {
        (-f_prime / lambda2, f_prime / lambda1, angle + FRAC_PI_2)
    };
    Some(Hyperbola {
        cx,
        cy,
        a: a_sq.sqrt(),
        b: b_sq.sqrt(),
        angle: normalize_angle(angle),
    })
}

/// Convert general conic coefficients to a geometric parabola.
///
/// Treats the smaller eigenvalue of the quadratic part as zero, so it also
/// accepts conics that are parabolic only up to rounding.
pub fn conic_to_parabola(c: &ConicCoeffs) -> Option<Parabola> {
    let coeffs = if c.0[0] + c.0[2] < 0.0 {
        ConicCoeffs(c.0.map(|v| -v))
    } else {
        *c
    };
    let [_, _, _, d, e, f] = coeffs.0;
    let (lambda, _, perp_angle) = principal_axes(&coeffs);
    if !(lambda > 0.0) {
        return None;
    }
    // e1 spans the non-zero eigenvalue, e0 is the symmetry axis.
    let (s1, c1) = perp_angle.sin_cos();
    let mut e0 = [-s1, c1];
    let e1 = [c1, s1];
    let mut d0 = d * e0[0] + e * e0[1];
    let d1 = d * e1[0] + e * e1[1];
    if d0.abs() < 1e-12 * (d.abs() + e.abs() + lambda) {
        return None;
    }
    if d0 > 0.0 {
        e0 = [-e0[0], -e0[1]];
        d0 = -d0;
    }
    // λ (w − w0)² + d0 (u − u0) = 0 with d0 < 0 opens towards +e0.
    let w0 = -d1 / (2.0 * lambda);
    let u0 = (d1 * d1 / (4.0 * lambda) - f) / d0;
    Some(Parabola {
        vx: u0 * e0[0] + w0 * e1[0],
        vy: u0 * e0[1] + w0 * e1[1],
        p: -d0 / (2.0 * lambda),
        angle: e0[1].atan2(e0[0]),
    })
}

/// Normalize angle to (−π/2, π/2].
pub(crate) fn normalize_angle(mut angle: f64) -> f64 {
    while angle > FRAC_PI_2 {
        angle -= PI;
    }
    while angle <= -FRAC_PI_2 {
        angle += PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_test_ellipse() -> Ellipse {
        Ellipse {
            cx: 100.0,
            cy: 80.0,
            a: 30.0,
            b: 15.0,
            angle: 0.3,
        }
    }

    #[test]
    fn ellipse_conic_roundtrip() {
        let e = make_test_ellipse();
        let c = e.to_conic();
        assert!(c.is_ellipse());
        assert_eq!(c.kind(), Some(ConicKind::Ellipse));
        let e2 = c.to_ellipse().expect("should convert back to ellipse");
        assert_relative_eq!(e.cx, e2.cx, epsilon = 1e-10);
        assert_relative_eq!(e.cy, e2.cy, epsilon = 1e-10);
        assert_relative_eq!(e.a, e2.a, epsilon = 1e-10);
        assert_relative_eq!(e.b, e2.b, epsilon = 1e-10);
        assert_relative_eq!(e.angle, e2.angle, epsilon = 1e-10);
    }

    #[test]
    fn sampson_distance_is_pixel_scaled() {
        let circle = Circle {
            cx: 10.0,
            cy: -5.0,
            r: 40.0,
        };
        let conic = circle.to_conic().unit_norm().unwrap();
        // First-order distance is close to the true distance near the curve.
        let d = conic.sampson_residual(10.0 + 40.5, -5.0);
        assert_relative_eq!(d, 0.5, max_relative = 0.01);
        assert!(conic.sampson_residual(10.0 + 39.5, -5.0) < 0.0);
        for &[x, y] in &circle.sample_points(24) {
            assert!(conic.sampson_distance(x, y) < 1e-9);
        }
    }

    #[test]
    fn circle_is_recognised() {
        let c = Circle {
            cx: 3.0,
            cy: 4.0,
            r: 12.0,
        };
        assert_eq!(c.to_conic().kind(), Some(ConicKind::Circle));
        match c.to_conic().to_ring_conic().unwrap() {
            RingConic::Circle(back) => {
                assert_relative_eq!(back.cx, 3.0, epsilon = 1e-12);
                assert_relative_eq!(back.cy, 4.0, epsilon = 1e-12);
                assert_relative_eq!(back.r, 12.0, epsilon = 1e-12);
            }
            other => panic!("expected circle, got {:?}", other),
        }
    }

    #[test]
    fn hyperbola_conic_roundtrip() {
        for &angle in &[0.0, 0.4, -1.2, FRAC_PI_2] {
            let h = Hyperbola {
                cx: -20.0,
                cy: 55.0,
                a: 12.0,
                b: 30.0,
                angle,
            };
            let c = h.to_conic();
            assert_eq!(c.kind(), Some(ConicKind::Hyperbola));
            let back = c.to_hyperbola().unwrap();
            assert_relative_eq!(back.cx, h.cx, epsilon = 1e-9);
            assert_relative_eq!(back.cy, h.cy, epsilon = 1e-9);
            assert_relative_eq!(back.a, h.a, epsilon = 1e-9);
            assert_relative_eq!(back.b, h.b, epsilon = 1e-9);
            assert_relative_eq!(back.angle, normalize_angle(angle), epsilon = 1e-9);
            for &[x, y] in &h.sample_branch(15, 1.5, 1.0) {
                assert!(c.sampson_distance(x, y) < 1e-9);
            }
        }
    }

    #[test]
    fn parabola_conic_roundtrip() {
        for &angle in &[0.0, 0.7, 2.5, -2.0, PI] {
            let p = Parabola {
                vx: 40.0,
                vy: -12.0,
                p: 8.0,
                angle,
            };
            let c = p.to_conic();
            assert_eq!(c.kind(), Some(ConicKind::Parabola));
            let back = c.to_parabola().unwrap();
            assert_relative_eq!(back.vx, p.vx, epsilon = 1e-9);
            assert_relative_eq!(back.vy, p.vy, epsilon = 1e-9);
            assert_relative_eq!(back.p, p.p, epsilon = 1e-9);
            let da = (back.angle - p.angle).rem_euclid(2.0 * PI);
            assert!(da < 1e-9 || 2.0 * PI - da < 1e-9, "angle {} vs {}", back.angle, p.angle);
            for &[x, y] in &p.sample_points(11, 3.0) {
                assert!(c.sampson_distance(x, y) < 1e-9);
            }
        }
    }

    #[test]
    fn line_is_degenerate() {
        let line = ConicCoeffs([0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(line.kind(), None);
        assert_eq!(line.to_ring_conic(), Err(ConicError::Degenerate));
        assert!(ConicCoeffs([0.0; 6]).unit_norm().is_none());
    }
}
