//! Least-squares fitting of ring conics to point sets.
//!
//! - Ellipses: direct least squares (Fitzgibbon, Pilu & Fisher, 1999).
//! - Circles: algebraic fit (Kåsa) followed by a geometric Levenberg–Marquardt
//!   refinement with an optional Huber loss.

use std::collections::HashMap;

use nalgebra::{DMatrix, Matrix2, Matrix3, Vector2, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use super::types::{Circle, ConicCoeffs, Ellipse, RingConic};

/// Smallest-to-largest scatter eigenvalue ratio below which points are
/// treated as collinear.
const SCATTER_EPS: f64 = 1e-10;

/// Shape used when fitting a ring to an unlabelled point set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitShape {
    Circle,
    Ellipse,
}

impl FitShape {
    /// Smallest point count that determines the shape.
    pub fn minimal_sample(self) -> usize {
        match self {
            Self::Circle => 3,
            Self::Ellipse => 6,
        }
    }
}

/// Fit an ellipse to `points` by the direct least-squares method.
///
/// Requires at least 6 points. The result is validated to be a real
/// ellipse.
pub fn fit_conic_direct(points: &[[f64; 2]]) -> Option<ConicCoeffs> {
    let n = points.len();
    if n < 6 {
        return None;
    }

    let (mean_x, mean_y, scale) = normalization_params(points);
    if !spans_plane(points, mean_x, mean_y, scale) {
        return None;
    }

    let mut d = DMatrix::<f64>::zeros(n, 6);
    for (i, &[px, py]) in points.iter().enumerate() {
        let x = (px - mean_x) * scale;
        let y = (py - mean_y) * scale;
        d[(i, 0)] = x * x;
        d[(i, 1)] = x * y;
        d[(i, 2)] = y * y;
        d[(i, 3)] = x;
        d[(i, 4)] = y;
        d[(i, 5)] = 1.0;
    }
    let s = d.transpose() * &d;

    let s11 = s.fixed_view::<3, 3>(0, 0).into_owned();
    let s12 = s.fixed_view::<3, 3>(0, 3).into_owned();
    let s22 = s.fixed_view::<3, 3>(3, 3).into_owned();

    // Reduced system (S11 − S12 S22⁻¹ S21) a1 = λ C1 a1 with the ellipse
    // constraint 4AC − B² = 1 encoded in C1.
    let s22_inv = s22.try_inverse()?;
    let m = s11 - s12 * s22_inv * s12.transpose();
    let c1_inv = Matrix3::new(0.0, 0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0, 0.0);
    let a1 = ellipse_eigenvector(&(c1_inv * m))?;
    let a2 = -s22_inv * s12.transpose() * a1;

    let coeffs_norm = Vector6::new(a1[0], a1[1], a1[2], a2[0], a2[1], a2[2]);
    let conic = ConicCoeffs(denormalize_conic(&coeffs_norm, mean_x, mean_y, scale));

    if !conic.is_ellipse() || !conic.to_ellipse()?.is_valid() {
        return None;
    }
    Some(conic)
}

/// Fit an ellipse and return geometric parameters.
pub fn fit_ellipse_direct(points: &[[f64; 2]]) -> Option<Ellipse> {
    fit_conic_direct(points)?.to_ellipse()
}

/// Real eigenvector of the 3×3 reduced system that satisfies the ellipse
/// constraint `4 v0 v2 − v1² > 0`.
fn ellipse_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let eigenvalues = system.complex_eigenvalues();
    let mut best: Option<(f64, Vector3<f64>)> = None;
    for ev in eigenvalues.iter() {
        if ev.im.abs() > 1e-9 * (1.0 + ev.re.abs()) {
            continue;
        }
        let Some(v) = null_vector(&(system - Matrix3::identity() * ev.re)) else {
            continue;
        };
        let constraint = 4.0 * v[0] * v[2] - v[1] * v[1];
        if constraint <= 0.0 {
            continue;
        }
        if best.as_ref().map_or(true, |(lam, _)| ev.re.abs() < *lam) {
            best = Some((ev.re.abs(), v));
        }
    }
    best.map(|(_, v)| v)
}

/// Unit vector spanning the (numerical) null space of a rank-2 matrix: the
/// largest cross product of two of its rows.
fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let r0 = m.row(0).transpose();
    let r1 = m.row(1).transpose();
    let r2 = m.row(2).transpose();
    let v = [r0.cross(&r1), r0.cross(&r2), r1.cross(&r2)]
        .into_iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let n = v.norm();
    if !n.is_finite() || n < 1e-300 {
        return None;
    }
    Some(v / n)
}

/// Whether the normalized scatter of `points` has spread in two directions.
/// Collinear or coincident points admit a whole family of degenerate conics.
fn spans_plane(points: &[[f64; 2]], mx: f64, my: f64, scale: f64) -> bool {
    let mut scatter = Matrix2::<f64>::zeros();
    for &[px, py] in points {
        let v = Vector2::new((px - mx) * scale, (py - my) * scale);
        scatter += v * v.transpose();
    }
    let eig = scatter.symmetric_eigenvalues();
    let (lo, hi) = (eig.min(), eig.max());
    hi > 0.0 && lo > SCATTER_EPS * hi
}

/// Centroid and isotropic scale mapping the mean distance to `√2`.
pub(crate) fn normalization_params(points: &[[f64; 2]]) -> (f64, f64, f64) {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| (p[0] - mean_x).hypot(p[1] - mean_y))
        .sum::<f64>()
        / n;
    let scale = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    (mean_x, mean_y, scale)
}

/// Map conic coefficients from `x' = s(x − mx), y' = s(y − my)` back to
/// the original coordinates.
fn denormalize_conic(c: &Vector6<f64>, mx: f64, my: f64, s: f64) -> [f64; 6] {
    let [a_, b_, c_, d_, e_, f_] = [c[0], c[1], c[2], c[3], c[4], c[5]];
    let s2 = s * s;
    let a = a_ * s2;
    let b = b_ * s2;
    let c = c_ * s2;
    let d = -2.0 * a_ * s2 * mx - b_ * s2 * my + d_ * s;
    let e = -b_ * s2 * mx - 2.0 * c_ * s2 * my + e_ * s;
    let f =
        a_ * s2 * mx * mx + b_ * s2 * mx * my + c_ * s2 * my * my - d_ * s * mx - e_ * s * my + f_;
    [a, b, c, d, e, f]
}

// ── Circles ────────────────────────────────────────────────────────────────

/// Algebraic circle fit (Kåsa): least squares on
/// `x² + y² + D x + E y + F = 0`, solved by SVD in normalized coordinates.
pub fn fit_circle_algebraic(points: &[[f64; 2]]) -> Option<Circle> {
    let n = points.len();
    if n < 3 {
        return None;
    }
    let (mx, my, scale) = normalization_params(points);
    let mut a = DMatrix::<f64>::zeros(n, 3);
    let mut b = nalgebra::DVector::<f64>::zeros(n);
    for (i, &[px, py]) in points.iter().enumerate() {
        let x = (px - mx) * scale;
        let y = (py - my) * scale;
        a[(i, 0)] = x;
        a[(i, 1)] = y;
        a[(i, 2)] = 1.0;
        b[i] = -(x * x + y * y);
    }
    let svd = a.svd(true, true);
    let sv = &svd.singular_values;
    if sv.max() <= 0.0 || sv.min() < 1e-10 * sv.max() {
        return None;
    }
    let sol = svd.solve(&b, 1e-12).ok()?;
    let (d, e, f) = (sol[0], sol[1], sol[2]);
    let cx = -0.5 * d;
    let cy = -0.5 * e;
    let r2 = cx * cx + cy * cy - f;
    if !(r2 > 0.0) {
        return None;
    }
    let circle = Circle {
        cx: mx + cx / scale,
        cy: my + cy / scale,
        r: r2.sqrt() / scale,
    };
    circle.is_valid().then_some(circle)
}

/// Geometric circle refinement minimizing `Σ ρ(|p − c| − r)` with
/// Levenberg–Marquardt; `ρ` is Huber with `huber_delta` when given,
/// plain squares otherwise.
pub fn refine_circle_geometric(
    points: &[[f64; 2]],
    init: Circle,
    max_iters: usize,
    huber_delta: Option<f64>,
) -> Option<Circle> {
    if points.len() < 3 || !init.is_valid() {
        return None;
    }

    use tiny_solver::factors::na as ts_na;
    use tiny_solver::Optimizer;

    #[derive(Debug, Clone)]
    struct RadialFactor {
        x: f64,
        y: f64,
    }

    impl<T: ts_na::RealField> tiny_solver::factors::Factor<T> for RadialFactor {
        fn residual_func(&self, params: &[ts_na::DVector<T>]) -> ts_na::DVector<T> {
            let c = &params[0];
            let dx = T::from_f64(self.x).unwrap() - c[0].clone();
            let dy = T::from_f64(self.y).unwrap() - c[1].clone();
            let dist = (dx.clone() * dx + dy.clone() * dy).sqrt();
            ts_na::DVector::<T>::from_vec(vec![dist - c[2].clone()])
        }
    }

    let mut problem = tiny_solver::Problem::new();
    for &[x, y] in points {
        if !x.is_finite() || !y.is_finite() {
            continue;
        }
        let factor = Box::new(RadialFactor { x, y });
        match huber_delta {
            Some(delta) => problem.add_residual_block(
                1,
                &["circle"],
                factor,
                Some(Box::new(tiny_solver::loss_functions::HuberLoss::new(
                    delta.max(1e-6),
                ))),
            ),
            None => problem.add_residual_block(1, &["circle"], factor, None),
        };
    }

    let mut initial_values = HashMap::<String, ts_na::DVector<f64>>::new();
    initial_values.insert(
        "circle".to_string(),
        ts_na::DVector::<f64>::from_vec(vec![init.cx, init.cy, init.r]),
    );

    let optimizer = tiny_solver::LevenbergMarquardtOptimizer::default();
    let options = tiny_solver::OptimizerOptions {
        max_iteration: max_iters.clamp(1, 200),
        verbosity_level: 0,
        ..Default::default()
    };
    let result = optimizer.optimize(&problem, &initial_values, Some(options))?;
    let c = result.get("circle")?;
    if c.len() != 3 {
        return None;
    }
    let circle = Circle {
        cx: c[0],
        cy: c[1],
        r: c[2].abs(),
    };
    circle.is_valid().then_some(circle)
}

/// Circle through three points, `None` for (near-)collinear input.
pub fn circumcircle(p0: [f64; 2], p1: [f64; 2], p2: [f64; 2]) -> Option<Circle> {
    let (ax, ay) = (p1[0] - p0[0], p1[1] - p0[1]);
    let (bx, by) = (p2[0] - p0[0], p2[1] - p0[1]);
    let det = 2.0 * (ax * by - ay * bx);
    let scale = (ax * ax + ay * ay).max(bx * bx + by * by);
    if det.abs() <= 1e-12 * scale {
        return None;
    }
    let a2 = ax * ax + ay * ay;
    let b2 = bx * bx + by * by;
    let ux = (by * a2 - ay * b2) / det;
    let uy = (ax * b2 - bx * a2) / det;
    let circle = Circle {
        cx: p0[0] + ux,
        cy: p0[1] + uy,
        r: ux.hypot(uy),
    };
    circle.is_valid().then_some(circle)
}

/// Least-squares fit of `shape` to all points.
///
/// Circles are refined geometrically after the algebraic start; ellipses use
/// the direct method only.
pub fn fit_shape(points: &[[f64; 2]], shape: FitShape, huber_delta: Option<f64>) -> Option<RingConic> {
    match shape {
        FitShape::Circle => {
            let init = fit_circle_algebraic(points)?;
            let refined = refine_circle_geometric(points, init, 50, huber_delta).unwrap_or(init);
            Some(RingConic::Circle(refined))
        }
        FitShape::Ellipse => fit_ellipse_direct(points).map(RingConic::Ellipse),
    }
}

/// RMS Sampson distance of points to a ring conic.
pub fn rms_sampson_distance(conic: &RingConic, points: &[[f64; 2]]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = points
        .iter()
        .map(|&[x, y]| conic.sampson_distance(x, y).powi(2))
        .sum();
    (sum_sq / points.len() as f64).sqrt()
}
