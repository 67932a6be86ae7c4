//! Finite-difference Levenberg–Marquardt with IRLS weights.

use nalgebra::{DMatrix, DVector};

use super::{Objective, OptimizeError};
use crate::monitor::ProgressMonitor;

/// Central-difference step in scaled units.
const FD_STEP: f64 = 1e-6;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e16;

/// Jacobian of the residuals at `z`, one column per parameter.
///
/// Falls back to a one-sided difference when one probe leaves the domain
/// and leaves the column zero when both do.
fn jacobian(objective: &mut Objective<'_>, z: &[f64], r0: &[f64]) -> DMatrix<f64> {
    let n = z.len();
    let m = r0.len();
    let mut jac = DMatrix::<f64>::zeros(m, n);
    let mut probe = z.to_vec();
    for k in 0..n {
        probe[k] = z[k] + FD_STEP;
        let plus = objective.residuals(&probe).filter(|r| r.len() == m);
        probe[k] = z[k] - FD_STEP;
        let minus = objective.residuals(&probe).filter(|r| r.len() == m);
        probe[k] = z[k];

        let column: Option<Vec<f64>> = match (plus, minus) {
            (Some(p), Some(q)) => Some(p.iter().zip(&q).map(|(a, b)| (a - b) / (2.0 * FD_STEP)).collect()),
            (Some(p), None) => Some(p.iter().zip(r0).map(|(a, b)| (a - b) / FD_STEP).collect()),
            (None, Some(q)) => Some(r0.iter().zip(&q).map(|(a, b)| (a - b) / FD_STEP).collect()),
            (None, None) => None,
        };
        if let Some(column) = column {
            for (i, v) in column.into_iter().enumerate() {
                jac[(i, k)] = if v.is_finite() { v } else { 0.0 };
            }
        }
    }
    jac
}

/// Polish `z` until no damped step lowers the cost.
///
/// Returns the final point, its cost and the number of accepted steps.
pub(super) fn polish(
    objective: &mut Objective<'_>,
    mut z: Vec<f64>,
    mut cost: f64,
    max_iterations: usize,
    monitor: &dyn ProgressMonitor,
) -> Result<(Vec<f64>, f64, usize), OptimizeError> {
    let loss = objective.loss;
    let mut damping = INITIAL_DAMPING;
    let mut accepted = 0;

    'outer: for _ in 0..max_iterations {
        if monitor.is_cancelled() {
            return Err(OptimizeError::Cancelled);
        }
        let Some(r0) = objective.residuals(&z) else {
            break;
        };
        let jac = jacobian(objective, &z, &r0);
        let weights = DVector::from_iterator(r0.len(), r0.iter().map(|&r| loss.weight(r)));
        let residuals = DVector::from_column_slice(&r0);

        let weighted_jac = DMatrix::from_fn(jac.nrows(), jac.ncols(), |i, k| jac[(i, k)] * weights[i]);
        let normal = jac.transpose() * &weighted_jac;
        let gradient = weighted_jac.transpose() * residuals;
        let diag_floor = 1e-12 * normal.diagonal().max().max(1e-300);

        loop {
            let mut lhs = normal.clone();
            for k in 0..lhs.ncols() {
                lhs[(k, k)] += damping * normal[(k, k)].max(diag_floor);
            }
            let step = match lhs.clone().cholesky() {
                Some(chol) => chol.solve(&gradient),
                None => match lhs.lu().solve(&gradient) {
                    Some(s) => s,
                    None => {
                        damping *= 10.0;
                        if damping > MAX_DAMPING {
                            break 'outer;
                        }
                        continue;
                    }
                },
            };
            let candidate: Vec<f64> = z.iter().zip(step.iter()).map(|(a, d)| a - d).collect();
            let candidate_cost = objective.cost(&candidate);
            if candidate_cost < cost {
                let gain = cost - candidate_cost;
                z = candidate;
                cost = candidate_cost;
                accepted += 1;
                damping = (damping * 0.1).max(1e-12);
                if gain <= f64::EPSILON * cost || step.norm() < 1e-14 {
                    break 'outer;
                }
                break;
            }
            damping *= 10.0;
            if damping > MAX_DAMPING {
                break 'outer;
            }
        }
    }

    tracing::trace!(cost, accepted, damping, "lm polish stopped");
    Ok((z, cost, accepted))
}
