//! Derivative-free least-squares minimisation.
//!
//! [`minimize`] runs a seeded CMA-ES search (Hansen, "The CMA Evolution
//! Strategy: A Tutorial", 2016) over a [`LeastSquaresProblem`], then polishes
//! the best point with a finite-difference Levenberg–Marquardt loop that
//! reweights residuals for the chosen [`Loss`].
//!
//! Parameter vectors the problem rejects cost `+∞`: CMA-ES ranks them last
//! and the polish never steps onto them.

mod cmaes;
mod config;
mod lm;

pub use config::OptimizerConfig;

use serde::{Deserialize, Serialize};

use crate::monitor::ProgressMonitor;

// ── Problem and loss ───────────────────────────────────────────────────────

/// A residual vector as a function of a flat parameter vector.
pub trait LeastSquaresProblem {
    /// Number of parameters.
    fn dimension(&self) -> usize;

    /// Write the residuals at `params` into `out` (cleared first).
    ///
    /// Returns `false` when `params` lies outside the problem's domain. The
    /// residual count must not depend on `params`.
    fn residuals(&self, params: &[f64], out: &mut Vec<f64>) -> bool;
}

/// Aggregation of residuals into a scalar cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Loss {
    /// `Σ r²`.
    SumOfSquares,
    /// `Σ ρ(r)` with `ρ(r) = r²` for `|r| ≤ δ` and `2δ|r| − δ²` beyond.
    Huber {
        /// Transition point, in residual units.
        delta: f64,
    },
}

impl Loss {
    /// Per-residual cost.
    pub fn rho(&self, r: f64) -> f64 {
        match *self {
            Self::SumOfSquares => r * r,
            Self::Huber { delta } => {
                let a = r.abs();
                if a <= delta {
                    r * r
                } else {
                    2.0 * delta * a - delta * delta
                }
            }
        }
    }

    /// IRLS weight `ρ'(r) / 2r`.
    pub fn weight(&self, r: f64) -> f64 {
        match *self {
            Self::SumOfSquares => 1.0,
            Self::Huber { delta } => {
                let a = r.abs();
                if a <= delta {
                    1.0
                } else {
                    delta / a
                }
            }
        }
    }

    /// Total cost; non-finite totals map to `+∞`.
    pub fn total(&self, residuals: &[f64]) -> f64 {
        let sum: f64 = residuals.iter().map(|&r| self.rho(r)).sum();
        if sum.is_nan() {
            f64::INFINITY
        } else {
            sum
        }
    }
}

// ── Results and errors ─────────────────────────────────────────────────────

/// Why the CMA-ES stage stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    TargetCost,
    TolX,
    TolFun,
    MaxGenerations,
    /// The step size collapsed to zero or became non-finite.
    Stalled,
}

/// Best point found by [`minimize`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Minimum {
    /// Parameters in problem units.
    pub x: Vec<f64>,
    /// Cost under the requested loss.
    pub cost: f64,
    /// Residual evaluations, finite-difference probes included.
    pub evaluations: usize,
    /// CMA-ES generations run.
    pub generations: usize,
    /// Accepted polish steps.
    pub polish_steps: usize,
    pub termination: Termination,
}

/// Errors from [`minimize`].
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeError {
    /// The progress monitor requested cancellation.
    Cancelled,
    /// Start vector or scales do not match the problem dimension.
    DimensionMismatch {
        /// Problem dimension.
        expected: usize,
        /// Offending length.
        got: usize,
    },
    /// No sampled parameter vector produced a finite cost.
    NoFiniteCost,
}

impl std::fmt::Display for OptimizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "optimisation cancelled"),
            Self::DimensionMismatch { expected, got } => {
                write!(f, "expected {} parameters, got {}", expected, got)
            }
            Self::NoFiniteCost => write!(f, "no parameter vector produced a finite cost"),
        }
    }
}

impl std::error::Error for OptimizeError {}

// ── Driver ─────────────────────────────────────────────────────────────────

/// Counts evaluations and maps rejected parameters to `+∞`.
pub(crate) struct Objective<'a> {
    problem: &'a dyn LeastSquaresProblem,
    loss: Loss,
    x0: &'a [f64],
    scales: &'a [f64],
    buf: Vec<f64>,
    evaluations: usize,
}

impl<'a> Objective<'a> {
    fn new(problem: &'a dyn LeastSquaresProblem, loss: Loss, x0: &'a [f64], scales: &'a [f64]) -> Self {
        Self {
            problem,
            loss,
            x0,
            scales,
            buf: Vec::new(),
            evaluations: 0,
        }
    }

    fn dimension(&self) -> usize {
        self.x0.len()
    }

    /// Problem-unit parameters for scaled coordinates `z`.
    fn unscale(&self, z: &[f64]) -> Vec<f64> {
        self.x0
            .iter()
            .zip(self.scales)
            .zip(z)
            .map(|((&x0, &s), &zi)| x0 + s * zi)
            .collect()
    }

    /// Residuals at scaled coordinates `z`, or `None` outside the domain.
    fn residuals(&mut self, z: &[f64]) -> Option<Vec<f64>> {
        let x = self.unscale(z);
        self.evaluations += 1;
        self.buf.clear();
        if !self.problem.residuals(&x, &mut self.buf) {
            return None;
        }
        Some(self.buf.clone())
    }

    /// Cost at scaled coordinates `z`.
    fn cost(&mut self, z: &[f64]) -> f64 {
        let x = self.unscale(z);
        self.evaluations += 1;
        self.buf.clear();
        if !self.problem.residuals(&x, &mut self.buf) {
            return f64::INFINITY;
        }
        self.loss.total(&self.buf)
    }
}

/// Minimise `loss(problem.residuals(x))` starting from `x0`.
///
/// `scales` sets the typical magnitude of each parameter's uncertainty; the
/// search is isotropic in `x / scales`. The monitor is polled once per
/// generation and once per polish iteration.
pub fn minimize(
    problem: &dyn LeastSquaresProblem,
    x0: &[f64],
    scales: &[f64],
    loss: Loss,
    config: &OptimizerConfig,
    monitor: &dyn ProgressMonitor,
) -> Result<Minimum, OptimizeError> {
    let n = problem.dimension();
    if x0.len() != n {
        return Err(OptimizeError::DimensionMismatch {
            expected: n,
            got: x0.len(),
        });
    }
    if scales.len() != n {
        return Err(OptimizeError::DimensionMismatch {
            expected: n,
            got: scales.len(),
        });
    }

    let mut objective = Objective::new(problem, loss, x0, scales);
    if n == 0 {
        let cost = objective.cost(&[]);
        if !cost.is_finite() {
            return Err(OptimizeError::NoFiniteCost);
        }
        return Ok(Minimum {
            x: Vec::new(),
            cost,
            evaluations: objective.evaluations,
            generations: 0,
            polish_steps: 0,
            termination: Termination::TargetCost,
        });
    }

    let search = cmaes::search(&mut objective, config, monitor)?;
    if !search.cost.is_finite() {
        return Err(OptimizeError::NoFiniteCost);
    }
    tracing::debug!(
        cost = search.cost,
        generations = search.generations,
        termination = ?search.termination,
        "cma-es finished"
    );

    let (z, cost, polish_steps) = if config.polish {
        lm::polish(
            &mut objective,
            search.z,
            search.cost,
            config.max_polish_iterations,
            monitor,
        )?
    } else {
        (search.z, search.cost, 0)
    };
    tracing::debug!(cost, polish_steps, evaluations = objective.evaluations, "minimize finished");

    Ok(Minimum {
        x: objective.unscale(&z),
        cost,
        evaluations: objective.evaluations,
        generations: search.generations,
        polish_steps,
        termination: search.termination,
    })
}
