use serde::{Deserialize, Serialize};

/// Configuration for [`minimize`](super::minimize).
///
/// All search happens in scaled coordinates `z`, with parameters
/// `x = x0 + scales ∘ z`, so `initial_sigma` and `tol_x` are in units of the
/// per-parameter scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// RNG seed for CMA-ES sampling; identical seeds give identical fits.
    pub seed: u64,
    /// Offspring per generation; `None` uses `4 + ⌊3 ln n⌋`.
    pub population: Option<usize>,
    /// Initial step size in scaled units.
    pub initial_sigma: f64,
    /// Generation cap for CMA-ES.
    pub max_generations: usize,
    /// Stop when the best cost varies less than this over recent generations.
    pub tol_fun: f64,
    /// Stop when the search distribution shrinks below this (scaled units).
    pub tol_x: f64,
    /// Stop as soon as the cost reaches this value.
    pub target_cost: f64,
    /// Run a Levenberg–Marquardt polish after CMA-ES.
    pub polish: bool,
    /// Iteration cap for the polish.
    pub max_polish_iterations: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            population: None,
            initial_sigma: 0.5,
            max_generations: 600,
            tol_fun: 1e-12,
            tol_x: 1e-9,
            target_cost: 0.0,
            polish: true,
            max_polish_iterations: 100,
        }
    }
}
