//! Covariance matrix adaptation evolution strategy in scaled coordinates.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::prelude::*;
use rand_distr::StandardNormal;

use super::{Objective, OptimizeError, OptimizerConfig, Termination};
use crate::monitor::ProgressMonitor;

/// Smallest covariance eigenvalue kept when taking square roots.
const MIN_EIGENVALUE: f64 = 1e-30;

pub(super) struct Search {
    pub z: Vec<f64>,
    pub cost: f64,
    pub generations: usize,
    pub termination: Termination,
}

/// Strategy constants for dimension `n` and population `lambda`.
struct Strategy {
    lambda: usize,
    weights: Vec<f64>,
    mueff: f64,
    cc: f64,
    cs: f64,
    c1: f64,
    cmu: f64,
    damps: f64,
    chi_n: f64,
}

impl Strategy {
    fn new(n: usize, population: Option<usize>) -> Self {
        let nf = n as f64;
        let lambda = population
            .unwrap_or(4 + (3.0 * nf.ln()).floor() as usize)
            .max(4);
        let mu = lambda / 2;
        let raw: Vec<f64> = (0..mu)
            .map(|i| (mu as f64 + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let sum: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / sum).collect();
        let mueff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let cc = (4.0 + mueff / nf) / (nf + 4.0 + 2.0 * mueff / nf);
        let cs = (mueff + 2.0) / (nf + mueff + 5.0);
        let c1 = 2.0 / ((nf + 1.3).powi(2) + mueff);
        let cmu = (1.0 - c1).min(2.0 * (mueff - 2.0 + 1.0 / mueff) / ((nf + 2.0).powi(2) + mueff));
        let damps = 1.0 + 2.0 * (((mueff - 1.0) / (nf + 1.0)).sqrt() - 1.0).max(0.0) + cs;
        let chi_n = nf.sqrt() * (1.0 - 1.0 / (4.0 * nf) + 1.0 / (21.0 * nf * nf));
        Self {
            lambda,
            weights,
            mueff,
            cc,
            cs,
            c1,
            cmu,
            damps,
            chi_n,
        }
    }
}

pub(super) fn search(
    objective: &mut Objective<'_>,
    config: &OptimizerConfig,
    monitor: &dyn ProgressMonitor,
) -> Result<Search, OptimizeError> {
    let n = objective.dimension();
    let strategy = Strategy::new(n, config.population);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut mean = DVector::<f64>::zeros(n);
    let mut sigma = config.initial_sigma;
    let mut pc = DVector::<f64>::zeros(n);
    let mut ps = DVector::<f64>::zeros(n);
    let mut cov = DMatrix::<f64>::identity(n, n);
    let mut basis = DMatrix::<f64>::identity(n, n);
    let mut scale = DVector::<f64>::from_element(n, 1.0);
    let mut inv_sqrt_cov = DMatrix::<f64>::identity(n, n);

    let mut best_z = vec![0.0; n];
    let mut best_cost = objective.cost(&best_z);

    // Best cost per generation, for the flat-fitness test.
    let history_len = 10 + (30.0 * n as f64 / strategy.lambda as f64).ceil() as usize;
    let mut history: Vec<f64> = Vec::new();

    let mut samples = vec![DVector::<f64>::zeros(n); strategy.lambda];
    let mut costs = vec![0.0; strategy.lambda];
    let mut order: Vec<usize> = (0..strategy.lambda).collect();
    let mut generation = 0;

    let termination = loop {
        if best_cost <= config.target_cost {
            break Termination::TargetCost;
        }
        if generation >= config.max_generations {
            break Termination::MaxGenerations;
        }
        if monitor.is_cancelled() {
            return Err(OptimizeError::Cancelled);
        }
        monitor.worked(1);
        generation += 1;

        for (sample, cost) in samples.iter_mut().zip(costs.iter_mut()) {
            let normal = DVector::<f64>::from_fn(n, |_, _| rng.sample::<f64, _>(StandardNormal));
            *sample = &mean + (&basis * scale.component_mul(&normal)) * sigma;
            let c = objective.cost(sample.as_slice());
            *cost = if c.is_nan() { f64::INFINITY } else { c };
        }
        order.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));

        let gen_best = costs[order[0]];
        if gen_best < best_cost {
            best_cost = gen_best;
            best_z.copy_from_slice(samples[order[0]].as_slice());
        }

        let old_mean = mean.clone();
        mean.fill(0.0);
        for (w, &i) in strategy.weights.iter().zip(&order) {
            mean += &samples[i] * *w;
        }
        let y_w = (&mean - &old_mean) / sigma;

        let cs = strategy.cs;
        ps = &ps * (1.0 - cs) + (&inv_sqrt_cov * &y_w) * (cs * (2.0 - cs) * strategy.mueff).sqrt();
        let ps_norm = ps.norm();
        let decay = 1.0 - (1.0 - cs).powi(2 * generation as i32);
        let hsig = ps_norm / decay.sqrt() / strategy.chi_n < 1.4 + 2.0 / (n as f64 + 1.0);
        let hsig_f = if hsig { 1.0 } else { 0.0 };

        let cc = strategy.cc;
        pc = &pc * (1.0 - cc) + &y_w * (hsig_f * (cc * (2.0 - cc) * strategy.mueff).sqrt());

        let mut rank_mu = DMatrix::<f64>::zeros(n, n);
        for (w, &i) in strategy.weights.iter().zip(&order) {
            let y = (&samples[i] - &old_mean) / sigma;
            rank_mu += (&y * y.transpose()) * *w;
        }
        let (c1, cmu) = (strategy.c1, strategy.cmu);
        cov = &cov * (1.0 - c1 - cmu)
            + (&pc * pc.transpose() + &cov * ((1.0 - hsig_f) * cc * (2.0 - cc))) * c1
            + rank_mu * cmu;

        sigma *= ((cs / strategy.damps) * (ps_norm / strategy.chi_n - 1.0)).exp();
        if !(sigma.is_finite() && sigma > 0.0) {
            break Termination::Stalled;
        }

        cov = (&cov + cov.transpose()) * 0.5;
        let eigen = SymmetricEigen::new(cov.clone());
        basis = eigen.eigenvectors;
        scale = eigen.eigenvalues.map(|v| v.max(MIN_EIGENVALUE).sqrt());
        let inv_scale = DMatrix::from_diagonal(&scale.map(|v| 1.0 / v));
        inv_sqrt_cov = &basis * inv_scale * basis.transpose();

        history.push(gen_best);
        if history.len() > history_len {
            history.remove(0);
        }
        if sigma * scale.max() < config.tol_x {
            break Termination::TolX;
        }
        if history.len() == history_len {
            let hi = history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let lo = history.iter().copied().fold(f64::INFINITY, f64::min);
            let spread = costs[order[strategy.lambda - 1]] - costs[order[0]];
            if hi - lo < config.tol_fun && spread < config.tol_fun {
                break Termination::TolFun;
            }
        }
    };

    tracing::trace!(generation, sigma, best_cost, ?termination, "cma-es stopped");
    Ok(Search {
        z: best_z,
        cost: best_cost,
        generations: generation,
        termination,
    })
}
