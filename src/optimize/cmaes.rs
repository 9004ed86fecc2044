//! Covariance matrix adaptation evolution strategy, (μ/μ_w, λ) variant.
//!
//! Each generation samples `λ` candidates from `N(m, σ²C)`, recombines the
//! best `μ` into a new mean with log-decreasing weights, and adapts `C`
//! (rank-one update through the evolution path `p_c` plus rank-μ update)
//! and `σ` (cumulative step-size adaptation through `p_σ`). Candidates are
//! clamped into the bounds; the clamped point is what enters the update.

use std::collections::VecDeque;

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::debug;

use super::{OptimizerConfig, ScaledObjective};

/// Initial step size in sigma units.
const INITIAL_STEP: f64 = 0.5;

/// Floor for covariance eigenvalues.
const MIN_EIGENVALUE: f64 = 1e-30;

/// Strategy parameters derived from the dimension.
struct Params {
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

impl Params {
    fn new(n: usize) -> Self {
        let nf = n as f64;
        let lambda = 4 + (3.0 * nf.ln()).floor() as usize;
        let mu = lambda / 2;
        let raw: Vec<f64> = (1..=mu)
            .map(|i| (mu as f64 + 0.5).ln() - (i as f64).ln())
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
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

/// Run CMA-ES. Returns `true` on convergence, `false` when the budget ran out.
pub(crate) fn run<F>(obj: &mut ScaledObjective<'_, F>, config: &OptimizerConfig) -> bool
where
    F: FnMut(&[f64]) -> f64,
{
    let n = obj.dimension();
    let p = Params::new(n);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut mean = DVector::<f64>::zeros(n);
    let mut step = INITIAL_STEP;
    let mut cov = DMatrix::<f64>::identity(n, n);
    let mut basis = DMatrix::<f64>::identity(n, n);
    let mut scales = DVector::<f64>::from_element(n, 1.0);
    let mut inv_sqrt_cov = DMatrix::<f64>::identity(n, n);
    let mut path_c = DVector::<f64>::zeros(n);
    let mut path_s = DVector::<f64>::zeros(n);

    let history_len = 10 + (30.0 * n as f64 / p.lambda as f64).ceil() as usize;
    let mut best_history: VecDeque<f64> = VecDeque::with_capacity(history_len);

    let mut generation = 0usize;
    loop {
        generation += 1;

        // Sample and evaluate the population.
        let mut population: Vec<(DVector<f64>, f64)> = Vec::with_capacity(p.lambda);
        for _ in 0..p.lambda {
            let z = DVector::<f64>::from_iterator(
                n,
                (0..n).map(|_| StandardNormal.sample(&mut rng)),
            );
            let y = &basis * z.component_mul(&scales);
            let x = obj.clamp(&(&mean + y * step));
            let Some(f) = obj.eval(&x) else {
                return false;
            };
            population.push((x, f));
        }
        population.sort_by(|a, b| a.1.total_cmp(&b.1));

        // Recombination.
        let old_mean = mean.clone();
        mean = DVector::zeros(n);
        for (w, (x, _)) in p.weights.iter().zip(&population) {
            mean += x * *w;
        }
        let shift = (&mean - &old_mean) / step;

        // Step-size path.
        path_s = &path_s * (1.0 - p.cs)
            + (&inv_sqrt_cov * &shift) * (p.cs * (2.0 - p.cs) * p.mueff).sqrt();
        let ps_norm = path_s.norm();
        let decay = 1.0 - (1.0 - p.cs).powi(2 * generation as i32);
        let hsig = ps_norm / decay.max(f64::MIN_POSITIVE).sqrt() / p.chi_n
            < 1.4 + 2.0 / (n as f64 + 1.0);
        let hsig_f = if hsig { 1.0 } else { 0.0 };

        // Covariance path and update.
        path_c = &path_c * (1.0 - p.cc) + &shift * (hsig_f * (p.cc * (2.0 - p.cc) * p.mueff).sqrt());
        let mut rank_mu = DMatrix::<f64>::zeros(n, n);
        for (w, (x, _)) in p.weights.iter().zip(&population) {
            let d = (x - &old_mean) / step;
            rank_mu += (&d * d.transpose()) * *w;
        }
        let rank_one = &path_c * path_c.transpose()
            + &cov * ((1.0 - hsig_f) * p.cc * (2.0 - p.cc));
        cov = &cov * (1.0 - p.c1 - p.cmu) + rank_one * p.c1 + rank_mu * p.cmu;

        step *= ((p.cs / p.damps) * (ps_norm / p.chi_n - 1.0)).exp();

        // Eigendecomposition of the symmetrized covariance.
        let sym = (&cov + cov.transpose()) * 0.5;
        let eig = sym.clone().symmetric_eigen();
        cov = sym;
        basis = eig.eigenvectors;
        scales = eig.eigenvalues.map(|v| v.max(MIN_EIGENVALUE).sqrt());
        let inv_scales = DMatrix::from_diagonal(&scales.map(|s| 1.0 / s));
        inv_sqrt_cov = &basis * inv_scales * basis.transpose();

        // Convergence checks.
        let gen_best = population[0].1;
        let gen_worst = population[p.lambda - 1].1;
        if best_history.len() == history_len {
            best_history.pop_front();
        }
        best_history.push_back(gen_best);
        let hist_range = best_history
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        let max_spread = step * cov.diagonal().iter().fold(0.0_f64, |a, &v| a.max(v.sqrt()));
        let fun_flat = gen_worst - gen_best <= config.tolerance_fun
            && best_history.len() == history_len
            && hist_range.1 - hist_range.0 <= config.tolerance_fun;

        if generation % 50 == 0 {
            debug!(
                "CMA-ES generation {}: best {:.6e}, step {:.3e}, spread {:.3e}",
                generation, gen_best, step, max_spread
            );
        }

        if max_spread < config.tolerance_x || fun_flat {
            debug!(
                "CMA-ES converged at generation {} (spread {:.3e}, best {:.6e})",
                generation,
                max_spread,
                obj.best_value()
            );
            return true;
        }
        if obj.exhausted() {
            return false;
        }
    }
}
