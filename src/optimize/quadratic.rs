//! Trust-region minimization on a BFGS-updated quadratic model.
//!
//! The model at the current point `z` is `m(s) = f + gᵀs + ½ sᵀBs` with `g`
//! a central-difference gradient and `B` a BFGS approximation of the Hessian.
//! Steps come from the dogleg path inside a ball of radius `Δ` and are
//! clamped into the bounds; the ratio of actual to predicted reduction
//! drives the radius.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::{OptimizerConfig, ScaledObjective};

/// Finite-difference half-step in sigma units.
const GRADIENT_STEP: f64 = 1e-5;
const INITIAL_RADIUS: f64 = 1.0;
const MAX_RADIUS: f64 = 1e3;
/// Minimum actual/predicted reduction ratio for accepting a step.
const ACCEPT_RATIO: f64 = 1e-4;

/// Run the trust-region method. Returns `true` on convergence, `false` when
/// the budget ran out.
pub(crate) fn run<F>(obj: &mut ScaledObjective<'_, F>, config: &OptimizerConfig) -> bool
where
    F: FnMut(&[f64]) -> f64,
{
    let n = obj.dimension();
    let mut z = DVector::<f64>::zeros(n);
    let Some(mut f) = obj.eval(&z) else {
        return false;
    };
    let Some(mut g) = gradient(obj, &z) else {
        return false;
    };
    let mut hessian = DMatrix::<f64>::identity(n, n);
    let mut radius = INITIAL_RADIUS;
    let grad_tol = config.tolerance_fun.sqrt();

    let mut iteration = 0usize;
    loop {
        iteration += 1;
        let pg = projected_gradient_norm(obj, &z, &g);
        if pg <= grad_tol * (1.0 + f.abs()) || radius < config.tolerance_x {
            debug!(
                "Quadratic model converged after {} iterations: f {:.6e}, |pg| {:.3e}, radius {:.3e}",
                iteration, f, pg, radius
            );
            return true;
        }

        let step = dogleg(&g, &hessian, radius);
        let trial = obj.clamp(&(&z + step));
        let s = &trial - &z;
        let predicted = -(g.dot(&s) + 0.5 * s.dot(&(&hessian * &s)));
        let Some(f_trial) = obj.eval(&trial) else {
            return false;
        };
        let actual = f - f_trial;
        let ratio = if predicted > 0.0 { actual / predicted } else { -1.0 };

        if ratio < 0.25 {
            radius *= 0.25;
        } else if ratio > 0.75 && s.norm() >= 0.99 * radius {
            radius = (2.0 * radius).min(MAX_RADIUS);
        }

        if ratio > ACCEPT_RATIO {
            let Some(g_trial) = gradient(obj, &trial) else {
                return false;
            };
            let y = &g_trial - &g;
            let sy = s.dot(&y);
            if sy > 1e-12 * s.norm() * y.norm() {
                let bs = &hessian * &s;
                let sbs = s.dot(&bs);
                hessian += &y * y.transpose() / sy - &bs * bs.transpose() / sbs;
            }
            z = trial;
            f = f_trial;
            g = g_trial;
        }

        if iteration % 100 == 0 {
            debug!(
                "Quadratic model iteration {}: f {:.6e}, radius {:.3e}",
                iteration, f, radius
            );
        }
    }
}

/// Central-difference gradient, one-sided where a bound cuts the stencil.
fn gradient<F>(obj: &mut ScaledObjective<'_, F>, z: &DVector<f64>) -> Option<DVector<f64>>
where
    F: FnMut(&[f64]) -> f64,
{
    let n = z.len();
    let mut g = DVector::<f64>::zeros(n);
    for i in 0..n {
        let mut plus = z.clone();
        let mut minus = z.clone();
        plus[i] = (z[i] + GRADIENT_STEP).min(obj.upper()[i]);
        minus[i] = (z[i] - GRADIENT_STEP).max(obj.lower()[i]);
        let width = plus[i] - minus[i];
        if width <= 0.0 {
            continue;
        }
        let f_plus = obj.eval(&plus)?;
        let f_minus = obj.eval(&minus)?;
        g[i] = (f_plus - f_minus) / width;
    }
    Some(g)
}

/// Gradient norm with components that push into an active bound removed.
fn projected_gradient_norm<F>(obj: &ScaledObjective<'_, F>, z: &DVector<f64>, g: &DVector<f64>) -> f64
where
    F: FnMut(&[f64]) -> f64,
{
    let mut total = 0.0;
    for i in 0..z.len() {
        let at_lower = z[i] <= obj.lower()[i] && g[i] > 0.0;
        let at_upper = z[i] >= obj.upper()[i] && g[i] < 0.0;
        if !(at_lower || at_upper) {
            total += g[i] * g[i];
        }
    }
    total.sqrt()
}

/// Dogleg step for the model `gᵀs + ½ sᵀBs` inside radius `radius`.
fn dogleg(g: &DVector<f64>, hessian: &DMatrix<f64>, radius: f64) -> DVector<f64> {
    let g_norm = g.norm();
    if g_norm == 0.0 {
        return DVector::zeros(g.len());
    }
    let gbg = g.dot(&(hessian * g));
    let cauchy = if gbg > 0.0 {
        -g * (g.dot(g) / gbg)
    } else {
        -g * (radius / g_norm)
    };
    let cauchy_norm = cauchy.norm();
    if cauchy_norm >= radius {
        return cauchy * (radius / cauchy_norm);
    }

    let newton = match hessian.clone().cholesky() {
        Some(chol) => -chol.solve(g),
        None => return cauchy,
    };
    if newton.norm() <= radius {
        return newton;
    }

    // Solve |cauchy + τ·(newton − cauchy)| = radius for τ in [0, 1].
    let d = &newton - &cauchy;
    let a = d.dot(&d);
    let b = 2.0 * cauchy.dot(&d);
    let c = cauchy.dot(&cauchy) - radius * radius;
    let tau = (-b + (b * b - 4.0 * a * c).max(0.0).sqrt()) / (2.0 * a);
    cauchy + d * tau.clamp(0.0, 1.0)
}
