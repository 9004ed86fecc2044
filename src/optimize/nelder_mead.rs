//! Nelder–Mead downhill simplex with bound clamping and restarts.

use nalgebra::DVector;
use tracing::debug;

use super::{OptimizerConfig, ScaledObjective};

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Edge length of the initial simplex in sigma units.
const INITIAL_EDGE: f64 = 1.0;

/// A collapsed simplex is rebuilt around its best vertex until a rebuild no
/// longer improves the best value, at most this many times.
const MAX_RESTARTS: usize = 20;

/// Run the simplex. Returns `true` on convergence, `false` when the budget ran out.
pub(crate) fn run<F>(obj: &mut ScaledObjective<'_, F>, config: &OptimizerConfig) -> bool
where
    F: FnMut(&[f64]) -> f64,
{
    let mut start = DVector::<f64>::zeros(obj.dimension());
    let mut previous = f64::INFINITY;
    for restart in 0..=MAX_RESTARTS {
        let Some((best, f_best)) = search(obj, config, &start) else {
            return false;
        };
        if previous - f_best <= config.tolerance_fun {
            debug!(
                "Nelder-Mead settled after {} restarts, best {:.6e}",
                restart, f_best
            );
            return true;
        }
        previous = f_best;
        start = best;
    }
    true
}

/// One simplex descent from `start` until the simplex collapses. `None` once
/// the budget is spent.
fn search<F>(
    obj: &mut ScaledObjective<'_, F>,
    config: &OptimizerConfig,
    start: &DVector<f64>,
) -> Option<(DVector<f64>, f64)>
where
    F: FnMut(&[f64]) -> f64,
{
    let n = obj.dimension();

    // Initial simplex: the start point plus one step along each axis, stepping
    // backwards where the forward step would leave the box.
    let mut simplex: Vec<(DVector<f64>, f64)> = Vec::with_capacity(n + 1);
    let f0 = obj.eval(start)?;
    simplex.push((start.clone(), f0));
    for i in 0..n {
        let mut v = start.clone();
        v[i] = if obj.upper()[i] - start[i] >= INITIAL_EDGE {
            start[i] + INITIAL_EDGE
        } else if start[i] - obj.lower()[i] >= INITIAL_EDGE {
            start[i] - INITIAL_EDGE
        } else if obj.upper()[i] - start[i] > start[i] - obj.lower()[i] {
            obj.upper()[i]
        } else {
            obj.lower()[i]
        };
        let f = obj.eval(&v)?;
        simplex.push((v, f));
    }

    let mut iteration = 0usize;
    loop {
        iteration += 1;
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let f_best = simplex[0].1;
        let f_worst = simplex[n].1;
        let size = simplex[1..]
            .iter()
            .map(|(v, _)| (v - &simplex[0].0).amax())
            .fold(0.0_f64, f64::max);
        if (f_worst - f_best).abs() <= config.tolerance_fun && size <= config.tolerance_x {
            debug!(
                "Nelder-Mead simplex collapsed after {} iterations, best {:.6e}",
                iteration, f_best
            );
            return Some(simplex.swap_remove(0));
        }
        if iteration % 500 == 0 {
            debug!(
                "Nelder-Mead iteration {}: best {:.6e}, size {:.3e}",
                iteration, f_best, size
            );
        }

        let centroid = simplex[..n]
            .iter()
            .fold(DVector::<f64>::zeros(n), |acc, (v, _)| acc + v)
            / n as f64;
        let worst = simplex[n].0.clone();

        let reflected = obj.clamp(&(&centroid + (&centroid - &worst) * REFLECT));
        let f_r = obj.eval(&reflected)?;

        if f_r < f_best {
            let expanded = obj.clamp(&(&centroid + (&reflected - &centroid) * EXPAND));
            let f_e = obj.eval(&expanded)?;
            simplex[n] = if f_e < f_r {
                (expanded, f_e)
            } else {
                (reflected, f_r)
            };
            continue;
        }
        if f_r < simplex[n - 1].1 {
            simplex[n] = (reflected, f_r);
            continue;
        }

        let (target, f_target) = if f_r < f_worst {
            (reflected, f_r)
        } else {
            (worst, f_worst)
        };
        let contracted = &centroid + (&target - &centroid) * CONTRACT;
        let f_c = obj.eval(&contracted)?;
        if f_c < f_target {
            simplex[n] = (contracted, f_c);
            continue;
        }

        let best = simplex[0].0.clone();
        for vertex in simplex.iter_mut().skip(1) {
            let v = &best + (&vertex.0 - &best) * SHRINK;
            let f = obj.eval(&v)?;
            *vertex = (v, f);
        }
    }
}
