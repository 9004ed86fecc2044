//! Bounded derivative-free minimization.
//!
//! Three strategies share one problem description ([`BoundedProblem`]) and
//! one result type ([`OptimumPoint`]):
//!
//! - [`OptimizerKind::Cmaes`]: covariance matrix adaptation evolution strategy
//! - [`OptimizerKind::NelderMead`]: downhill simplex
//! - [`OptimizerKind::QuadraticModel`]: trust region on a quasi-Newton quadratic model
//!
//! Every strategy works in coordinates scaled by the per-parameter `sigma`
//! (`z = (x − initial)/sigma`), so that one unit of step has a comparable
//! effect on every parameter, and clamps each candidate into the bounds
//! before it is evaluated. Running out of evaluations before the tolerances
//! are met is an error carrying the best value seen.

pub mod cmaes;
pub mod nelder_mead;
pub mod quadratic;

use nalgebra::DVector;
use tracing::debug;

use crate::error::FitError;

/// Optimization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizerKind {
    #[default]
    Cmaes,
    NelderMead,
    QuadraticModel,
}

/// Optimizer settings.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Strategy. Default CMA-ES.
    pub kind: OptimizerKind,
    /// Evaluation cap used when building problems from this config. Default 20000.
    pub max_evaluations: usize,
    /// Convergence tolerance on the step, in sigma units. Default 1e-8.
    pub tolerance_x: f64,
    /// Convergence tolerance on the objective. Default 1e-12.
    pub tolerance_fun: f64,
    /// Seed for the CMA-ES sampler. Default 42.
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Cmaes,
            max_evaluations: 20_000,
            tolerance_x: 1e-8,
            tolerance_fun: 1e-12,
            seed: 42,
        }
    }
}

/// A box-constrained minimization problem.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedProblem {
    /// Starting point.
    pub initial: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Per-parameter step scale (positive).
    pub sigma: Vec<f64>,
    /// Maximum number of objective evaluations.
    pub max_evaluations: usize,
}

impl BoundedProblem {
    /// Problem with bounds `initial ± bound_sigmas·sigma`.
    pub fn symmetric(
        initial: Vec<f64>,
        sigma: Vec<f64>,
        bound_sigmas: f64,
        max_evaluations: usize,
    ) -> Self {
        let lower = initial
            .iter()
            .zip(&sigma)
            .map(|(x, s)| x - bound_sigmas * s)
            .collect();
        let upper = initial
            .iter()
            .zip(&sigma)
            .map(|(x, s)| x + bound_sigmas * s)
            .collect();
        Self {
            initial,
            lower,
            upper,
            sigma,
            max_evaluations,
        }
    }

    pub fn dimension(&self) -> usize {
        self.initial.len()
    }

    /// Check lengths, ordering of bounds and positivity of sigma.
    pub fn validate(&self) -> Result<(), FitError> {
        let n = self.initial.len();
        if n == 0 {
            return Err(FitError::InvalidProblem("no free parameters".to_string()));
        }
        if self.lower.len() != n || self.upper.len() != n || self.sigma.len() != n {
            return Err(FitError::InvalidProblem(format!(
                "length mismatch: initial {}, lower {}, upper {}, sigma {}",
                n,
                self.lower.len(),
                self.upper.len(),
                self.sigma.len()
            )));
        }
        if self.max_evaluations == 0 {
            return Err(FitError::InvalidProblem(
                "evaluation cap must be positive".to_string(),
            ));
        }
        for i in 0..n {
            let (lo, x, hi, s) = (self.lower[i], self.initial[i], self.upper[i], self.sigma[i]);
            if !(lo <= x && x <= hi) {
                return Err(FitError::InvalidProblem(format!(
                    "parameter {i}: start {x} outside bounds [{lo}, {hi}]"
                )));
            }
            if !(s > 0.0 && s.is_finite()) {
                return Err(FitError::InvalidProblem(format!(
                    "parameter {i}: sigma must be positive, got {s}"
                )));
            }
        }
        Ok(())
    }
}

/// Best point found by a successful minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimumPoint {
    pub x: Vec<f64>,
    pub value: f64,
    pub evaluations: usize,
}

/// Minimize `objective` over `problem` with the strategy in `config`.
///
/// Non-finite objective values are treated as `+∞`.
pub fn minimize<F>(
    problem: &BoundedProblem,
    config: &OptimizerConfig,
    objective: F,
) -> Result<OptimumPoint, FitError>
where
    F: FnMut(&[f64]) -> f64,
{
    problem.validate()?;
    let mut scaled = ScaledObjective::new(problem, objective);
    debug!(
        "Minimizing {} parameters with {:?} (cap {} evaluations)",
        problem.dimension(),
        config.kind,
        problem.max_evaluations
    );
    let converged = match config.kind {
        OptimizerKind::Cmaes => cmaes::run(&mut scaled, config),
        OptimizerKind::NelderMead => nelder_mead::run(&mut scaled, config),
        OptimizerKind::QuadraticModel => quadratic::run(&mut scaled, config),
    };
    if converged {
        debug!(
            "Converged after {} evaluations, best value {:.6e}",
            scaled.evaluations, scaled.best_value
        );
        Ok(scaled.into_optimum())
    } else {
        debug!(
            "Evaluation cap reached, best value {:.6e}",
            scaled.best_value
        );
        Err(FitError::EvaluationLimitExceeded {
            evaluations: scaled.evaluations,
            best_residual: scaled.best_value,
        })
    }
}

/// Objective wrapper in sigma-scaled coordinates with an evaluation budget.
pub(crate) struct ScaledObjective<'a, F> {
    problem: &'a BoundedProblem,
    objective: F,
    lower: DVector<f64>,
    upper: DVector<f64>,
    evaluations: usize,
    best_z: DVector<f64>,
    best_value: f64,
}

impl<'a, F> ScaledObjective<'a, F>
where
    F: FnMut(&[f64]) -> f64,
{
    fn new(problem: &'a BoundedProblem, objective: F) -> Self {
        let n = problem.dimension();
        let lower = DVector::from_fn(n, |i, _| {
            (problem.lower[i] - problem.initial[i]) / problem.sigma[i]
        });
        let upper = DVector::from_fn(n, |i, _| {
            (problem.upper[i] - problem.initial[i]) / problem.sigma[i]
        });
        Self {
            problem,
            objective,
            lower,
            upper,
            evaluations: 0,
            best_z: DVector::zeros(n),
            best_value: f64::INFINITY,
        }
    }

    pub(crate) fn dimension(&self) -> usize {
        self.problem.dimension()
    }

    pub(crate) fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub(crate) fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    /// Clamp a scaled point into the bounds.
    pub(crate) fn clamp(&self, z: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(z.len(), |i, _| z[i].clamp(self.lower[i], self.upper[i]))
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.evaluations >= self.problem.max_evaluations
    }

    pub(crate) fn best_value(&self) -> f64 {
        self.best_value
    }

    fn unscale(&self, z: &DVector<f64>) -> Vec<f64> {
        (0..z.len())
            .map(|i| self.problem.initial[i] + self.problem.sigma[i] * z[i])
            .collect()
    }

    /// Evaluate at a scaled point (clamped first). `None` once the budget is spent.
    pub(crate) fn eval(&mut self, z: &DVector<f64>) -> Option<f64> {
        if self.exhausted() {
            return None;
        }
        let z = self.clamp(z);
        let x = self.unscale(&z);
        let mut value = (self.objective)(&x);
        if !value.is_finite() {
            value = f64::INFINITY;
        }
        self.evaluations += 1;
        if value < self.best_value {
            self.best_value = value;
            self.best_z = z;
        }
        Some(value)
    }

    fn into_optimum(self) -> OptimumPoint {
        OptimumPoint {
            x: self.unscale(&self.best_z),
            value: self.best_value,
            evaluations: self.evaluations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shifted, anisotropic bowl with minimum 0 at `centre`.
    fn bowl(centre: &[f64]) -> impl FnMut(&[f64]) -> f64 + '_ {
        move |x: &[f64]| {
            x.iter()
                .zip(centre)
                .enumerate()
                .map(|(i, (a, c))| (i + 1) as f64 * (a - c).powi(2))
                .sum()
        }
    }

    fn rosenbrock(x: &[f64]) -> f64 {
        (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)
    }

    const KINDS: [OptimizerKind; 3] = [
        OptimizerKind::Cmaes,
        OptimizerKind::NelderMead,
        OptimizerKind::QuadraticModel,
    ];

    #[test]
    fn test_every_kind_finds_interior_minimum() {
        let centre = [0.7, -1.2, 2.5];
        let problem = BoundedProblem::symmetric(vec![0.0; 3], vec![1.0, 0.5, 2.0], 5.0, 20_000);
        for kind in KINDS {
            let config = OptimizerConfig {
                kind,
                ..Default::default()
            };
            let best = minimize(&problem, &config, bowl(&centre)).unwrap();
            for i in 0..3 {
                assert!(
                    (best.x[i] - centre[i]).abs() < 1e-3,
                    "{kind:?}: x[{i}] = {} expected {}",
                    best.x[i],
                    centre[i]
                );
            }
            assert!(best.value < 1e-6, "{kind:?}: value {}", best.value);
        }
    }

    #[test]
    fn test_minimum_outside_bounds_lands_on_bound() {
        let centre = [3.0, 0.25];
        let problem = BoundedProblem {
            initial: vec![0.0, 0.0],
            lower: vec![-1.0, -1.0],
            upper: vec![1.0, 1.0],
            sigma: vec![0.5, 0.5],
            max_evaluations: 20_000,
        };
        for kind in KINDS {
            let config = OptimizerConfig {
                kind,
                ..Default::default()
            };
            let best = minimize(&problem, &config, bowl(&centre)).unwrap();
            assert!(best.x[0] <= 1.0 && (best.x[0] - 1.0).abs() < 1e-4, "{kind:?}: {:?}", best.x);
            assert!((best.x[1] - 0.25).abs() < 1e-3, "{kind:?}: {:?}", best.x);
        }
    }

    #[test]
    fn test_rosenbrock() {
        let problem = BoundedProblem::symmetric(vec![-1.0, 1.5], vec![0.5, 0.5], 6.0, 50_000);
        for kind in [OptimizerKind::Cmaes, OptimizerKind::NelderMead] {
            let config = OptimizerConfig {
                kind,
                ..Default::default()
            };
            let best = minimize(&problem, &config, rosenbrock).unwrap();
            assert!(
                (best.x[0] - 1.0).abs() < 1e-3 && (best.x[1] - 1.0).abs() < 1e-3,
                "{kind:?}: {:?}",
                best.x
            );
        }
    }

    #[test]
    fn test_evaluation_limit() {
        let problem = BoundedProblem::symmetric(vec![0.0; 4], vec![1.0; 4], 5.0, 10);
        for kind in KINDS {
            let config = OptimizerConfig {
                kind,
                ..Default::default()
            };
            match minimize(&problem, &config, bowl(&[1.0, 2.0, 3.0, 4.0])) {
                Err(FitError::EvaluationLimitExceeded {
                    evaluations,
                    best_residual,
                }) => {
                    assert_eq!(evaluations, 10, "{kind:?}");
                    assert!(best_residual.is_finite());
                }
                other => panic!("{kind:?}: expected evaluation limit, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_invalid_problems() {
        let config = OptimizerConfig::default();
        let f = |_: &[f64]| 0.0;
        let empty = BoundedProblem::symmetric(vec![], vec![], 1.0, 10);
        assert!(matches!(
            minimize(&empty, &config, f),
            Err(FitError::InvalidProblem(_))
        ));
        let mut bad = BoundedProblem::symmetric(vec![0.0], vec![1.0], 1.0, 10);
        bad.sigma[0] = 0.0;
        assert!(matches!(
            minimize(&bad, &config, f),
            Err(FitError::InvalidProblem(_))
        ));
        let mut outside = BoundedProblem::symmetric(vec![0.0], vec![1.0], 1.0, 10);
        outside.initial[0] = 5.0;
        assert!(matches!(
            minimize(&outside, &config, f),
            Err(FitError::InvalidProblem(_))
        ));
    }

    #[test]
    fn test_nan_objective_is_not_best() {
        let problem = BoundedProblem::symmetric(vec![0.0, 0.0], vec![1.0, 1.0], 3.0, 20_000);
        let config = OptimizerConfig {
            kind: OptimizerKind::NelderMead,
            ..Default::default()
        };
        let centre = [0.5, 0.5];
        let mut inner = bowl(&centre);
        let best = minimize(&problem, &config, |x: &[f64]| {
            if x[0] < -0.5 {
                f64::NAN
            } else {
                inner(x)
            }
        })
        .unwrap();
        assert!(best.value.is_finite());
        assert!((best.x[0] - 0.5).abs() < 1e-3);
    }
}
