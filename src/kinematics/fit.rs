//! Calibration of a two-circle mount from observed beam centres.
//!
//! A set of direct-beam exposures at known stage angles gives, for each
//! `(gamma, delta)`, the pixel where the beam hit the detector. The fitter
//! adjusts a subset of the mount parameters ([`FitVariant`]) to minimize
//! `Σ |predicted − observed|²` over the exposures, using a bounded optimizer
//! from [`crate::optimize`].
//!
//! Beam centres are blind to some motions of the mount: turning the face
//! about the delta axis looks exactly like a delta offset, sliding the beam
//! along itself changes nothing. Each variant therefore names gauge
//! parameters ([`FitVariant::gauge_parameters`]) that stay at their starting
//! values, so the remaining free parameters are fixed by the data.

use tracing::{debug, info};

use crate::error::{FitError, GeometryError};
use crate::geometry::{
    angles_from_orientation, basis_from_normal_and_fast, direction_to_polar,
    orientation_from_angles, polar_to_direction,
};
use crate::optimize::{minimize, BoundedProblem, OptimizerConfig};
use crate::Vector3;

use super::{TwoCircleDetector, TwoCircleSetup};

/// Squared-pixel residual charged for an exposure whose beam centre cannot
/// be predicted (beam parallel to or pointing away from the detector).
pub const FAILED_PREDICTION_PENALTY: f64 = 1e8;

/// Which mount parameters are free.
///
/// Angles in degrees, lengths in mm. Parameters are laid out in the order of
/// [`FitVariant::parameter_names`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitVariant {
    /// Stage offsets, face position and face yaw/pitch/roll.
    #[default]
    Eight,
    /// `Eight` plus the delta-axis direction.
    Ten,
    /// `Ten` plus beam position, gamma-axis direction and delta-axis position.
    Eighteen,
}

const NAMES_18: [&str; 18] = [
    "gamma_offset",
    "delta_offset",
    "face_x",
    "face_y",
    "face_z",
    "face_yaw",
    "face_pitch",
    "face_roll",
    "delta_axis_polar",
    "delta_axis_azimuth",
    "beam_x",
    "beam_y",
    "beam_z",
    "gamma_axis_polar",
    "gamma_axis_azimuth",
    "delta_x",
    "delta_y",
    "delta_z",
];

/// Default step hints matching [`NAMES_18`].
const SIGMAS_18: [f64; 18] = [
    0.1, 0.1, // offsets
    1.0, 1.0, 1.0, // face position
    0.5, 0.5, 0.5, // face angles
    0.5, 0.5, // delta axis
    0.5, 0.5, 0.5, // beam position
    0.5, 0.5, // gamma axis
    1.0, 1.0, 1.0, // delta position
];

impl FitVariant {
    /// Number of free parameters.
    pub fn parameter_count(&self) -> usize {
        match self {
            FitVariant::Eight => 8,
            FitVariant::Ten => 10,
            FitVariant::Eighteen => 18,
        }
    }

    pub fn parameter_names(&self) -> &'static [&'static str] {
        &NAMES_18[..self.parameter_count()]
    }

    pub fn default_sigmas(&self) -> Vec<f64> {
        SIGMAS_18[..self.parameter_count()].to_vec()
    }

    /// Indices of the parameters that beam centres cannot separate from the
    /// others, for the axes of `model`. Ascending.
    ///
    /// - `delta_offset`: the same as turning the face about the delta axis.
    /// - `gamma_offset` (`Ten`, `Eighteen`): with the delta axis free, the same
    ///   as turning the delta arm about the gamma axis.
    /// - `Eighteen` also holds the beam position along the beam and along the
    ///   gamma axis (the arm slides with it), the delta-axis position along
    ///   its own axis and the gamma-axis azimuth (the mount turning about the
    ///   beam). Vector components are picked by the largest axis component.
    pub fn gauge_parameters(&self, model: &TwoCircleDetector) -> Vec<usize> {
        let s = model.setup();
        let mut held = match self {
            FitVariant::Eight => vec![1],
            FitVariant::Ten => vec![0, 1],
            FitVariant::Eighteen => {
                let along_beam = dominant_component(&s.beam_direction, None);
                let along_gamma = dominant_component(&s.gamma_direction, Some(along_beam));
                vec![
                    0,
                    1,
                    10 + along_beam,
                    10 + along_gamma,
                    14,
                    15 + dominant_component(&s.delta_direction, None),
                ]
            }
        };
        held.sort_unstable();
        held
    }

    /// Current values of the free parameters of `model`.
    pub fn extract(&self, model: &TwoCircleDetector) -> Vec<f64> {
        let s = model.setup();
        let face = face_angles(s);
        let mut p = vec![
            s.gamma_offset,
            s.delta_offset,
            s.face_position.x,
            s.face_position.y,
            s.face_position.z,
            face[0],
            face[1],
            face[2],
        ];
        if matches!(self, FitVariant::Ten | FitVariant::Eighteen) {
            p.extend_from_slice(&direction_to_polar(&s.delta_direction));
        }
        if matches!(self, FitVariant::Eighteen) {
            p.extend_from_slice(s.beam_position.as_slice());
            p.extend_from_slice(&direction_to_polar(&s.gamma_direction));
            p.extend_from_slice(s.delta_position.as_slice());
        }
        p
    }

    /// Copy of `model` with the free parameters replaced by `params`.
    pub fn apply(&self, model: &TwoCircleDetector, params: &[f64]) -> Result<TwoCircleDetector, FitError> {
        if params.len() != self.parameter_count() {
            return Err(FitError::ParameterCount {
                expected: self.parameter_count(),
                found: params.len(),
            });
        }
        let mut s: TwoCircleSetup = model.setup().clone();
        s.gamma_offset = params[0];
        s.delta_offset = params[1];
        s.face_position = Vector3::new(params[2], params[3], params[4]);
        let m = orientation_from_angles(params[5], params[6], params[7]);
        s.face_normal = m.column(2).into_owned();
        s.face_fast = -m.column(0).into_owned();
        if matches!(self, FitVariant::Ten | FitVariant::Eighteen) {
            s.delta_direction = polar_to_direction(params[8], params[9]);
        }
        if matches!(self, FitVariant::Eighteen) {
            s.beam_position = Vector3::new(params[10], params[11], params[12]);
            s.gamma_direction = polar_to_direction(params[13], params[14]);
            s.delta_position = Vector3::new(params[15], params[16], params[17]);
        }
        Ok(TwoCircleDetector::new(s)?)
    }
}

/// Index of the largest-magnitude component of `v`, ignoring `skip`.
fn dominant_component(v: &Vector3, skip: Option<usize>) -> usize {
    (0..3)
        .filter(|&i| Some(i) != skip)
        .max_by(|&a, &b| v[a].abs().total_cmp(&v[b].abs()))
        .unwrap_or(0)
}

/// Face orientation as yaw/pitch/roll (degrees). The setup is validated, so
/// the basis always exists.
fn face_angles(s: &TwoCircleSetup) -> [f64; 3] {
    basis_from_normal_and_fast(&s.face_normal, &s.face_fast)
        .map(|m| angles_from_orientation(&m))
        .unwrap_or([0.0; 3])
}

/// Direct-beam observations as parallel arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations {
    pub gamma: Vec<f64>,
    pub delta: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Observations {
    pub fn new(gamma: Vec<f64>, delta: Vec<f64>, x: Vec<f64>, y: Vec<f64>) -> Result<Self, FitError> {
        let obs = Self { gamma, delta, x, y };
        obs.validate()?;
        Ok(obs)
    }

    pub fn validate(&self) -> Result<(), FitError> {
        let n = self.gamma.len();
        if self.delta.len() != n || self.x.len() != n || self.y.len() != n {
            return Err(FitError::MismatchedObservations {
                gamma: n,
                delta: self.delta.len(),
                x: self.x.len(),
                y: self.y.len(),
            });
        }
        if n == 0 {
            return Err(FitError::NoObservations);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.gamma.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gamma.is_empty()
    }

    /// Sum of squared pixel residuals of `model` over all observations.
    pub fn residual(&self, model: &TwoCircleDetector) -> f64 {
        (0..self.len())
            .map(|i| match model.beam_centre(self.gamma[i], self.delta[i]) {
                Ok([px, py]) => (px - self.x[i]).powi(2) + (py - self.y[i]).powi(2),
                Err(_) => FAILED_PREDICTION_PENALTY,
            })
            .sum()
    }
}

/// Fitter configuration.
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Free parameters. Default [`FitVariant::Eight`].
    pub variant: FitVariant,
    /// Step hints; `None` uses [`FitVariant::default_sigmas`].
    pub sigmas: Option<Vec<f64>>,
    /// Bounds are `start ± bound_sigmas·sigma`. Default 10.
    pub bound_sigmas: f64,
    /// Hold [`FitVariant::gauge_parameters`] at their starting values.
    /// Default true. Without it the fit drifts along motions the data cannot
    /// see and individual parameters are not reproducible.
    pub fix_gauge: bool,
    /// Optimizer settings. Default CMA-ES.
    pub optimizer: OptimizerConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            variant: FitVariant::Eight,
            sigmas: None,
            bound_sigmas: 10.0,
            fix_gauge: true,
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// Fitter lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Initialized,
    Evaluating,
    Converged,
    EvaluationLimitExceeded,
}

/// Result of a successful calibration.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub variant: FitVariant,
    /// Starting parameter vector.
    pub initial_parameters: Vec<f64>,
    /// Calibrated parameter vector.
    pub parameters: Vec<f64>,
    /// Indices of the parameters held at their starting values.
    pub held: Vec<usize>,
    /// Calibrated model.
    pub model: TwoCircleDetector,
    /// Sum of squared pixel residuals before and after the fit.
    pub residual_before: f64,
    pub residual_after: f64,
    /// RMS beam-centre error in pixels before and after the fit.
    pub rms_before_px: f64,
    pub rms_after_px: f64,
    pub evaluations: usize,
}

impl FitResult {
    /// Detector geometry of the calibrated model at stage angles `gamma`, `delta`.
    pub fn detector_geometry(
        &self,
        gamma: f64,
        delta: f64,
    ) -> Result<crate::detector::DetectorGeometry, GeometryError> {
        self.model.detector_geometry(gamma, delta)
    }
}

/// Fits a [`TwoCircleDetector`] to beam-centre observations.
#[derive(Debug, Clone)]
pub struct TwoCircleFitter {
    model: TwoCircleDetector,
    config: FitConfig,
    status: FitStatus,
}

impl TwoCircleFitter {
    pub fn new(model: TwoCircleDetector, config: FitConfig) -> Self {
        Self {
            model,
            config,
            status: FitStatus::Initialized,
        }
    }

    pub fn model(&self) -> &TwoCircleDetector {
        &self.model
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    /// Fit the free parameters to `observations`.
    ///
    /// On success the calibrated model replaces the fitter's model. On any
    /// error the model is left untouched.
    pub fn fit(&mut self, observations: &Observations) -> Result<FitResult, FitError> {
        observations.validate()?;
        let variant = self.config.variant;
        let sigmas = match &self.config.sigmas {
            Some(s) if s.len() != variant.parameter_count() => {
                return Err(FitError::InvalidProblem(format!(
                    "{:?} fit needs {} sigmas, got {}",
                    variant,
                    variant.parameter_count(),
                    s.len()
                )));
            }
            Some(s) => s.clone(),
            None => variant.default_sigmas(),
        };

        let initial = variant.extract(&self.model);
        let held = if self.config.fix_gauge {
            variant.gauge_parameters(&self.model)
        } else {
            Vec::new()
        };
        let free: Vec<usize> = (0..initial.len()).filter(|i| !held.contains(i)).collect();
        let problem = BoundedProblem::symmetric(
            free.iter().map(|&i| initial[i]).collect(),
            free.iter().map(|&i| sigmas[i]).collect(),
            self.config.bound_sigmas,
            self.config.optimizer.max_evaluations,
        );
        problem.validate()?;
        let expand = |values: &[f64]| {
            let mut params = initial.clone();
            for (&i, &v) in free.iter().zip(values) {
                params[i] = v;
            }
            params
        };

        let n = observations.len() as f64;
        let residual_before = observations.residual(&self.model);
        debug!(
            "Two-circle {:?} fit: {} observations, starting residual {:.6e} ({:.4} px RMS), holding {:?}",
            variant,
            observations.len(),
            residual_before,
            (residual_before / n).sqrt(),
            held.iter().map(|&i| NAMES_18[i]).collect::<Vec<_>>()
        );

        self.status = FitStatus::Evaluating;
        let model = &self.model;
        let outcome = minimize(&problem, &self.config.optimizer, |values: &[f64]| {
            match variant.apply(model, &expand(values)) {
                Ok(candidate) => observations.residual(&candidate),
                Err(_) => FAILED_PREDICTION_PENALTY * n,
            }
        });

        let best = match outcome {
            Ok(best) => best,
            Err(e) => {
                self.status = match e {
                    FitError::EvaluationLimitExceeded { .. } => FitStatus::EvaluationLimitExceeded,
                    _ => FitStatus::Initialized,
                };
                debug!("Two-circle fit abandoned: {}", e);
                return Err(e);
            }
        };

        let parameters = expand(&best.x);
        let calibrated = variant.apply(&self.model, &parameters)?;
        let residual_after = observations.residual(&calibrated);
        let result = FitResult {
            variant,
            initial_parameters: initial,
            parameters,
            held,
            model: calibrated.clone(),
            residual_before,
            residual_after,
            rms_before_px: (residual_before / n).sqrt(),
            rms_after_px: (residual_after / n).sqrt(),
            evaluations: best.evaluations,
        };
        info!(
            "Two-circle {:?} fit converged after {} evaluations: RMS {:.4} px -> {:.6} px",
            variant, result.evaluations, result.rms_before_px, result.rms_after_px
        );

        self.model = calibrated;
        self.status = FitStatus::Converged;
        Ok(result)
    }
}
