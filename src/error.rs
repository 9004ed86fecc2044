//! Error types for geometry, mapping and calibration.
//!
//! Every variant carries the values that triggered it so a failure can be
//! reproduced from the error message alone.

use thiserror::Error;

/// Failures raised by detector, Q-space and conic computations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("direction [{0:.6}, {1:.6}, {2:.6}] is parallel to the detector plane")]
    ParallelToDetector(f64, f64, f64),
    #[error("direction [{0:.6}, {1:.6}, {2:.6}] points away from the detector plane")]
    MissesDetector(f64, f64, f64),
    #[error("{0} has zero length")]
    ZeroLength(&'static str),
    #[error("fast axis is parallel to the detector normal (|n·f| = {0:.6})")]
    DegenerateBasis(f64),
    #[error("orientation is not orthonormal (max deviation {0:.3e})")]
    NotOrthonormal(f64),
    #[error("wavelength must be positive, got {0}")]
    InvalidWavelength(f64),
    #[error("pixel sizes must be positive, got [{0}, {1}]")]
    InvalidPixelSize(f64, f64),
    #[error("pixel counts must be positive, got [{0}, {1}]")]
    InvalidPixelCount(u32, u32),
    #[error("no Bragg solution: sin(theta) = {0:.6} exceeds 1")]
    NoBraggSolution(f64),
    #[error(
        "cone half-angle {alpha_deg:.4} deg at tilt {tilt_deg:.4} deg gives a parabola or hyperbola"
    )]
    UnsupportedConic { alpha_deg: f64, tilt_deg: f64 },
    #[error("conic sections need square pixels, got [{0}, {1}] mm")]
    NonSquarePixels(f64, f64),
    #[error("pixel coordinate list must have even length, got {0}")]
    OddCoordinateCount(usize),
    #[error("at least two spots are needed, got {0}")]
    TooFewSpots(usize),
}

/// Failures raised by the reciprocal-space mapper.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapperError {
    #[error("unknown splitter '{0}' (expected nearest, inverse, gaussian or negexp)")]
    UnknownSplitter(String),
    #[error("splitter width must be positive, got {0}")]
    InvalidSplitterParameter(f64),
    #[error("image shape {image:?} does not match detector pixel counts {detector:?}")]
    ShapeMismatch {
        image: (usize, usize),
        detector: (usize, usize),
    },
    #[error("voxel grids differ: expected shape {expected:?} with matching origin and voxel size, found {found:?}")]
    GridMismatch {
        expected: [usize; 3],
        found: [usize; 3],
    },
    #[error("voxel size must be positive on every axis, got {0:?}")]
    InvalidVoxelSize([f64; 3]),
    #[error("upsampling factor must be at least 1, got {0}")]
    InvalidUpsample(f64),
    #[error("no frames to map")]
    NoFrames,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Failures raised by the calibration fitter and the bounded optimizers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("observation arrays differ in length: gamma {gamma}, delta {delta}, x {x}, y {y}")]
    MismatchedObservations {
        gamma: usize,
        delta: usize,
        x: usize,
        y: usize,
    },
    #[error("no observations to fit")]
    NoObservations,
    #[error("expected {expected} fit parameters, got {found}")]
    ParameterCount { expected: usize, found: usize },
    #[error("invalid optimization problem: {0}")]
    InvalidProblem(String),
    #[error("optimizer did not converge within {evaluations} evaluations (best residual {best_residual:.6e})")]
    EvaluationLimitExceeded {
        evaluations: usize,
        best_residual: f64,
    },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
