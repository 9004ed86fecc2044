//! # hklmap
//!
//! Diffraction geometry and **reciprocal-space mapping** for area detectors,
//! written in Rust.
//!
//! Given detector images together with the geometry they were taken in,
//! `hklmap` places every pixel in momentum-transfer (Q) or Miller (HKL) space
//! and accumulates the intensities into a regular voxel volume. It also models
//! a detector mounted on a two-circle diffractometer arm and calibrates that
//! mount from direct-beam exposures.
//!
//! ## Features
//!
//! - **Detector geometry**: pixel ↔ lab transforms, ray/plane intersection,
//!   beam centre, scattering angles and Debye–Scherrer conics
//! - **Q space**: `q = k·p̂ − kᵢ` per pixel, back-projection onto the detector,
//!   d-spacings from spot positions
//! - **Voxel mapping**: nearest, inverse-distance, Gaussian and exponential
//!   splitting kernels; auto bounding box; optional bicubic upsampling;
//!   frame-parallel accumulation with [rayon](https://docs.rs/rayon)
//! - **Two-circle calibration**: 8, 10 or 18 free mount parameters fitted with
//!   CMA-ES, Nelder–Mead or a trust-region quadratic model
//! - **Zero-copy persistence**: finalized volumes serialize with
//!   [rkyv](https://docs.rs/rkyv)
//!
//! ## Example
//!
//! ```no_run
//! use hklmap::{
//!     map_frames, BeamEnvironment, DetectorGeometry, MapperConfig, MapperFrame, Matrix3,
//!     Splitter,
//! };
//! use ndarray::Array2;
//!
//! let detector = DetectorGeometry::normal_to_beam(180.0, 487, 195, 0.172, 0.172).unwrap();
//! let environment = BeamEnvironment::from_energy_kev(12.0).unwrap();
//! let frame = MapperFrame {
//!     image: Array2::from_elem((195, 487), 1.0),
//!     detector,
//!     environment,
//!     miller: Matrix3::identity(),
//! };
//!
//! let config = MapperConfig {
//!     splitter: Splitter::from_name("gaussian", 0.005).unwrap(),
//!     reduce_to_non_zero: true,
//!     ..Default::default()
//! }
//! .with_q_axes();
//! let result = map_frames(&[frame], &config).unwrap();
//! result.dataset.save_to_file("volume.rkyv").unwrap();
//! ```
//!
//! ## Conventions
//!
//! - Lengths in mm, wavelengths in Å, momentum transfer in Å⁻¹, angles in
//!   degrees at API boundaries and radians internally.
//! - The sample sits at the lab origin. A detector's `origin` is the outer
//!   corner of pixel `(0, 0)`; its orientation columns are `−fast`, `−slow`
//!   and the plane normal.
//! - Images are indexed `[y, x]`; pixel centres sit at `(x + 0.5, y + 0.5)`.

pub mod detector;
pub mod environment;
pub mod error;
pub mod geometry;
pub mod kinematics;
pub mod mapper;
pub mod optimize;
pub mod qspace;

pub use detector::{conic_from_angle, conic_from_d_spacing, Conic, DetectorGeometry, DetectorState};
pub use environment::BeamEnvironment;
pub use error::{FitError, GeometryError, MapperError};
pub use kinematics::{
    FitConfig, FitResult, FitStatus, FitVariant, Observations, TwoCircleDetector,
    TwoCircleFitter, TwoCircleSetup,
};
pub use mapper::{
    map_frames, GridSpec, MapResult, MapperConfig, MapperFrame, Splitter, VolumeDataset,
    VoxelVolume,
};
pub use optimize::{minimize, BoundedProblem, OptimizerConfig, OptimizerKind, OptimumPoint};
pub use qspace::{d_spacing_from_pixel, d_spacings_from_pixel_coords, QSpace};

// Commonly used types
// Geometry runs in 64-bit throughout; q-vectors of neighbouring pixels differ
// by less than 32-bit precision resolves at long detector distances.
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Matrix3 = nalgebra::Matrix3<f64>;
