//! Two-circle diffractometer model.
//!
//! An area detector sits on two nested rotation stages. The outer stage
//! (gamma) turns about an axis fixed in the lab; the inner stage (delta) is
//! carried by the gamma arm and turns about an axis fixed in that arm; the
//! detector face is mounted on the delta arm. For a pair of stage angles the
//! model produces the [`DetectorGeometry`] seen by a fixed sample and beam.
//!
//! ```text
//! face ──Rδ(δ+δ₀) about delta axis──▶ gamma-arm frame
//!      ──Rγ(γ+γ₀) about gamma axis──▶ lab frame ── − beam position ──▶ sample frame
//! ```
//!
//! Angles are in degrees and lengths in mm.

pub mod fit;

use crate::detector::DetectorGeometry;
use crate::error::GeometryError;
use crate::geometry::{basis_from_normal_and_fast, rotation_about_axis, unit_vector};
use crate::Vector3;

pub use fit::{FitConfig, FitResult, FitStatus, FitVariant, Observations, TwoCircleFitter};

/// Mechanical description of a two-circle mount.
///
/// Build a validated [`TwoCircleDetector`] from it with [`TwoCircleDetector::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct TwoCircleSetup {
    /// Point on the beam line the sample sits on, lab frame.
    pub beam_position: Vector3,
    /// Beam direction, lab frame.
    pub beam_direction: Vector3,
    /// Point on the gamma axis, lab frame.
    pub gamma_position: Vector3,
    pub gamma_direction: Vector3,
    /// Encoder offset added to every gamma angle.
    pub gamma_offset: f64,
    /// Point on the delta axis, gamma-arm frame.
    pub delta_position: Vector3,
    pub delta_direction: Vector3,
    /// Encoder offset added to every delta angle.
    pub delta_offset: f64,
    /// Outer corner of pixel `(0, 0)`, delta-arm frame.
    pub face_position: Vector3,
    /// Detector plane normal, delta-arm frame.
    pub face_normal: Vector3,
    /// Direction of increasing pixel x, delta-arm frame.
    pub face_fast: Vector3,
    pub px: u32,
    pub py: u32,
    pub h_px_size: f64,
    pub v_px_size: f64,
}

impl TwoCircleSetup {
    /// Mount whose `(0, 0)` pose is a detector normal to a +z beam at
    /// `distance`, beam on the centre of the face. Gamma turns about the lab
    /// vertical (+y) and delta about the horizontal (+x), both through the sample.
    pub fn normal_to_beam(distance: f64, px: u32, py: u32, h_px_size: f64, v_px_size: f64) -> Self {
        Self {
            beam_position: Vector3::zeros(),
            beam_direction: Vector3::z(),
            gamma_position: Vector3::zeros(),
            gamma_direction: Vector3::y(),
            gamma_offset: 0.0,
            delta_position: Vector3::zeros(),
            delta_direction: Vector3::x(),
            delta_offset: 0.0,
            face_position: Vector3::new(
                0.5 * px as f64 * h_px_size,
                0.5 * py as f64 * v_px_size,
                distance,
            ),
            face_normal: Vector3::z(),
            face_fast: -Vector3::x(),
            px,
            py,
            h_px_size,
            v_px_size,
        }
    }
}

/// Validated two-circle model. Direction vectors are unit length and the
/// face fast axis is orthogonal to the face normal.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoCircleDetector {
    setup: TwoCircleSetup,
}

impl TwoCircleDetector {
    pub fn new(setup: TwoCircleSetup) -> Result<Self, GeometryError> {
        let mut setup = setup;
        setup.beam_direction = unit_vector(&setup.beam_direction, "beam direction")?;
        setup.gamma_direction = unit_vector(&setup.gamma_direction, "gamma axis")?;
        setup.delta_direction = unit_vector(&setup.delta_direction, "delta axis")?;
        let basis = basis_from_normal_and_fast(&setup.face_normal, &setup.face_fast)?;
        setup.face_normal = basis.column(2).into_owned();
        setup.face_fast = -basis.column(0).into_owned();
        if !(setup.h_px_size > 0.0 && setup.v_px_size > 0.0) {
            return Err(GeometryError::InvalidPixelSize(setup.h_px_size, setup.v_px_size));
        }
        if setup.px == 0 || setup.py == 0 {
            return Err(GeometryError::InvalidPixelCount(setup.px, setup.py));
        }
        Ok(Self { setup })
    }

    pub fn setup(&self) -> &TwoCircleSetup {
        &self.setup
    }

    pub fn into_setup(self) -> TwoCircleSetup {
        self.setup
    }

    /// Detector geometry for stage angles `gamma`, `delta` (degrees).
    pub fn detector_geometry(&self, gamma: f64, delta: f64) -> Result<DetectorGeometry, GeometryError> {
        let s = &self.setup;
        let r_delta = rotation_about_axis(&s.delta_direction, (delta + s.delta_offset).to_radians())?;
        let r_gamma = rotation_about_axis(&s.gamma_direction, (gamma + s.gamma_offset).to_radians())?;

        // Inner circle, in the gamma-arm frame.
        let position = s.delta_position + r_delta * (s.face_position - s.delta_position);
        let normal = r_delta * s.face_normal;
        let fast = r_delta * s.face_fast;

        // Outer circle, in the lab frame.
        let position = s.gamma_position + r_gamma * (position - s.gamma_position);
        let normal = r_gamma * normal;
        let fast = r_gamma * fast;

        DetectorGeometry::from_normal_and_fast(
            position - s.beam_position,
            s.beam_direction,
            &normal,
            &fast,
            s.px,
            s.py,
            s.h_px_size,
            s.v_px_size,
        )
    }

    /// Beam-centre pixel coordinates at stage angles `gamma`, `delta`.
    pub fn beam_centre(&self, gamma: f64, delta: f64) -> Result<[f64; 2], GeometryError> {
        self.detector_geometry(gamma, delta)?.beam_centre_coords()
    }
}
