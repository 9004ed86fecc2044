//! Area-detector geometry in the laboratory frame.
//!
//! `DetectorGeometry` maps between detector pixel coordinates and lab-frame
//! positions (millimetres), intersects rays from the sample with the detector
//! plane and answers beam-centre and scattering-angle queries.
//!
//! # Coordinate conventions
//!
//! - The sample sits at the lab origin.
//! - **Pixel coordinates** `(x, y)`: `x` along a row (fast axis), `y` down the
//!   columns (slow axis), origin at the outer corner of pixel `(0, 0)`.
//!   Pixel centres sit at half-integer coordinates.
//! - **Orientation**: columns are `−fast`, `−slow`, `normal` in the lab frame,
//!   so the identity orientation describes a detector facing a beam along +z.
//!
//! ```text
//! lab = origin + orientation · (−x·h, −y·v, 0)
//! ```
//!
//! The geometry keeps an immutable baseline snapshot of its construction state
//! so any field can be reverted, and a revision counter that every setter
//! bumps. Dependents such as [`QSpace`](crate::qspace::QSpace) compare
//! revisions or re-derive explicitly instead of registering listeners.

pub mod conic;

use crate::error::GeometryError;
use crate::geometry::{
    angles_from_orientation, basis_from_normal_and_fast, orientation_from_angles,
    orthonormal_deviation, snap_matrix_to_zero, unit_vector, ORTHONORMAL_TOLERANCE,
};
use crate::{Matrix3, Vector3};

pub use conic::{conic_from_angle, conic_from_d_spacing, Conic};

/// The independent fields of a detector geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorState {
    /// Lab position (mm) of the outer corner of pixel `(0, 0)`.
    pub origin: Vector3,
    /// Unit vector along the incident beam.
    pub beam_vector: Vector3,
    /// Orthonormal detector-to-lab rotation.
    pub orientation: Matrix3,
    /// Pixels along a row.
    pub px: u32,
    /// Pixels along a column.
    pub py: u32,
    /// Pixel width along the fast axis (mm).
    pub h_px_size: f64,
    /// Pixel height along the slow axis (mm).
    pub v_px_size: f64,
}

/// Detector geometry with a baseline snapshot and a revision counter.
#[derive(Debug, Clone)]
pub struct DetectorGeometry {
    state: DetectorState,
    baseline: DetectorState,
    normal: Vector3,
    inv_orientation: Matrix3,
    revision: u64,
}

fn check_pixel_sizes(h: f64, v: f64) -> Result<(), GeometryError> {
    if !(h > 0.0 && v > 0.0 && h.is_finite() && v.is_finite()) {
        return Err(GeometryError::InvalidPixelSize(h, v));
    }
    Ok(())
}

fn check_pixel_counts(px: u32, py: u32) -> Result<(), GeometryError> {
    if px == 0 || py == 0 {
        return Err(GeometryError::InvalidPixelCount(px, py));
    }
    Ok(())
}

fn check_orientation(m: &Matrix3) -> Result<Matrix3, GeometryError> {
    let dev = orthonormal_deviation(m);
    if !dev.is_finite() || dev > ORTHONORMAL_TOLERANCE {
        return Err(GeometryError::NotOrthonormal(dev));
    }
    Ok(snap_matrix_to_zero(m))
}

impl DetectorGeometry {
    /// Create a detector from its independent fields.
    ///
    /// The beam vector is normalized; the orientation must be orthonormal.
    pub fn new(
        origin: Vector3,
        beam_vector: Vector3,
        orientation: Matrix3,
        px: u32,
        py: u32,
        h_px_size: f64,
        v_px_size: f64,
    ) -> Result<Self, GeometryError> {
        check_pixel_sizes(h_px_size, v_px_size)?;
        check_pixel_counts(px, py)?;
        let state = DetectorState {
            origin,
            beam_vector: unit_vector(&beam_vector, "beam vector")?,
            orientation: check_orientation(&orientation)?,
            px,
            py,
            h_px_size,
            v_px_size,
        };
        Ok(Self::from_state(state))
    }

    /// Detector normal to a beam along +z, `distance` mm from the sample,
    /// with the beam hitting the centre of the active area.
    pub fn normal_to_beam(
        distance: f64,
        px: u32,
        py: u32,
        h_px_size: f64,
        v_px_size: f64,
    ) -> Result<Self, GeometryError> {
        let origin = Vector3::new(
            0.5 * px as f64 * h_px_size,
            0.5 * py as f64 * v_px_size,
            distance,
        );
        Self::new(
            origin,
            Vector3::z(),
            Matrix3::identity(),
            px,
            py,
            h_px_size,
            v_px_size,
        )
    }

    /// Create a detector from a plane normal and fast-axis direction.
    #[allow(clippy::too_many_arguments)]
    pub fn from_normal_and_fast(
        origin: Vector3,
        beam_vector: Vector3,
        normal: &Vector3,
        fast: &Vector3,
        px: u32,
        py: u32,
        h_px_size: f64,
        v_px_size: f64,
    ) -> Result<Self, GeometryError> {
        let orientation = basis_from_normal_and_fast(normal, fast)?;
        Self::new(origin, beam_vector, orientation, px, py, h_px_size, v_px_size)
    }

    /// Build from a validated state; the state also becomes the baseline.
    fn from_state(state: DetectorState) -> Self {
        let mut det = Self {
            baseline: state.clone(),
            state,
            normal: Vector3::z(),
            inv_orientation: Matrix3::identity(),
            revision: 0,
        };
        det.derive();
        det
    }

    fn derive(&mut self) {
        self.normal = self.state.orientation * Vector3::z();
        self.inv_orientation = self.state.orientation.transpose();
    }

    fn touch(&mut self) {
        self.derive();
        self.revision += 1;
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn origin(&self) -> Vector3 {
        self.state.origin
    }

    pub fn beam_vector(&self) -> Vector3 {
        self.state.beam_vector
    }

    /// Unit normal of the detector plane, always `orientation · (0, 0, 1)`.
    pub fn normal(&self) -> Vector3 {
        self.normal
    }

    pub fn orientation(&self) -> Matrix3 {
        self.state.orientation
    }

    pub fn inv_orientation(&self) -> Matrix3 {
        self.inv_orientation
    }

    pub fn px(&self) -> u32 {
        self.state.px
    }

    pub fn py(&self) -> u32 {
        self.state.py
    }

    pub fn h_px_size(&self) -> f64 {
        self.state.h_px_size
    }

    pub fn v_px_size(&self) -> f64 {
        self.state.v_px_size
    }

    /// Current working state.
    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Snapshot taken at construction.
    pub fn baseline(&self) -> &DetectorState {
        &self.baseline
    }

    /// Incremented on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ── Setters ─────────────────────────────────────────────────────────────

    pub fn set_origin(&mut self, origin: Vector3) {
        self.state.origin = origin;
        self.touch();
    }

    /// Set the beam direction; the input is normalized.
    pub fn set_beam_vector(&mut self, beam: Vector3) -> Result<(), GeometryError> {
        self.state.beam_vector = unit_vector(&beam, "beam vector")?;
        self.touch();
        Ok(())
    }

    pub fn set_orientation(&mut self, orientation: Matrix3) -> Result<(), GeometryError> {
        self.state.orientation = check_orientation(&orientation)?;
        self.touch();
        Ok(())
    }

    pub fn set_pixel_sizes(&mut self, h_px_size: f64, v_px_size: f64) -> Result<(), GeometryError> {
        check_pixel_sizes(h_px_size, v_px_size)?;
        self.state.h_px_size = h_px_size;
        self.state.v_px_size = v_px_size;
        self.touch();
        Ok(())
    }

    pub fn set_pixel_counts(&mut self, px: u32, py: u32) -> Result<(), GeometryError> {
        check_pixel_counts(px, py)?;
        self.state.px = px;
        self.state.py = py;
        self.touch();
        Ok(())
    }

    /// Resample the pixel grid by `factor` while keeping the physical extent.
    ///
    /// Counts become `round(n·factor)` and sizes shrink so that
    /// `count × size` is unchanged.
    pub fn scale_pixels(&mut self, factor: f64) -> Result<(), GeometryError> {
        let px = (self.state.px as f64 * factor).round() as u32;
        let py = (self.state.py as f64 * factor).round() as u32;
        check_pixel_counts(px, py)?;
        let h = self.state.h_px_size * self.state.px as f64 / px as f64;
        let v = self.state.v_px_size * self.state.py as f64 / py as f64;
        check_pixel_sizes(h, v)?;
        self.state.px = px;
        self.state.py = py;
        self.state.h_px_size = h;
        self.state.v_px_size = v;
        self.touch();
        Ok(())
    }

    /// Orientation as `[yaw, pitch, roll]` in degrees.
    pub fn normal_angles(&self) -> [f64; 3] {
        angles_from_orientation(&self.state.orientation)
    }

    /// Set the orientation from yaw, pitch and roll in degrees.
    pub fn set_normal_angles(&mut self, yaw_deg: f64, pitch_deg: f64, roll_deg: f64) {
        self.state.orientation = orientation_from_angles(yaw_deg, pitch_deg, roll_deg);
        self.touch();
    }

    // ── Revert ──────────────────────────────────────────────────────────────

    pub fn restore_origin(&mut self) {
        self.state.origin = self.baseline.origin;
        self.touch();
    }

    pub fn restore_beam_vector(&mut self) {
        self.state.beam_vector = self.baseline.beam_vector;
        self.touch();
    }

    pub fn restore_orientation(&mut self) {
        self.state.orientation = self.baseline.orientation;
        self.touch();
    }

    pub fn restore_pixel_sizes(&mut self) {
        self.state.h_px_size = self.baseline.h_px_size;
        self.state.v_px_size = self.baseline.v_px_size;
        self.touch();
    }

    pub fn restore_pixel_counts(&mut self) {
        self.state.px = self.baseline.px;
        self.state.py = self.baseline.py;
        self.touch();
    }

    pub fn restore_all(&mut self) {
        self.state = self.baseline.clone();
        self.touch();
    }

    // ── Transforms ──────────────────────────────────────────────────────────

    /// Lab position (mm) of pixel coordinates `(x, y)`.
    pub fn pixel_position(&self, x: f64, y: f64) -> Vector3 {
        let local = Vector3::new(-x * self.state.h_px_size, -y * self.state.v_px_size, 0.0);
        self.state.orientation * local + self.state.origin
    }

    /// Fractional pixel coordinates of a lab point, projected onto the detector plane.
    pub fn pixel_coords(&self, point: &Vector3) -> [f64; 2] {
        let local = self.inv_orientation * (point - self.state.origin);
        [
            -local.x / self.state.h_px_size,
            -local.y / self.state.v_px_size,
        ]
    }

    /// Integer pixel containing a lab point.
    pub fn pixel_index(&self, point: &Vector3) -> [i64; 2] {
        let [x, y] = self.pixel_coords(point);
        [x.floor() as i64, y.floor() as i64]
    }

    /// Intersection of the ray from the sample along `direction` with the detector plane.
    pub fn intersect(&self, direction: &Vector3) -> Result<Vector3, GeometryError> {
        let len = direction.norm();
        if !len.is_finite() || len < 1e-15 {
            return Err(GeometryError::ZeroLength("ray direction"));
        }
        let nd = self.normal.dot(direction);
        if nd.abs() < 1e-15 * len {
            return Err(GeometryError::ParallelToDetector(
                direction.x,
                direction.y,
                direction.z,
            ));
        }
        let t = self.normal.dot(&self.state.origin) / nd;
        if t <= 0.0 {
            return Err(GeometryError::MissesDetector(
                direction.x,
                direction.y,
                direction.z,
            ));
        }
        Ok(direction * t)
    }

    /// Scattering angle 2θ (radians) at pixel coordinates `(x, y)`.
    pub fn scattering_angle(&self, x: f64, y: f64) -> f64 {
        let p = self.pixel_position(x, y);
        let c = p.dot(&self.state.beam_vector) / p.norm();
        c.clamp(-1.0, 1.0).acos()
    }

    /// Where the direct beam meets the detector plane (lab frame, mm).
    pub fn beam_centre_position(&self) -> Result<Vector3, GeometryError> {
        self.intersect(&self.state.beam_vector)
    }

    /// Beam-centre pixel coordinates.
    pub fn beam_centre_coords(&self) -> Result<[f64; 2], GeometryError> {
        Ok(self.pixel_coords(&self.beam_centre_position()?))
    }

    /// Slide the detector in its own plane so the beam hits pixel `(x, y)`.
    pub fn set_beam_centre_coords(&mut self, x: f64, y: f64) -> Result<(), GeometryError> {
        let hit = self.beam_centre_position()?;
        let local = Vector3::new(-x * self.state.h_px_size, -y * self.state.v_px_size, 0.0);
        self.state.origin = hit - self.state.orientation * local;
        self.touch();
        Ok(())
    }

    /// Distance (mm) from the sample to the beam centre.
    pub fn beam_centre_distance(&self) -> Result<f64, GeometryError> {
        Ok(self.beam_centre_position()?.norm())
    }

    /// Perpendicular distance (mm) from the sample to the detector plane.
    pub fn detector_distance(&self) -> f64 {
        self.normal.dot(&self.state.origin).abs()
    }

    /// Largest scattering angle on the detector, taken over its four corners.
    pub fn max_scattering_angle(&self) -> f64 {
        let (w, h) = (self.state.px as f64, self.state.py as f64);
        let min_cos = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
            .iter()
            .map(|&(x, y)| {
                let p = self.pixel_position(x, y);
                p.dot(&self.state.beam_vector) / p.norm()
            })
            .fold(f64::INFINITY, f64::min);
        min_cos.clamp(-1.0, 1.0).acos()
    }

    /// Distance in pixels from the beam centre to the nearest detector edge.
    ///
    /// Negative when the beam centre lies outside the active area.
    pub fn distance_to_closest_edge_from_beam_centre(&self) -> Result<f64, GeometryError> {
        let [x, y] = self.beam_centre_coords()?;
        let (w, h) = (self.state.px as f64, self.state.py as f64);
        Ok(x.min(w - x).min(y).min(h - y))
    }
}

impl PartialEq for DetectorGeometry {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}
