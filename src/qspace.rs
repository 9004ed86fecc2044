//! Momentum-transfer (Q) space for one detector/beam configuration.
//!
//! ```text
//! q  = k·p̂ − kᵢ,   k = 2π/λ,   kᵢ = k·b̂
//! ```
//!
//! where `p̂` is the unit ray from the sample to a pixel and `b̂` the beam
//! direction. `QSpace` owns its detector and environment; mutating either goes
//! through [`QSpace::update_detector`] / [`QSpace::update_environment`], which
//! re-derive the cached wavenumber and initial wavevector.

use std::f64::consts::PI;

use crate::detector::DetectorGeometry;
use crate::environment::BeamEnvironment;
use crate::error::GeometryError;
use crate::geometry::unit_vector;
use crate::Vector3;

#[derive(Debug, Clone)]
pub struct QSpace {
    detector: DetectorGeometry,
    environment: BeamEnvironment,
    k: f64,
    ki: Vector3,
    derived_revision: u64,
}

impl QSpace {
    pub fn new(detector: DetectorGeometry, environment: BeamEnvironment) -> Self {
        let mut qs = Self {
            detector,
            environment,
            k: 0.0,
            ki: Vector3::zeros(),
            derived_revision: 0,
        };
        qs.refresh();
        qs
    }

    /// Re-derive the cached wavenumber and initial wavevector.
    pub fn refresh(&mut self) {
        self.k = self.environment.wavenumber();
        self.ki = self.detector.beam_vector() * self.k;
        self.derived_revision = self.detector.revision();
    }

    /// `true` when the detector changed since the cache was derived.
    pub fn is_stale(&self) -> bool {
        self.derived_revision != self.detector.revision()
    }

    pub fn detector(&self) -> &DetectorGeometry {
        &self.detector
    }

    pub fn environment(&self) -> &BeamEnvironment {
        &self.environment
    }

    /// Mutate the detector, then re-derive the cache.
    pub fn update_detector<R>(&mut self, f: impl FnOnce(&mut DetectorGeometry) -> R) -> R {
        let out = f(&mut self.detector);
        self.refresh();
        out
    }

    /// Mutate the environment, then re-derive the cache.
    pub fn update_environment<R>(&mut self, f: impl FnOnce(&mut BeamEnvironment) -> R) -> R {
        let out = f(&mut self.environment);
        self.refresh();
        out
    }

    pub fn into_parts(self) -> (DetectorGeometry, BeamEnvironment) {
        (self.detector, self.environment)
    }

    /// Wavenumber `k = 2π/λ` (Å⁻¹).
    pub fn wavenumber(&self) -> f64 {
        self.k
    }

    /// Incident wavevector `kᵢ`.
    pub fn initial_wavevector(&self) -> Vector3 {
        self.ki
    }

    /// Momentum transfer at pixel coordinates `(x, y)`.
    pub fn q_from_pixel(&self, x: f64, y: f64) -> Vector3 {
        let p = self.detector.pixel_position(x, y);
        p.normalize() * self.k - self.ki
    }

    /// Pixel coordinates where the scattered ray for `q` meets the detector.
    pub fn pixel_from_q(&self, q: &Vector3) -> Result<[f64; 2], GeometryError> {
        let kf = unit_vector(&(q + self.ki), "scattered wavevector")?;
        let hit = self.detector.intersect(&kf)?;
        Ok(self.detector.pixel_coords(&hit))
    }

    /// Scattering angle 2θ (radians) for momentum transfer `q`.
    pub fn scattering_angle(&self, q: &Vector3) -> Result<f64, GeometryError> {
        let s = q.norm() / (2.0 * self.k);
        if s > 1.0 {
            return Err(GeometryError::NoBraggSolution(s));
        }
        Ok(2.0 * s.asin())
    }

    /// Lattice spacing `d = 2π/|q|` (Å).
    pub fn d_spacing(&self, q: &Vector3) -> Result<f64, GeometryError> {
        d_spacing_from_q(q)
    }
}

fn d_spacing_from_q(q: &Vector3) -> Result<f64, GeometryError> {
    let len = q.norm();
    if len < 1e-15 {
        return Err(GeometryError::ZeroLength("momentum transfer"));
    }
    Ok(2.0 * PI / len)
}

/// Bragg d-spacing (Å) of the reflection seen at pixel `(x, y)`.
pub fn d_spacing_from_pixel(
    detector: &DetectorGeometry,
    environment: &BeamEnvironment,
    x: f64,
    y: f64,
) -> Result<f64, GeometryError> {
    let theta = 0.5 * detector.scattering_angle(x, y);
    let s = theta.sin();
    if s < 1e-15 {
        return Err(GeometryError::ZeroLength("momentum transfer"));
    }
    Ok(environment.wavelength() / (2.0 * s))
}

/// Lattice spacings between consecutive diffraction spots.
///
/// `coords` is a flat `[x0, y0, x1, y1, …]` list of spot pixel positions; the
/// result holds `2π/|q_i − q_{i+1}|` for each consecutive pair. When one spot
/// of a pair is the beam centre this is the Bragg spacing of the other.
pub fn d_spacings_from_pixel_coords(
    detector: &DetectorGeometry,
    environment: &BeamEnvironment,
    coords: &[f64],
) -> Result<Vec<f64>, GeometryError> {
    if coords.len() % 2 != 0 {
        return Err(GeometryError::OddCoordinateCount(coords.len()));
    }
    if coords.len() < 4 {
        return Err(GeometryError::TooFewSpots(coords.len() / 2));
    }
    let qspace = QSpace::new(detector.clone(), environment.clone());
    let qs: Vec<Vector3> = coords
        .chunks_exact(2)
        .map(|c| qspace.q_from_pixel(c[0], c[1]))
        .collect();
    qs.windows(2)
        .map(|pair| d_spacing_from_q(&(pair[0] - pair[1])))
        .collect()
}
