//! Conic sections traced on the detector by cones about the beam.
//!
//! A Debye-Scherrer cone of half-angle α about the beam meets the detector
//! plane in a circle (beam normal to the plane) or an ellipse (oblique beam).
//! Working in the plane's own frame:
//!
//! ```text
//! D  = perpendicular sample-plane distance
//! η  = angle between beam and plane normal
//! r± = D·tan(η ± α)          (major-axis vertices, from the foot of the perpendicular)
//! a  = (r+ − r−)/2,  c = (r+ + r−)/2
//! e  = sin η / cos α,  b = a·√(1 − e²)
//! ```
//!
//! Parabolas and hyperbolas (η + α ≥ 90°) are rejected.

use std::f64::consts::FRAC_PI_2;

use crate::error::GeometryError;

use super::DetectorGeometry;

/// Tilt below which the beam is treated as normal to the detector.
const NORMAL_TILT_RAD: f64 = 1e-9;

/// A closed conic on the detector, in pixel units.
#[derive(Debug, Clone, PartialEq)]
pub enum Conic {
    Circle {
        centre: [f64; 2],
        radius: f64,
    },
    Ellipse {
        centre: [f64; 2],
        semi_major: f64,
        semi_minor: f64,
        /// Major-axis direction, radians from the pixel +x axis.
        angle: f64,
    },
}

impl Conic {
    pub fn centre(&self) -> [f64; 2] {
        match self {
            Conic::Circle { centre, .. } | Conic::Ellipse { centre, .. } => *centre,
        }
    }

    /// `[semi_major, semi_minor]`; both equal the radius for a circle.
    pub fn semi_axes(&self) -> [f64; 2] {
        match *self {
            Conic::Circle { radius, .. } => [radius, radius],
            Conic::Ellipse {
                semi_major,
                semi_minor,
                ..
            } => [semi_major, semi_minor],
        }
    }

    /// Point on the conic at parameter `t` (radians), in pixel coordinates.
    pub fn point_at(&self, t: f64) -> [f64; 2] {
        match *self {
            Conic::Circle { centre, radius } => {
                [centre[0] + radius * t.cos(), centre[1] + radius * t.sin()]
            }
            Conic::Ellipse {
                centre,
                semi_major,
                semi_minor,
                angle,
            } => {
                let (u, v) = (semi_major * t.cos(), semi_minor * t.sin());
                let (s, c) = angle.sin_cos();
                [centre[0] + u * c - v * s, centre[1] + u * s + v * c]
            }
        }
    }
}

/// Conic traced by a cone of half-angle `alpha` (radians) about the beam.
pub fn conic_from_angle(detector: &DetectorGeometry, alpha: f64) -> Result<Conic, GeometryError> {
    let (h, v) = (detector.h_px_size(), detector.v_px_size());
    if (h - v).abs() > 1e-12 * h.max(v) {
        return Err(GeometryError::NonSquarePixels(h, v));
    }

    let mut n = detector.normal();
    let mut dist = n.dot(&detector.origin());
    if dist.abs() < 1e-12 {
        return Err(GeometryError::ZeroLength("sample-to-detector distance"));
    }
    if dist < 0.0 {
        n = -n;
        dist = -dist;
    }

    let beam = detector.beam_vector();
    let cos_tilt = beam.dot(&n);
    if cos_tilt.abs() < 1e-15 {
        return Err(GeometryError::ParallelToDetector(beam.x, beam.y, beam.z));
    }
    if cos_tilt < 0.0 {
        return Err(GeometryError::MissesDetector(beam.x, beam.y, beam.z));
    }
    let tilt = cos_tilt.clamp(-1.0, 1.0).acos();

    if !(0.0..FRAC_PI_2).contains(&alpha) || tilt + alpha >= FRAC_PI_2 - 1e-12 {
        return Err(GeometryError::UnsupportedConic {
            alpha_deg: alpha.to_degrees(),
            tilt_deg: tilt.to_degrees(),
        });
    }

    let foot = n * dist;
    if tilt < NORMAL_TILT_RAD {
        return Ok(Conic::Circle {
            centre: detector.pixel_coords(&foot),
            radius: dist * alpha.tan() / h,
        });
    }

    let u = (beam - n * cos_tilt).normalize();
    let r_plus = dist * (tilt + alpha).tan();
    let r_minus = dist * (tilt - alpha).tan();
    let semi_major = 0.5 * (r_plus - r_minus);
    let offset = 0.5 * (r_plus + r_minus);
    let ecc = tilt.sin() / alpha.cos();
    let semi_minor = semi_major * (1.0 - ecc * ecc).sqrt();

    let p0 = detector.pixel_coords(&foot);
    let p1 = detector.pixel_coords(&(foot + u));
    Ok(Conic::Ellipse {
        centre: detector.pixel_coords(&(foot + u * offset)),
        semi_major: semi_major / h,
        semi_minor: semi_minor / h,
        angle: (p1[1] - p0[1]).atan2(p1[0] - p0[0]),
    })
}

/// Conic of the Bragg cone for lattice spacing `d_spacing` (Å) at `wavelength` (Å).
pub fn conic_from_d_spacing(
    detector: &DetectorGeometry,
    wavelength: f64,
    d_spacing: f64,
) -> Result<Conic, GeometryError> {
    if wavelength <= 0.0 {
        return Err(GeometryError::InvalidWavelength(wavelength));
    }
    let s = wavelength / (2.0 * d_spacing);
    if !(0.0..=1.0).contains(&s) {
        return Err(GeometryError::NoBraggSolution(s));
    }
    conic_from_angle(detector, 2.0 * s.asin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circle_for_normal_incidence() {
        let distance = 150.0;
        let pixel = 0.1;
        let det = DetectorGeometry::normal_to_beam(distance, 2000, 2000, pixel, pixel).unwrap();
        let conic = conic_from_d_spacing(&det, 1.0, 2.0).unwrap();

        let two_theta = 2.0 * (1.0_f64 / 4.0).asin();
        let expected = distance * two_theta.tan() / pixel;
        match conic {
            Conic::Circle { centre, radius } => {
                assert!((radius - expected).abs() < 1e-9, "radius {radius} vs {expected}");
                assert!((centre[0] - 1000.0).abs() < 1e-9 && (centre[1] - 1000.0).abs() < 1e-9);
            }
            other => panic!("expected a circle, got {other:?}"),
        }
    }

    #[test]
    fn test_ellipse_points_lie_on_cone() {
        let mut det = DetectorGeometry::normal_to_beam(200.0, 3000, 3000, 0.1, 0.1).unwrap();
        det.set_normal_angles(20.0, 10.0, 5.0);
        let alpha = 15.0_f64.to_radians();
        let conic = conic_from_angle(&det, alpha).unwrap();
        assert!(matches!(conic, Conic::Ellipse { .. }));
        let [a, b] = conic.semi_axes();
        assert!(a > b, "semi-major {a} should exceed semi-minor {b}");

        for i in 0..12 {
            let t = i as f64 * std::f64::consts::PI / 6.0;
            let [x, y] = conic.point_at(t);
            let angle = det.scattering_angle(x, y);
            assert!(
                (angle - alpha).abs() < 1e-9,
                "point {i} at ({x:.3}, {y:.3}) has 2θ {:.9} deg",
                angle.to_degrees()
            );
        }
    }

    #[test]
    fn test_open_conic_rejected() {
        let mut det = DetectorGeometry::normal_to_beam(200.0, 1000, 1000, 0.1, 0.1).unwrap();
        det.set_normal_angles(60.0, 0.0, 0.0);
        let err = conic_from_angle(&det, 40.0_f64.to_radians());
        assert!(matches!(err, Err(GeometryError::UnsupportedConic { .. })));
    }

    #[test]
    fn test_bad_inputs() {
        let det = DetectorGeometry::normal_to_beam(200.0, 1000, 1000, 0.1, 0.2).unwrap();
        assert!(matches!(
            conic_from_angle(&det, 0.1),
            Err(GeometryError::NonSquarePixels(..))
        ));

        let det = DetectorGeometry::normal_to_beam(200.0, 1000, 1000, 0.1, 0.1).unwrap();
        assert!(matches!(
            conic_from_d_spacing(&det, 5.0, 2.0),
            Err(GeometryError::NoBraggSolution(_))
        ));
    }
}
