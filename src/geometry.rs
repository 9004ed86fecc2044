//! Shared 3-D geometry helpers: rotations, orthonormal cleanup and detector bases.
//!
//! All orientation matrices in this crate are orthonormal and map
//! detector-local axes into the lab frame. Round-off accumulated by repeated
//! rotation is removed with [`orthonormalize`] and [`snap_matrix_to_zero`].

use nalgebra::{Rotation3, Unit};

use crate::error::GeometryError;
use crate::{Matrix3, Vector3};

/// Tolerance used to decide whether a matrix is orthonormal.
pub const ORTHONORMAL_TOLERANCE: f64 = 1e-9;

/// Normalize `v`, failing if it has (near) zero length.
///
/// `what` names the vector in the error message.
pub fn unit_vector(v: &Vector3, what: &'static str) -> Result<Vector3, GeometryError> {
    let norm = v.norm();
    if !norm.is_finite() || norm < 1e-15 {
        return Err(GeometryError::ZeroLength(what));
    }
    Ok(v / norm)
}

/// Right-handed rotation by `angle_rad` about `axis` (need not be unit length).
pub fn rotation_about_axis(axis: &Vector3, angle_rad: f64) -> Result<Matrix3, GeometryError> {
    let axis = unit_vector(axis, "rotation axis")?;
    Ok(Rotation3::from_axis_angle(&Unit::new_unchecked(axis), angle_rad).into_inner())
}

/// Zero every component below one ULP of the largest component.
pub fn snap_vector_to_zero(v: &Vector3) -> Vector3 {
    let scale = v.amax();
    let threshold = f64::EPSILON * scale;
    v.map(|c| if c.abs() < threshold { 0.0 } else { c })
}

/// Zero every element below one ULP of the largest element.
pub fn snap_matrix_to_zero(m: &Matrix3) -> Matrix3 {
    let scale = m.amax();
    let threshold = f64::EPSILON * scale;
    m.map(|c| if c.abs() < threshold { 0.0 } else { c })
}

/// Largest absolute deviation of `mᵀm` from the identity.
pub fn orthonormal_deviation(m: &Matrix3) -> f64 {
    (m.transpose() * m - Matrix3::identity()).amax()
}

/// Re-orthonormalize the columns of `m` (Gram-Schmidt, first column kept).
///
/// The third column is rebuilt as the cross product of the first two so the
/// result stays right-handed when the input was.
pub fn orthonormalize(m: &Matrix3) -> Result<Matrix3, GeometryError> {
    let c0 = unit_vector(&m.column(0).into_owned(), "orientation column 0")?;
    let c1 = m.column(1).into_owned();
    let c1 = unit_vector(&(c1 - c0 * c0.dot(&c1)), "orientation column 1")?;
    let mut c2 = c0.cross(&c1);
    if c2.dot(&m.column(2).into_owned()) < 0.0 {
        c2 = -c2;
    }
    Ok(snap_matrix_to_zero(&Matrix3::from_columns(&[c0, c1, c2])))
}

/// Orientation from yaw, pitch and roll in degrees: `R = Ry(yaw)·Rx(pitch)·Rz(roll)`.
///
/// Yaw turns about the lab vertical (y), pitch about the lab horizontal (x) and
/// roll about the detector normal.
pub fn orientation_from_angles(yaw_deg: f64, pitch_deg: f64, roll_deg: f64) -> Matrix3 {
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), yaw_deg.to_radians());
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), pitch_deg.to_radians());
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), roll_deg.to_radians());
    snap_matrix_to_zero(&(ry * rx * rz).into_inner())
}

/// Inverse of [`orientation_from_angles`]: `[yaw, pitch, roll]` in degrees.
///
/// At gimbal lock (pitch = ±90°) the roll is reported as zero.
pub fn angles_from_orientation(m: &Matrix3) -> [f64; 3] {
    let pitch = (-m[(1, 2)]).clamp(-1.0, 1.0).asin();
    let (yaw, roll) = if pitch.cos().abs() < 1e-12 {
        ((-m[(2, 0)]).atan2(m[(0, 0)]), 0.0)
    } else {
        (m[(0, 2)].atan2(m[(2, 2)]), m[(1, 0)].atan2(m[(1, 1)]))
    };
    [yaw.to_degrees(), pitch.to_degrees(), roll.to_degrees()]
}

/// Build a detector orientation from a plane normal and a fast (row) axis.
///
/// The fast axis is orthogonalized against the normal; the slow axis is
/// `normal × fast`. Columns of the result are `−fast`, `−slow`, `normal`.
pub fn basis_from_normal_and_fast(
    normal: &Vector3,
    fast: &Vector3,
) -> Result<Matrix3, GeometryError> {
    let n = unit_vector(normal, "detector normal")?;
    let f = unit_vector(fast, "detector fast axis")?;
    let f_perp = f - n * n.dot(&f);
    if f_perp.norm() < 1e-9 {
        return Err(GeometryError::DegenerateBasis(n.dot(&f).abs()));
    }
    let f = f_perp.normalize();
    let s = n.cross(&f);
    Ok(snap_matrix_to_zero(&Matrix3::from_columns(&[-f, -s, n])))
}

/// Polar/azimuth pair (degrees) of a unit vector: polar from +z, azimuth from +x towards +y.
pub fn direction_to_polar(v: &Vector3) -> [f64; 2] {
    let polar = v.z.clamp(-1.0, 1.0).acos();
    let azimuth = v.y.atan2(v.x);
    [polar.to_degrees(), azimuth.to_degrees()]
}

/// Unit vector from polar/azimuth angles in degrees.
pub fn polar_to_direction(polar_deg: f64, azimuth_deg: f64) -> Vector3 {
    let (sp, cp) = polar_deg.to_radians().sin_cos();
    let (sa, ca) = azimuth_deg.to_radians().sin_cos();
    snap_vector_to_zero(&Vector3::new(sp * ca, sp * sa, cp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_to_zero() {
        let v = Vector3::new(1.0, 1e-18, -3e-17);
        let s = snap_vector_to_zero(&v);
        assert_eq!(s, Vector3::new(1.0, 0.0, 0.0));

        let m = Matrix3::new(1.0, 1e-20, 0.0, 0.0, 1.0, 0.0, -2e-19, 0.0, 1.0);
        assert_eq!(snap_matrix_to_zero(&m), Matrix3::identity());
    }

    #[test]
    fn test_rotation_about_axis() {
        let r = rotation_about_axis(&Vector3::new(0.0, 0.0, 2.0), std::f64::consts::FRAC_PI_2)
            .unwrap();
        let v = r * Vector3::x();
        assert!((v - Vector3::y()).norm() < 1e-12, "got {v}");

        assert_eq!(
            rotation_about_axis(&Vector3::zeros(), 1.0),
            Err(GeometryError::ZeroLength("rotation axis"))
        );
    }

    #[test]
    fn test_orthonormalize_repairs_drift() {
        let mut m = orientation_from_angles(12.0, -7.0, 33.0);
        m[(0, 1)] += 1e-6;
        m[(2, 2)] -= 2e-6;
        assert!(orthonormal_deviation(&m) > 1e-7);
        let fixed = orthonormalize(&m).unwrap();
        assert!(orthonormal_deviation(&fixed) < 1e-12);
        assert!((fixed.determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_angles_roundtrip() {
        for &(yaw, pitch, roll) in &[
            (0.0, 0.0, 0.0),
            (10.0, 20.0, 30.0),
            (-45.0, 5.0, 170.0),
            (120.0, -60.0, -15.0),
        ] {
            let m = orientation_from_angles(yaw, pitch, roll);
            let [y, p, r] = angles_from_orientation(&m);
            assert!(
                (y - yaw).abs() < 1e-9 && (p - pitch).abs() < 1e-9 && (r - roll).abs() < 1e-9,
                "angles ({yaw}, {pitch}, {roll}) came back as ({y}, {p}, {r})"
            );
        }
    }

    #[test]
    fn test_basis_from_normal_and_fast() {
        let m = basis_from_normal_and_fast(&Vector3::z(), &Vector3::new(1.0, 0.0, 0.3)).unwrap();
        assert!(orthonormal_deviation(&m) < 1e-12);
        assert!((m.determinant() - 1.0).abs() < 1e-12);
        assert!((m.column(2) - Vector3::z()).norm() < 1e-12);
        assert!((m.column(0) + Vector3::x()).norm() < 1e-12);

        let err = basis_from_normal_and_fast(&Vector3::z(), &Vector3::new(0.0, 0.0, -4.0));
        assert!(matches!(err, Err(GeometryError::DegenerateBasis(_))));
    }

    #[test]
    fn test_polar_roundtrip() {
        let v = Vector3::new(0.3, -0.4, 0.866).normalize();
        let [p, a] = direction_to_polar(&v);
        let back = polar_to_direction(p, a);
        assert!((back - v).norm() < 1e-12);
    }
}
