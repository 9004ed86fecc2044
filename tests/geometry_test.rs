//! Integration tests: detector geometry, Q space and Debye–Scherrer conics
//! checked against Bragg's law on synthetic setups.

use hklmap::{
    conic_from_d_spacing, d_spacing_from_pixel, d_spacings_from_pixel_coords, BeamEnvironment,
    Conic, DetectorGeometry, QSpace, Vector3,
};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// Beam centre plus a spot on the 2 Å ring of a normal-incidence detector.
#[test]
fn test_bragg_spacing_from_beam_centre_and_spot() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let det = DetectorGeometry::normal_to_beam(150.0, 1000, 1000, 0.1, 0.1).unwrap();
    let env = BeamEnvironment::new(1.0).unwrap();
    let two_theta = 2.0 * (1.0_f64 / (2.0 * 2.0)).asin();
    let radius_px = 150.0 * two_theta.tan() / 0.1;

    let [bx, by] = det.beam_centre_coords().unwrap();
    let spot = (bx + radius_px, by);

    let d = d_spacings_from_pixel_coords(&det, &env, &[bx, by, spot.0, spot.1]).unwrap();
    assert_eq!(d.len(), 1);
    assert!((d[0] - 2.0).abs() < 1e-9, "d-spacing {} (expected 2.0)", d[0]);

    let d_direct = d_spacing_from_pixel(&det, &env, spot.0, spot.1).unwrap();
    assert!((d_direct - 2.0).abs() < 1e-9, "d-spacing {d_direct} (expected 2.0)");

    match conic_from_d_spacing(&det, 1.0, 2.0).unwrap() {
        Conic::Circle { centre, radius } => {
            assert!((radius - radius_px).abs() < 1e-9, "radius {radius} vs {radius_px}");
            assert!((centre[0] - bx).abs() < 1e-9 && (centre[1] - by).abs() < 1e-9);
        }
        other => panic!("expected a circle, got {other:?}"),
    }
}

/// Every point of the conic on a tilted detector diffracts at the same d-spacing.
#[test]
fn test_tilted_conic_points_share_d_spacing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let mut det = DetectorGeometry::normal_to_beam(200.0, 2000, 2000, 0.15, 0.15).unwrap();
    det.set_normal_angles(12.0, -5.0, 3.0);
    let env = BeamEnvironment::from_energy_kev(15.0).unwrap();
    let d = 3.1;

    let conic = conic_from_d_spacing(&det, env.wavelength(), d).unwrap();
    assert!(matches!(conic, Conic::Ellipse { .. }));

    for i in 0..16 {
        let t = i as f64 * std::f64::consts::TAU / 16.0;
        let [x, y] = conic.point_at(t);
        let found = d_spacing_from_pixel(&det, &env, x, y).unwrap();
        assert!(
            (found - d).abs() < 1e-8,
            "conic point {i} at ({x:.3}, {y:.3}) has d = {found}"
        );
    }
}

/// Random pixels on randomly oriented detectors survive pixel → q → pixel.
#[test]
fn test_q_roundtrip_random_geometries() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let mut rng = StdRng::seed_from_u64(7);

    for trial in 0..20 {
        let mut det = DetectorGeometry::normal_to_beam(
            rng.random_range(80.0..400.0),
            1475,
            1679,
            0.172,
            0.172,
        )
        .unwrap();
        det.set_normal_angles(
            rng.random_range(-20.0..20.0),
            rng.random_range(-20.0..20.0),
            rng.random_range(-180.0..180.0),
        );
        det.set_beam_vector(Vector3::new(
            rng.random_range(-0.05..0.05),
            rng.random_range(-0.05..0.05),
            1.0,
        ))
        .unwrap();
        let env = BeamEnvironment::new(rng.random_range(0.5..2.0)).unwrap();
        let qs = QSpace::new(det, env);

        for _ in 0..25 {
            let x = rng.random_range(0.0..1475.0);
            let y = rng.random_range(0.0..1679.0);
            let q = qs.q_from_pixel(x, y);
            let [x2, y2] = qs.pixel_from_q(&q).unwrap();
            assert!(
                (x - x2).abs() < 1e-6 && (y - y2).abs() < 1e-6,
                "trial {trial}: ({x}, {y}) came back as ({x2}, {y2})"
            );
        }
    }
}

/// Pixel positions map back to the same pixel coordinates after edits and restores.
#[test]
fn test_pixel_roundtrip_through_edits() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let mut det = DetectorGeometry::normal_to_beam(300.0, 512, 256, 0.055, 0.055).unwrap();
    let baseline = det.clone();
    det.set_origin(Vector3::new(10.0, -4.0, 310.0));
    det.set_normal_angles(-7.5, 2.0, 90.0);
    det.set_pixel_sizes(0.075, 0.075).unwrap();

    for &(x, y) in &[(0.0, 0.0), (511.9, 3.2), (100.5, 255.5)] {
        let p = det.pixel_position(x, y);
        let [x2, y2] = det.pixel_coords(&p);
        assert!((x - x2).abs() < 1e-9 && (y - y2).abs() < 1e-9);
    }

    det.restore_all();
    assert_eq!(det, baseline);
    assert!(det.revision() > baseline.revision());
}
