//! Integration tests: map synthetic detector frames into reciprocal space and
//! check accumulation, cropping, parallel reduction and persistence.

use hklmap::mapper::bounding_box;
use hklmap::{
    map_frames, BeamEnvironment, DetectorGeometry, GridSpec, MapperConfig, MapperFrame, Matrix3,
    Splitter, VolumeDataset,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Small detector, rotated a little per frame, with a noisy blob on a flat background.
fn synthetic_frames(count: usize, seed: u64) -> Vec<MapperFrame> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.5).unwrap();
    (0..count)
        .map(|i| {
            let mut detector = DetectorGeometry::normal_to_beam(200.0, 40, 30, 1.0, 1.0).unwrap();
            detector.set_normal_angles(2.0 * i as f64, -1.0 * i as f64, 0.0);
            let image = Array2::from_shape_fn((30, 40), |(y, x)| {
                let dx = x as f64 - 25.0;
                let dy = y as f64 - 12.0;
                let blob = 50.0 * (-(dx * dx + dy * dy) / 18.0).exp();
                (5.0 + blob + noise.sample(&mut rng)).max(0.0)
            });
            MapperFrame {
                image,
                detector,
                environment: BeamEnvironment::new(1.0).unwrap(),
                miller: Matrix3::identity(),
            }
        })
        .collect()
}

fn fixed_grid(frames: &[MapperFrame], delta: [f64; 3]) -> GridSpec {
    let (shape, origin) = bounding_box(frames, &delta).unwrap();
    GridSpec::Fixed {
        shape,
        origin,
        delta,
    }
}

#[test]
fn test_duplicate_frame_doubles_tally_but_not_volume() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let frames = synthetic_frames(1, 1);
    let grid = fixed_grid(&frames, [0.005, 0.005, 0.002]);
    for splitter in [
        Splitter::Nearest,
        Splitter::Inverse,
        Splitter::Gaussian { hwhm: 0.004 },
        Splitter::Exponential { hm: 0.004 },
    ] {
        let config = MapperConfig {
            splitter,
            grid: grid.clone(),
            ..Default::default()
        };
        let once = map_frames(&frames, &config).unwrap();
        let twice = map_frames(&[frames[0].clone(), frames[0].clone()], &config).unwrap();

        for (a, b) in once.volume.tally().iter().zip(twice.volume.tally().iter()) {
            assert!((2.0 * a - b).abs() < 1e-9 * b.abs().max(1.0), "{}: tally", splitter.name());
        }
        for (a, b) in once.dataset.data.iter().zip(&twice.dataset.data) {
            assert!((a - b).abs() < 1e-9 * a.abs().max(1.0), "{}: {a} vs {b}", splitter.name());
        }
        assert_eq!(twice.pixels_mapped, 2 * once.pixels_mapped);
    }
}

#[test]
fn test_parallel_matches_serial() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let frames = synthetic_frames(8, 2);
    let serial = MapperConfig {
        splitter: Splitter::Gaussian { hwhm: 0.02 },
        grid: GridSpec::Auto {
            delta: [0.02, 0.02, 0.02],
        },
        ..Default::default()
    }
    .with_q_axes();
    let parallel = MapperConfig {
        parallel: true,
        ..serial.clone()
    };

    let a = map_frames(&frames, &serial).unwrap();
    let b = map_frames(&frames, &parallel).unwrap();
    assert_eq!(a.dataset.shape, b.dataset.shape);
    assert_eq!(a.frames_used, b.frames_used);
    assert_eq!(a.pixels_mapped, b.pixels_mapped);
    for (x, y) in a.dataset.data.iter().zip(&b.dataset.data) {
        assert!((x - y).abs() < 1e-9 * x.abs().max(1.0), "serial {x} vs parallel {y}");
    }
}

#[test]
fn test_crop_keeps_all_weight() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let frames = synthetic_frames(3, 3);
    let delta = [0.004, 0.004, 0.004];
    let (shape, origin) = bounding_box(&frames, &delta).unwrap();
    // Pad the grid by 5 voxels on every side.
    let padded = GridSpec::Fixed {
        shape: [shape[0] + 10, shape[1] + 10, shape[2] + 10],
        origin: [
            origin[0] - 5.0 * delta[0],
            origin[1] - 5.0 * delta[1],
            origin[2] - 5.0 * delta[2],
        ],
        delta,
    };
    let full = map_frames(
        &frames,
        &MapperConfig {
            grid: padded.clone(),
            ..Default::default()
        },
    )
    .unwrap();
    let cropped = map_frames(
        &frames,
        &MapperConfig {
            grid: padded,
            reduce_to_non_zero: true,
            ..Default::default()
        },
    )
    .unwrap();

    let full_shape = full.volume.shape();
    let crop_shape = cropped.volume.shape();
    for i in 0..3 {
        assert!(crop_shape[i] <= full_shape[i] - 10, "axis {i}: {crop_shape:?} vs {full_shape:?}");
        assert!((cropped.dataset.axes[i][0] - cropped.dataset.origin[i]).abs() < 1e-12);
    }
    let full_tally: f64 = full.volume.tally().sum();
    let crop_tally: f64 = cropped.volume.tally().sum();
    assert!((full_tally - crop_tally).abs() < 1e-9 * full_tally);
    assert!((full_tally - full.pixels_mapped as f64).abs() < 1e-6 * full_tally);
}

#[test]
fn test_miller_matrix_scales_grid() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let frames = synthetic_frames(1, 4);
    let mut scaled = frames.clone();
    scaled[0].miller = Matrix3::identity() * 2.0;

    let delta = [0.01, 0.01, 0.01];
    let (shape_q, _) = bounding_box(&frames, &delta).unwrap();
    let (shape_h, _) = bounding_box(&scaled, &delta).unwrap();
    for i in 0..3 {
        // Twice the extent, give or take the alignment voxels.
        let expected = 2.0 * (shape_q[i] as f64 - 2.0);
        assert!(
            (shape_h[i] as f64 - 2.0 - expected).abs() <= 2.0,
            "axis {i}: {shape_q:?} vs {shape_h:?}"
        );
    }
}

#[test]
fn test_upsampling_keeps_voxel_values() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let mut frames = synthetic_frames(1, 5);
    frames[0].image.fill(5.0);
    let base = MapperConfig {
        grid: fixed_grid(&frames, [0.01, 0.01, 0.01]),
        ..Default::default()
    };
    let up = MapperConfig {
        upsample: 2.0,
        ..base.clone()
    };
    let a = map_frames(&frames, &base).unwrap();
    let b = map_frames(&frames, &up).unwrap();
    assert_eq!(b.pixels_mapped, 4 * a.pixels_mapped);

    // A flat frame maps to the same level in every touched voxel, however
    // finely the detector is sampled.
    for result in [&a, &b] {
        let touched: Vec<f64> = result.dataset.data.iter().copied().filter(|&v| v != 0.0).collect();
        assert!(!touched.is_empty());
        for v in touched {
            assert!((v - 5.0).abs() < 1e-4, "voxel value {v}");
        }
    }
}

#[test]
fn test_dark_frames_are_skipped() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let mut frames = synthetic_frames(2, 6);
    let mut dark = frames[0].clone();
    dark.image.fill(0.0);
    frames.push(dark);

    let result = map_frames(&frames, &MapperConfig::default()).unwrap();
    assert_eq!(result.frames_used, 2);
    assert_eq!(result.frames_skipped, 1);
}

#[test]
fn test_save_and_load_dataset() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let frames = synthetic_frames(2, 7);
    let config = MapperConfig {
        splitter: Splitter::from_name("negexp", 0.005).unwrap(),
        reduce_to_non_zero: true,
        ..Default::default()
    };
    let result = map_frames(&frames, &config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.rkyv");
    let path = path.to_str().unwrap();
    result.dataset.save_to_file(path).unwrap();
    let loaded = VolumeDataset::load_from_file(path).unwrap();

    assert_eq!(loaded, result.dataset);
    assert_eq!(loaded.axis_names, ["h", "k", "l"].map(String::from));
    assert_eq!(loaded.signal, "volume");
    let volume = loaded.volume().unwrap();
    assert_eq!(volume.dim().0, loaded.axes[0].len());
}
