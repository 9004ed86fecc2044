//! Reciprocal-space mapping: accumulate detector frames into a voxel volume.
//!
//! Each pixel with positive intensity is taken to momentum-transfer space
//! through the frame's [`QSpace`], then to Miller (HKL) coordinates through
//! the frame's 3×3 Miller matrix, and its intensity is shared among the
//! surrounding voxels by the configured [`Splitter`].
//!
//! # Pipeline
//!
//! ```text
//! frames → (optional) bounding-box pass → upsample → pixel → q → hkl → splat
//!        → (optional) crop to non-zero tally → map/tally → VolumeDataset
//! ```
//!
//! With [`MapperConfig::parallel`] set, frames are processed on the rayon pool;
//! every worker fills a private grid and the partial grids are summed.

pub mod splitter;
pub mod upsample;
pub mod volume;

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::detector::DetectorGeometry;
use crate::environment::BeamEnvironment;
use crate::error::MapperError;
use crate::qspace::QSpace;
use crate::{Matrix3, Vector3};

pub use splitter::Splitter;
pub use upsample::upsample_image;
pub use volume::{VolumeDataset, VoxelVolume, SIGNAL_NAME};

/// One detector image with everything needed to place its pixels in HKL.
#[derive(Debug, Clone)]
pub struct MapperFrame {
    /// Intensities indexed `[y, x]`; must match the detector pixel counts.
    pub image: Array2<f64>,
    pub detector: DetectorGeometry,
    pub environment: BeamEnvironment,
    /// Transform from Q to Miller coordinates; the identity maps into Q space.
    pub miller: Matrix3,
}

/// How the voxel grid is chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum GridSpec {
    /// Bounding box derived from the frames, aligned to multiples of `delta`.
    Auto { delta: [f64; 3] },
    /// Caller-supplied grid.
    Fixed {
        shape: [usize; 3],
        origin: [f64; 3],
        delta: [f64; 3],
    },
}

/// Configuration for [`map_frames`].
#[derive(Debug, Clone)]
pub struct MapperConfig {
    /// Kernel used to share pixel intensity among voxels. Default nearest.
    pub splitter: Splitter,
    /// Voxel grid. Default auto-bounded with 0.01 edges.
    pub grid: GridSpec,
    /// Bicubic upsampling factor applied to every frame (≥ 1). Default 1.
    pub upsample: f64,
    /// Crop the result to the voxels that received weight. Default false.
    pub reduce_to_non_zero: bool,
    /// Process frames on the rayon pool. Default false.
    pub parallel: bool,
    /// Axis labels for the output dataset. Default `h, k, l`.
    pub axis_names: [String; 3],
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            splitter: Splitter::Nearest,
            grid: GridSpec::Auto {
                delta: [0.01, 0.01, 0.01],
            },
            upsample: 1.0,
            reduce_to_non_zero: false,
            parallel: false,
            axis_names: ["h".to_string(), "k".to_string(), "l".to_string()],
        }
    }
}

impl MapperConfig {
    /// Label the axes as Q components, for frames whose Miller matrix is the identity.
    pub fn with_q_axes(mut self) -> Self {
        self.axis_names = ["qx".to_string(), "qy".to_string(), "qz".to_string()];
        self
    }
}

/// Result of a mapping run.
#[derive(Debug, Clone)]
pub struct MapResult {
    /// Finalized volume with its axes.
    pub dataset: VolumeDataset,
    /// Raw accumulation grid (after cropping, if requested).
    pub volume: VoxelVolume,
    /// Frames that contributed.
    pub frames_used: usize,
    /// Frames skipped because their maximum intensity was not positive.
    pub frames_skipped: usize,
    /// Pixels splatted into the grid.
    pub pixels_mapped: u64,
}

/// Per-worker accumulator.
struct Accumulator {
    volume: VoxelVolume,
    frames_used: usize,
    frames_skipped: usize,
    pixels_mapped: u64,
}

impl Accumulator {
    fn new(volume: VoxelVolume) -> Self {
        Self {
            volume,
            frames_used: 0,
            frames_skipped: 0,
            pixels_mapped: 0,
        }
    }

    fn add_frame(
        mut self,
        frame: &MapperFrame,
        config: &MapperConfig,
    ) -> Result<Self, MapperError> {
        match splat_frame(&mut self.volume, frame, config)? {
            Some(n) => {
                self.frames_used += 1;
                self.pixels_mapped += n;
            }
            None => self.frames_skipped += 1,
        }
        Ok(self)
    }

    fn merge(mut self, other: Accumulator) -> Result<Self, MapperError> {
        self.volume.accumulate(&other.volume)?;
        self.frames_used += other.frames_used;
        self.frames_skipped += other.frames_skipped;
        self.pixels_mapped += other.pixels_mapped;
        Ok(self)
    }
}

/// Map a set of frames into a voxel volume.
pub fn map_frames(frames: &[MapperFrame], config: &MapperConfig) -> Result<MapResult, MapperError> {
    if frames.is_empty() {
        return Err(MapperError::NoFrames);
    }
    if !(config.upsample >= 1.0 && config.upsample.is_finite()) {
        return Err(MapperError::InvalidUpsample(config.upsample));
    }
    for frame in frames {
        check_frame_shape(frame)?;
    }

    let template = match &config.grid {
        GridSpec::Auto { delta } => {
            let (shape, origin) = bounding_box(frames, delta)?;
            VoxelVolume::new(shape, origin, *delta)?
        }
        GridSpec::Fixed {
            shape,
            origin,
            delta,
        } => VoxelVolume::new(*shape, *origin, *delta)?,
    };
    debug!(
        "Mapping {} frames onto grid {:?} with {} splitter",
        frames.len(),
        template.shape(),
        config.splitter.name()
    );

    let acc = if config.parallel {
        frames
            .par_iter()
            .try_fold(
                || Accumulator::new(template.empty_like()),
                |acc, frame| acc.add_frame(frame, config),
            )
            .try_reduce(|| Accumulator::new(template.empty_like()), Accumulator::merge)?
    } else {
        frames
            .iter()
            .try_fold(Accumulator::new(template), |acc, frame| {
                acc.add_frame(frame, config)
            })?
    };

    let volume = if config.reduce_to_non_zero {
        let cropped = acc.volume.crop_to_non_zero();
        info!(
            "Cropped volume to shape {:?} at origin {:?}",
            cropped.shape(),
            cropped.origin()
        );
        cropped
    } else {
        acc.volume
    };

    info!(
        "Mapped {} pixels from {} frames ({} skipped)",
        acc.pixels_mapped, acc.frames_used, acc.frames_skipped
    );

    Ok(MapResult {
        dataset: volume.finalize(&config.axis_names),
        volume,
        frames_used: acc.frames_used,
        frames_skipped: acc.frames_skipped,
        pixels_mapped: acc.pixels_mapped,
    })
}

fn check_frame_shape(frame: &MapperFrame) -> Result<(), MapperError> {
    let (rows, cols) = frame.image.dim();
    let expected = (frame.detector.py() as usize, frame.detector.px() as usize);
    if (rows, cols) != expected {
        return Err(MapperError::ShapeMismatch {
            image: (rows, cols),
            detector: expected,
        });
    }
    Ok(())
}

/// Miller coordinates of the pixel-coordinate point `(x, y)` of a frame.
pub fn pixel_to_miller(qspace: &QSpace, miller: &Matrix3, x: f64, y: f64) -> Vector3 {
    miller * qspace.q_from_pixel(x, y)
}

/// Miller coordinates at the corners, edge midpoints and centre of a frame.
pub fn frame_extent_points(frame: &MapperFrame) -> Vec<Vector3> {
    let qspace = QSpace::new(frame.detector.clone(), frame.environment.clone());
    let w = frame.detector.px() as f64;
    let h = frame.detector.py() as f64;
    let samples = [
        (0.0, 0.0),
        (w, 0.0),
        (0.0, h),
        (w, h),
        (0.5 * w, 0.0),
        (0.0, 0.5 * h),
        (w, 0.5 * h),
        (0.5 * w, h),
        (0.5 * w, 0.5 * h),
    ];
    samples
        .iter()
        .map(|&(x, y)| pixel_to_miller(&qspace, &frame.miller, x, y))
        .collect()
}

/// Smallest grid aligned to multiples of `delta` covering every frame's extent points.
///
/// Returns `(shape, origin)`. The shape has one extra voxel per axis so the
/// upper neighbours of samples on the far faces stay inside the grid.
/// Frames with no positive intensity are ignored.
pub fn bounding_box(
    frames: &[MapperFrame],
    delta: &[f64; 3],
) -> Result<([usize; 3], [f64; 3]), MapperError> {
    if delta.iter().any(|&d| !(d > 0.0 && d.is_finite())) {
        return Err(MapperError::InvalidVoxelSize(*delta));
    }
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for frame in frames {
        if !has_signal(&frame.image) {
            continue;
        }
        for p in frame_extent_points(frame) {
            for i in 0..3 {
                lo[i] = lo[i].min(p[i]);
                hi[i] = hi[i].max(p[i]);
            }
        }
    }
    if lo.iter().any(|v| !v.is_finite()) {
        return Err(MapperError::NoFrames);
    }

    let mut shape = [0usize; 3];
    let mut origin = [0.0; 3];
    for i in 0..3 {
        let first = (lo[i] / delta[i]).floor();
        let last = (hi[i] / delta[i]).floor();
        origin[i] = first * delta[i];
        shape[i] = (last - first) as usize + 2;
    }
    info!(
        "Bounding box: min {:?}, max {:?} -> origin {:?}, shape {:?}",
        lo, hi, origin, shape
    );
    Ok((shape, origin))
}

fn has_signal(image: &Array2<f64>) -> bool {
    image.iter().any(|&v| v > 0.0)
}

/// Splat one frame. Returns the number of pixels mapped, or `None` if the
/// frame was skipped for having no positive intensity.
pub fn splat_frame(
    volume: &mut VoxelVolume,
    frame: &MapperFrame,
    config: &MapperConfig,
) -> Result<Option<u64>, MapperError> {
    if !has_signal(&frame.image) {
        let peak = frame.image.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        warn!("Skipping frame with maximum intensity {}", peak);
        return Ok(None);
    }

    let mut detector = frame.detector.clone();
    let upsampled;
    let image = if config.upsample > 1.0 {
        upsampled = upsample_image(&frame.image, config.upsample)?;
        detector.scale_pixels(config.upsample)?;
        &upsampled
    } else {
        &frame.image
    };
    let qspace = QSpace::new(detector, frame.environment.clone());

    let mut mapped = 0u64;
    for ((y, x), &value) in image.indexed_iter() {
        if value <= 0.0 {
            continue;
        }
        let hkl = pixel_to_miller(&qspace, &frame.miller, x as f64 + 0.5, y as f64 + 0.5);
        volume.splat(&config.splitter, &hkl, value);
        mapped += 1;
    }
    debug!("Splatted {} pixels", mapped);
    Ok(Some(mapped))
}
