//! Voxel accumulation grid and the finalized, persistable volume.

use anyhow::Context;
use ndarray::{s, Array3, Zip};
use rkyv::{Archive, Deserialize, Serialize};
use tracing::info;

use crate::error::MapperError;
use crate::Vector3;

use super::splitter::{Splitter, CORNERS};

/// Name of the signal field in a finalized volume.
pub const SIGNAL_NAME: &str = "volume";

/// Dense accumulation grid: weighted intensity (`map`) and weight (`tally`).
///
/// Voxel `[i, j, k]` has its lower corner at `origin + [i, j, k]·delta`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelVolume {
    map: Array3<f64>,
    tally: Array3<f64>,
    origin: [f64; 3],
    delta: [f64; 3],
}

impl VoxelVolume {
    pub fn new(shape: [usize; 3], origin: [f64; 3], delta: [f64; 3]) -> Result<Self, MapperError> {
        if delta.iter().any(|&d| !(d > 0.0 && d.is_finite())) {
            return Err(MapperError::InvalidVoxelSize(delta));
        }
        Ok(Self {
            map: Array3::zeros(shape),
            tally: Array3::zeros(shape),
            origin,
            delta,
        })
    }

    /// Empty grid with the same shape, origin and voxel size.
    pub fn empty_like(&self) -> Self {
        Self {
            map: Array3::zeros(self.map.raw_dim()),
            tally: Array3::zeros(self.tally.raw_dim()),
            origin: self.origin,
            delta: self.delta,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        let (a, b, c) = self.map.dim();
        [a, b, c]
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    pub fn delta(&self) -> [f64; 3] {
        self.delta
    }

    pub fn map(&self) -> &Array3<f64> {
        &self.map
    }

    pub fn tally(&self) -> &Array3<f64> {
        &self.tally
    }

    /// Coordinates of the lower voxel corners along `axis`.
    pub fn axis(&self, axis: usize) -> Vec<f64> {
        (0..self.shape()[axis])
            .map(|i| self.origin[axis] + i as f64 * self.delta[axis])
            .collect()
    }

    /// Share `intensity` at `position` among neighbouring voxels.
    ///
    /// Returns the total weight that landed inside the grid.
    pub fn splat(&mut self, splitter: &Splitter, position: &Vector3, intensity: f64) -> f64 {
        let mut base = [0i64; 3];
        let mut frac = [0.0; 3];
        for i in 0..3 {
            let p = (position[i] - self.origin[i]) / self.delta[i];
            if !p.is_finite() {
                return 0.0;
            }
            let f = p.floor();
            base[i] = f as i64;
            frac[i] = p - f;
        }

        let shape = self.shape();
        let weights = splitter.weights(&frac, &self.delta);
        let mut landed = 0.0;
        for (corner, &w) in CORNERS.iter().zip(weights.iter()) {
            if w == 0.0 {
                continue;
            }
            let mut idx = [0usize; 3];
            let mut inside = true;
            for i in 0..3 {
                let v = base[i] + corner[i] as i64;
                if v < 0 || v >= shape[i] as i64 {
                    inside = false;
                    break;
                }
                idx[i] = v as usize;
            }
            if !inside {
                continue;
            }
            self.map[idx] += w * intensity;
            self.tally[idx] += w;
            landed += w;
        }
        landed
    }

    /// Add another grid's contributions; both grids must share shape, origin and voxel size.
    pub fn accumulate(&mut self, other: &VoxelVolume) -> Result<(), MapperError> {
        if other.shape() != self.shape() || other.origin != self.origin || other.delta != self.delta
        {
            return Err(MapperError::GridMismatch {
                expected: self.shape(),
                found: other.shape(),
            });
        }
        self.map += &other.map;
        self.tally += &other.tally;
        Ok(())
    }

    /// Inclusive index bounds of the voxels with non-zero tally.
    pub fn non_zero_bounds(&self) -> Option<([usize; 3], [usize; 3])> {
        let mut lo = [usize::MAX; 3];
        let mut hi = [0usize; 3];
        let mut any = false;
        for ((i, j, k), &t) in self.tally.indexed_iter() {
            if t == 0.0 {
                continue;
            }
            any = true;
            for (axis, v) in [i, j, k].into_iter().enumerate() {
                lo[axis] = lo[axis].min(v);
                hi[axis] = hi[axis].max(v);
            }
        }
        any.then_some((lo, hi))
    }

    /// Smallest sub-grid holding every voxel with non-zero tally.
    ///
    /// An untouched grid is returned unchanged.
    pub fn crop_to_non_zero(&self) -> VoxelVolume {
        let Some((lo, hi)) = self.non_zero_bounds() else {
            return self.clone();
        };
        let slice = s![lo[0]..=hi[0], lo[1]..=hi[1], lo[2]..=hi[2]];
        let mut origin = self.origin;
        for i in 0..3 {
            origin[i] += lo[i] as f64 * self.delta[i];
        }
        VoxelVolume {
            map: self.map.slice(slice).to_owned(),
            tally: self.tally.slice(slice).to_owned(),
            origin,
            delta: self.delta,
        }
    }

    /// Normalized volume `map/tally` with `0/0 = 0`.
    pub fn normalized(&self) -> Array3<f64> {
        Zip::from(&self.map)
            .and(&self.tally)
            .map_collect(|&m, &t| if t == 0.0 { 0.0 } else { m / t })
    }

    /// Labeled dataset for persistence.
    pub fn finalize(&self, axis_names: &[String; 3]) -> VolumeDataset {
        let shape = self.shape();
        VolumeDataset {
            shape: [shape[0] as u32, shape[1] as u32, shape[2] as u32],
            data: self.normalized().iter().copied().collect(),
            axes: [self.axis(0), self.axis(1), self.axis(2)],
            axis_names: axis_names.clone(),
            signal: SIGNAL_NAME.to_string(),
            origin: self.origin,
            delta: self.delta,
        }
    }
}

/// A finalized volume with named axes, serializable with rkyv.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct VolumeDataset {
    pub shape: [u32; 3],
    /// Normalized intensities in row-major order.
    pub data: Vec<f64>,
    /// Lower-corner coordinates along each axis.
    pub axes: [Vec<f64>; 3],
    pub axis_names: [String; 3],
    /// Name of the signal field.
    pub signal: String,
    pub origin: [f64; 3],
    pub delta: [f64; 3],
}

impl VolumeDataset {
    /// The volume as a 3-D array.
    pub fn volume(&self) -> anyhow::Result<Array3<f64>> {
        let shape = (
            self.shape[0] as usize,
            self.shape[1] as usize,
            self.shape[2] as usize,
        );
        Array3::from_shape_vec(shape, self.data.clone())
            .context("volume data does not match its declared shape")
    }

    /// Serialize the dataset to bytes using rkyv.
    pub fn to_rkyv_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| anyhow::anyhow!("rkyv serialization failed: {}", e))?;
        Ok(bytes.to_vec())
    }

    /// Deserialize a dataset from rkyv bytes.
    pub fn from_rkyv_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))
    }

    /// Save the dataset to a file using rkyv.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let bytes = self.to_rkyv_bytes()?;
        std::fs::write(path, &bytes).with_context(|| format!("writing volume to {path}"))?;
        info!("Saved volume to {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    /// Load a dataset from an rkyv file.
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading volume from {path}"))?;
        let ds = Self::from_rkyv_bytes(&bytes)?;
        info!(
            "Loaded volume: shape {:?}, axes {:?}",
            ds.shape, ds.axis_names
        );
        Ok(ds)
    }
}
