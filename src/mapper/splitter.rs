//! Pixel-splitting kernels.
//!
//! A sample point inside a voxel is shared among the 8 voxels whose lower
//! corners surround it. Each kernel turns the squared distance `d²` from the
//! point to a corner (in reciprocal units) into a weight; the 8 weights are
//! normalized to sum to 1.
//!
//! | Kernel | Weight(d²) |
//! |---|---|
//! | Nearest | all weight to the containing voxel |
//! | Inverse | `1/√d²`; a sample on a corner gives that voxel the full weight |
//! | Gaussian | `exp(−ln2·d²/hwhm²)` |
//! | Exponential | `exp(−ln2·√d²/hm)` |

use std::f64::consts::LN_2;

use crate::error::MapperError;

/// Offsets of the 8 voxels sharing a sample, relative to the containing voxel.
pub const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [0, 0, 1],
    [0, 1, 0],
    [0, 1, 1],
    [1, 0, 0],
    [1, 0, 1],
    [1, 1, 0],
    [1, 1, 1],
];

/// Distance below which an inverse-distance sample counts as sitting on a corner.
const CORNER_HIT_D2: f64 = 1e-30;

/// Weighting kernel used to share a pixel's intensity among voxels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Splitter {
    #[default]
    Nearest,
    Inverse,
    Gaussian {
        /// Half-width at half-maximum, reciprocal units.
        hwhm: f64,
    },
    Exponential {
        /// Distance at which the weight halves, reciprocal units.
        hm: f64,
    },
}

impl Splitter {
    /// Look up a kernel by name.
    ///
    /// Accepted names: `""`, `"none"`, `"nearest"`, `"inverse"`, `"gaussian"`,
    /// `"negexp"` and `"exponential"` (case-insensitive). `parameter` is the
    /// kernel width and must be positive for the Gaussian and exponential kernels.
    pub fn from_name(name: &str, parameter: f64) -> Result<Self, MapperError> {
        let width = || {
            if parameter > 0.0 && parameter.is_finite() {
                Ok(parameter)
            } else {
                Err(MapperError::InvalidSplitterParameter(parameter))
            }
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "nearest" => Ok(Splitter::Nearest),
            "inverse" => Ok(Splitter::Inverse),
            "gaussian" => Ok(Splitter::Gaussian { hwhm: width()? }),
            "negexp" | "exponential" => Ok(Splitter::Exponential { hm: width()? }),
            _ => Err(MapperError::UnknownSplitter(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Splitter::Nearest => "nearest",
            Splitter::Inverse => "inverse",
            Splitter::Gaussian { .. } => "gaussian",
            Splitter::Exponential { .. } => "negexp",
        }
    }

    /// Normalized weights for the 8 [`CORNERS`].
    ///
    /// `frac` is the sample's fractional offset inside its voxel and `delta`
    /// the voxel edge lengths. If every weight underflows, the nearest corner
    /// takes all of it.
    pub fn weights(&self, frac: &[f64; 3], delta: &[f64; 3]) -> [f64; 8] {
        let mut d2 = [0.0; 8];
        for (c, corner) in CORNERS.iter().enumerate() {
            d2[c] = (0..3)
                .map(|i| {
                    let d = (frac[i] - corner[i] as f64) * delta[i];
                    d * d
                })
                .sum();
        }

        let mut w = [0.0; 8];
        match *self {
            Splitter::Nearest => {
                w[0] = 1.0;
                return w;
            }
            Splitter::Inverse => {
                if let Some(c) = d2.iter().position(|&v| v < CORNER_HIT_D2) {
                    w[c] = 1.0;
                    return w;
                }
                for c in 0..8 {
                    w[c] = 1.0 / d2[c].sqrt();
                }
            }
            Splitter::Gaussian { hwhm } => {
                let factor = LN_2 / (hwhm * hwhm);
                for c in 0..8 {
                    w[c] = (-factor * d2[c]).exp();
                }
            }
            Splitter::Exponential { hm } => {
                let factor = LN_2 / hm;
                for c in 0..8 {
                    w[c] = (-factor * d2[c].sqrt()).exp();
                }
            }
        }

        let sum: f64 = w.iter().sum();
        if sum > 0.0 && sum.is_finite() {
            w.iter_mut().for_each(|v| *v /= sum);
        } else {
            let nearest = (0..8)
                .min_by(|&a, &b| d2[a].total_cmp(&d2[b]))
                .unwrap_or(0);
            w = [0.0; 8];
            w[nearest] = 1.0;
        }
        w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kernels() -> [Splitter; 4] {
        [
            Splitter::Nearest,
            Splitter::Inverse,
            Splitter::Gaussian { hwhm: 0.02 },
            Splitter::Exponential { hm: 0.03 },
        ]
    }

    #[test]
    fn test_weights_sum_to_one() {
        let delta = [0.02, 0.05, 0.01];
        let fracs = [
            [0.5, 0.5, 0.5],
            [0.01, 0.99, 0.3],
            [0.25, 0.75, 0.9],
            [0.999, 0.001, 0.5],
        ];
        for kernel in all_kernels() {
            for frac in &fracs {
                let w = kernel.weights(frac, &delta);
                let sum: f64 = w.iter().sum();
                assert!(
                    (sum - 1.0).abs() < 1e-12,
                    "{} weights at {frac:?} sum to {sum}",
                    kernel.name()
                );
                assert!(w.iter().all(|&v| v >= 0.0));
            }
        }
    }

    #[test]
    fn test_centre_sample_is_shared_evenly() {
        let delta = [0.1, 0.1, 0.1];
        for kernel in &all_kernels()[1..] {
            let w = kernel.weights(&[0.5, 0.5, 0.5], &delta);
            for v in w {
                assert!((v - 0.125).abs() < 1e-12, "{}: {w:?}", kernel.name());
            }
        }
    }

    #[test]
    fn test_closer_corner_gets_more_weight() {
        let delta = [0.1, 0.1, 0.1];
        for kernel in &all_kernels()[1..] {
            let w = kernel.weights(&[0.2, 0.3, 0.1], &delta);
            assert!(w[0] > w[7], "{}: {w:?}", kernel.name());
        }
    }

    #[test]
    fn test_inverse_corner_hit_takes_full_weight() {
        let w = Splitter::Inverse.weights(&[1.0, 0.0, 1.0], &[0.1, 0.1, 0.1]);
        assert_eq!(w, [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

        // Just off the corner the inverse weights still favour it heavily.
        let w = Splitter::Inverse.weights(&[1.0 - 1e-6, 0.0, 1.0], &[0.1, 0.1, 0.1]);
        assert!(w[5] > 0.99 && w[5] < 1.0, "{w:?}");
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_underflow_falls_back_to_nearest_corner() {
        let w = Splitter::Gaussian { hwhm: 1e-9 }.weights(&[0.9, 0.8, 0.1], &[1.0, 1.0, 1.0]);
        assert_eq!(w[6], 1.0);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Splitter::from_name("", 0.0).unwrap(), Splitter::Nearest);
        assert_eq!(Splitter::from_name("None", 0.0).unwrap(), Splitter::Nearest);
        assert_eq!(Splitter::from_name("inverse", 0.0).unwrap(), Splitter::Inverse);
        assert_eq!(
            Splitter::from_name("gaussian", 0.5).unwrap(),
            Splitter::Gaussian { hwhm: 0.5 }
        );
        assert_eq!(
            Splitter::from_name("negexp", 0.25).unwrap(),
            Splitter::Exponential { hm: 0.25 }
        );
        assert_eq!(
            Splitter::from_name("bilinear", 1.0),
            Err(MapperError::UnknownSplitter("bilinear".to_string()))
        );
        assert_eq!(
            Splitter::from_name("gaussian", 0.0),
            Err(MapperError::InvalidSplitterParameter(0.0))
        );
    }
}
