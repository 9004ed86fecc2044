//! Bicubic upsampling of detector images before splatting.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::Array2;

use crate::error::MapperError;

/// Resample `image` by `factor` with a Catmull-Rom (bicubic) kernel.
///
/// The output has `round(rows·factor) × round(cols·factor)` pixels sampling
/// the same intensity field, so values keep their scale. Float images are
/// resampled on the `[0, 1]` range, so the data is scaled by its maximum for
/// the round trip; negative values come back as zero.
pub fn upsample_image(image: &Array2<f64>, factor: f64) -> Result<Array2<f64>, MapperError> {
    if !(factor >= 1.0 && factor.is_finite()) {
        return Err(MapperError::InvalidUpsample(factor));
    }
    let (rows, cols) = image.dim();
    let peak = image.iter().copied().fold(0.0_f64, f64::max);
    if peak <= 0.0 || rows == 0 || cols == 0 {
        let new_rows = (rows as f64 * factor).round() as usize;
        let new_cols = (cols as f64 * factor).round() as usize;
        return Ok(Array2::zeros((new_rows, new_cols)));
    }

    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([(image[[y as usize, x as usize]] / peak) as f32])
        });
    let new_w = (cols as f64 * factor).round() as u32;
    let new_h = (rows as f64 * factor).round() as u32;
    let resized = imageops::resize(&buffer, new_w, new_h, FilterType::CatmullRom);

    Ok(Array2::from_shape_fn(
        (new_h as usize, new_w as usize),
        |(y, x)| resized.get_pixel(x as u32, y as u32).0[0] as f64 * peak,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsample_shape_and_level() {
        let image = Array2::from_shape_fn((20, 30), |(y, x)| {
            let dx = x as f64 - 15.0;
            let dy = y as f64 - 10.0;
            100.0 * (-(dx * dx + dy * dy) / 40.0).exp()
        });
        let up = upsample_image(&image, 2.0).unwrap();
        assert_eq!(up.dim(), (40, 60));
        let before = image.mean().unwrap();
        let after = up.mean().unwrap();
        assert!(
            (before - after).abs() / before < 0.02,
            "mean intensity changed from {before} to {after}"
        );
        let peak = up.iter().copied().fold(0.0_f64, f64::max);
        assert!((peak - 100.0).abs() < 2.0, "peak {peak}");
    }

    #[test]
    fn test_flat_image_stays_flat() {
        let image = Array2::from_elem((6, 9), 5.0);
        let up = upsample_image(&image, 3.0).unwrap();
        assert_eq!(up.dim(), (18, 27));
        assert!(up.iter().all(|v| (v - 5.0).abs() < 1e-5), "{up:?}");
    }

    #[test]
    fn test_factor_one_keeps_values() {
        let image = Array2::from_shape_fn((8, 8), |(y, x)| (x + y) as f64);
        let same = upsample_image(&image, 1.0).unwrap();
        for (a, b) in image.iter().zip(same.iter()) {
            assert!((a - b).abs() < 1e-4 * 14.0, "{a} vs {b}");
        }
    }

    #[test]
    fn test_rejects_downsampling() {
        let image = Array2::<f64>::zeros((4, 4));
        assert_eq!(
            upsample_image(&image, 0.5),
            Err(MapperError::InvalidUpsample(0.5))
        );
    }
}
