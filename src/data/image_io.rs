use std::path::Path;

use image::imageops::FilterType;

use crate::error::{CosalError, Result};

/// ImageNet channel statistics.
const MEAN: [f64; 3] = [0.485, 0.456, 0.406];
const STD: [f64; 3] = [0.229, 0.224, 0.225];

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Loads an RGB image, resizes it to `size × size` and normalizes it with
/// ImageNet statistics. Returns CHW values and the original `(height, width)`.
pub fn load_rgb(path: &Path, size: u32) -> Result<(Vec<f64>, (u32, u32))> {
    let img = image::open(path)?;
    let orig = (img.height(), img.width());
    let rgb = img.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let plane = (size * size) as usize;
    let mut chw = vec![0.0; 3 * plane];
    for (i, px) in rgb.pixels().enumerate() {
        for c in 0..3 {
            chw[c * plane + i] = (px.0[c] as f64 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    Ok((chw, orig))
}

/// Loads a grayscale mask resized to `size × size`, values in [0, 1].
pub fn load_mask(path: &Path, size: u32) -> Result<Vec<f64>> {
    let img = image::open(path)?;
    let gray = img.resize_exact(size, size, FilterType::Triangle).to_luma8();
    Ok(gray.pixels().map(|p| p.0[0] as f64 / 255.0).collect())
}

/// Loads a grayscale map at its stored resolution. Returns values in
/// [0, 1] with `(height, width)`.
pub fn load_gray(path: &Path) -> Result<(Vec<f64>, (u32, u32))> {
    let gray = image::open(path)?.to_luma8();
    let dims = (gray.height(), gray.width());
    Ok((gray.pixels().map(|p| p.0[0] as f64 / 255.0).collect(), dims))
}

/// Writes a `[0, 1]` map of `height × width` values as an 8-bit PNG.
pub fn save_gray_png(path: &Path, values: &[f64], height: u32, width: u32) -> Result<()> {
    let bytes: Vec<u8> = values
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    let img = image::GrayImage::from_raw(width, height, bytes).ok_or_else(|| {
        CosalError::Shape(format!(
            "{} values do not fill a {}x{} image",
            values.len(),
            width,
            height
        ))
    })?;
    img.save(path)?;
    Ok(())
}
