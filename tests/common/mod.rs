#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use cosal_train::config::RunConfig;
use cosal_train::data::Batch;
use cosal_train::math::Tensor;

/// Small, deterministic run configuration for end-to-end tests.
pub fn small_config(epochs: usize) -> RunConfig {
    RunConfig {
        hidden: 4,
        num_classes: 3,
        epochs,
        batch_size: 4,
        size: 8,
        log_interval: 1,
        val_last: 1,
        decay_step_size: 2,
        lr: 1e-2,
        rand_seed: Some(3),
        ..RunConfig::default()
    }
}

/// A group of `n` synthetic 8×8 images with a square foreground.
pub fn synthetic_batch(n: usize, seed: usize, label: usize) -> Batch {
    let s = 8;
    let images = (0..n * 3 * s * s)
        .map(|i| {
            let pixel = i % (s * s);
            let inside = (2..6).contains(&(pixel / s)) && (2..6).contains(&(pixel % s));
            let base = if inside { 1.0 } else { -1.0 };
            base + 0.1 * (((i + seed) as f64) * 0.37).sin()
        })
        .collect();
    let gts = (0..n * s * s)
        .map(|i| {
            let pixel = i % (s * s);
            f64::from((2..6).contains(&(pixel / s)) && (2..6).contains(&(pixel % s)))
        })
        .collect();
    Batch {
        images: Tensor::from_vec(&[1, n, 3, s, s], images).unwrap(),
        gts: Tensor::from_vec(&[1, n, 1, s, s], gts).unwrap(),
        labels: vec![label; n],
        orig_sizes: vec![(s as u32, s as u32); n],
        subpaths: (0..n).map(|i| PathBuf::from(format!("group{}/{}.png", label, i))).collect(),
    }
}

/// Writes `<root>/images/<set>/<group>/<stem>.png` and the matching masks
/// under `<root>/gts/<set>/`, one image per `(group, stem, width, height)`.
pub fn write_image_set(root: &Path, set: &str, items: &[(&str, &str, u32, u32)]) -> (PathBuf, PathBuf) {
    let img_root = root.join("images").join(set);
    let gt_root = root.join("gts").join(set);
    for &(group, stem, width, height) in items {
        fs::create_dir_all(img_root.join(group)).unwrap();
        fs::create_dir_all(gt_root.join(group)).unwrap();
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            if x < width / 2 {
                image::Rgb([220, 40, 40])
            } else {
                image::Rgb([(y * 20 % 255) as u8, 90, 200])
            }
        });
        img.save(img_root.join(group).join(format!("{}.png", stem))).unwrap();
        let gt = image::GrayImage::from_fn(width, height, |x, _| image::Luma([if x < width / 2 { 255 } else { 0 }]));
        gt.save(gt_root.join(group).join(format!("{}.png", stem))).unwrap();
    }
    (img_root, gt_root)
}
