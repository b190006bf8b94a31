use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ValMetric;
use crate::data::image_io::load_gray;
use crate::error::{CosalError, Result};
use crate::eval::measures::{e_measure_curve, s_measure, E_THRESHOLDS};
use crate::math::Tensor;

/// Scores a directory of predicted maps against a ground-truth directory.
pub trait Evaluator {
    fn evaluate(&self, pred_dir: &Path, gt_dir: &Path, metric: ValMetric) -> Result<f64>;
}

/// Pairs `<pred_dir>/<rel>.png` with `<gt_dir>/<rel>.png` and reports either
/// the mean S-measure or the peak of the mean E-measure curve.
#[derive(Debug, Clone)]
pub struct SaliencyEvaluator {
    pub alpha: f64,
}

impl Default for SaliencyEvaluator {
    fn default() -> Self {
        SaliencyEvaluator { alpha: 0.5 }
    }
}

impl SaliencyEvaluator {
    fn pairs(&self, pred_dir: &Path, gt_dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
        std::fs::metadata(gt_dir)?;
        let mut pairs = Vec::new();
        for entry in WalkDir::new(pred_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| CosalError::Metric(format!("cannot walk {:?}: {}", pred_dir, e)))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let rel = path
                .strip_prefix(pred_dir)
                .map_err(|e| CosalError::Metric(e.to_string()))?;
            let gt = gt_dir.join(rel);
            if !gt.is_file() {
                return Err(CosalError::Metric(format!("no ground truth for prediction {:?}", rel)));
            }
            pairs.push((path.to_path_buf(), gt));
        }
        if pairs.is_empty() {
            return Err(CosalError::Metric(format!("no predictions under {:?}", pred_dir)));
        }
        Ok(pairs)
    }
}

impl Evaluator for SaliencyEvaluator {
    fn evaluate(&self, pred_dir: &Path, gt_dir: &Path, metric: ValMetric) -> Result<f64> {
        let pairs = self.pairs(pred_dir, gt_dir)?;
        let mut s_total = 0.0;
        let mut e_curve = vec![0.0; E_THRESHOLDS];
        for (pred_path, gt_path) in &pairs {
            let (gt, (gh, gw)) = load_gray(gt_path)?;
            let (pred, (ph, pw)) = load_gray(pred_path)?;
            let pred = if (ph, pw) == (gh, gw) {
                pred
            } else {
                Tensor::from_vec(&[1, 1, ph as usize, pw as usize], pred)?
                    .resize_bilinear(gh as usize, gw as usize)?
                    .data
            };
            match metric {
                ValMetric::SMeasure => s_total += s_measure(&pred, &gt, gh as usize, gw as usize, self.alpha),
                ValMetric::EMax => {
                    for (acc, e) in e_curve.iter_mut().zip(e_measure_curve(&pred, &gt)) {
                        *acc += e;
                    }
                }
            }
        }
        let count = pairs.len() as f64;
        let score = match metric {
            ValMetric::SMeasure => s_total / count,
            ValMetric::EMax => e_curve.iter().map(|e| e / count).fold(f64::MIN, f64::max),
        };
        log::debug!("{} over {} maps in {:?}: {:.4}", metric, pairs.len(), pred_dir, score);
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image_io::save_gray_png;

    #[test]
    fn scores_mirrored_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (pred_dir, gt_dir) = (dir.path().join("pred"), dir.path().join("gt"));
        std::fs::create_dir_all(pred_dir.join("cat")).unwrap();
        std::fs::create_dir_all(gt_dir.join("cat")).unwrap();
        let mask: Vec<f64> = (0..16).map(|i| f64::from(i % 4 < 2)).collect();
        save_gray_png(&gt_dir.join("cat/a.png"), &mask, 4, 4).unwrap();
        save_gray_png(&pred_dir.join("cat/a.png"), &mask, 4, 4).unwrap();

        let eval = SaliencyEvaluator::default();
        let s = eval.evaluate(&pred_dir, &gt_dir, ValMetric::SMeasure).unwrap();
        assert!(s > 0.99);
        let e = eval.evaluate(&pred_dir, &gt_dir, ValMetric::EMax).unwrap();
        assert!(e > 0.95);
    }

    #[test]
    fn missing_ground_truth_directory_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let eval = SaliencyEvaluator::default();
        let result = eval.evaluate(dir.path(), &dir.path().join("absent"), ValMetric::SMeasure);
        assert!(matches!(result, Err(CosalError::Io(_))));
    }
}
