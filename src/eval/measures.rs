//! Per-image saliency measures on `[0, 1]` maps of equal size.

const EPS: f64 = 1e-20;
/// Thresholds swept by the enhanced-alignment curve.
pub const E_THRESHOLDS: usize = 255;

/// Structure measure with object/region balance `alpha`.
/// The ground truth is binarized at 0.5.
pub fn s_measure(pred: &[f64], gt: &[f64], h: usize, w: usize, alpha: f64) -> f64 {
    let mask: Vec<bool> = gt.iter().map(|g| *g > 0.5).collect();
    let y = mask.iter().filter(|m| **m).count() as f64 / mask.len().max(1) as f64;
    let score = if y == 0.0 {
        1.0 - mean(pred)
    } else if y == 1.0 {
        mean(pred)
    } else {
        alpha * object_score(pred, &mask, y) + (1.0 - alpha) * region_score(pred, &mask, h, w)
    };
    score.max(0.0)
}

/// Enhanced-alignment curve over [`E_THRESHOLDS`] binarization thresholds.
pub fn e_measure_curve(pred: &[f64], gt: &[f64]) -> Vec<f64> {
    let n = gt.len();
    let gt_mean = mean(gt);
    (0..E_THRESHOLDS)
        .map(|i| {
            let t = i as f64 * (1.0 - 1e-10) / (E_THRESHOLDS - 1) as f64;
            let binary: Vec<f64> = pred.iter().map(|p| f64::from(*p >= t)).collect();
            let enhanced: f64 = if gt_mean == 0.0 {
                binary.iter().map(|b| 1.0 - b).sum()
            } else if gt_mean == 1.0 {
                binary.iter().sum()
            } else {
                let b_mean = mean(&binary);
                binary
                    .iter()
                    .zip(gt)
                    .map(|(b, g)| {
                        let fm = b - b_mean;
                        let gm = g - gt_mean;
                        let align = 2.0 * gm * fm / (gm * gm + fm * fm + EPS);
                        (align + 1.0).powi(2) / 4.0
                    })
                    .sum()
            };
            enhanced / (n as f64 - 1.0 + EPS)
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn object_score(pred: &[f64], mask: &[bool], y: f64) -> f64 {
    let fg: Vec<f64> = pred.iter().zip(mask).filter(|(_, m)| **m).map(|(p, _)| *p).collect();
    let bg: Vec<f64> = pred.iter().zip(mask).filter(|(_, m)| !**m).map(|(p, _)| 1.0 - p).collect();
    y * object(&fg) + (1.0 - y) * object(&bg)
}

fn object(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let x = mean(values);
    let sigma = if values.len() > 1 {
        (values.iter().map(|v| (v - x).powi(2)).sum::<f64>() / (values.len() - 1) as f64).sqrt()
    } else {
        0.0
    };
    2.0 * x / (x * x + 1.0 + sigma + EPS)
}

fn region_score(pred: &[f64], mask: &[bool], h: usize, w: usize) -> f64 {
    let (cx, cy) = centroid(mask, h, w);
    let area = (h * w) as f64;
    let quadrants = [
        (0, cy, 0, cx),
        (0, cy, cx, w),
        (cy, h, 0, cx),
        (cy, h, cx, w),
    ];
    let mut score = 0.0;
    for (r0, r1, c0, c1) in quadrants {
        let weight = ((r1 - r0) * (c1 - c0)) as f64 / area;
        if weight == 0.0 {
            continue;
        }
        let mut p = Vec::with_capacity((r1 - r0) * (c1 - c0));
        let mut g = Vec::with_capacity(p.capacity());
        for r in r0..r1 {
            for c in c0..c1 {
                p.push(pred[r * w + c]);
                g.push(if mask[r * w + c] { 1.0 } else { 0.0 });
            }
        }
        score += weight * ssim(&p, &g);
    }
    score
}

/// Centroid of the mask as 1-based `(column, row)` split points.
fn centroid(mask: &[bool], h: usize, w: usize) -> (usize, usize) {
    let (mut sx, mut sy, mut count) = (0.0, 0.0, 0.0);
    for (i, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
        sy += (i / w) as f64;
        sx += (i % w) as f64;
        count += 1.0;
    }
    let (x, y) = if count == 0.0 {
        ((w as f64 / 2.0).round(), (h as f64 / 2.0).round())
    } else {
        ((sx / count).round(), (sy / count).round())
    };
    ((x as usize + 1).min(w), (y as usize + 1).min(h))
}

fn ssim(pred: &[f64], gt: &[f64]) -> f64 {
    let n = pred.len() as f64;
    let x = mean(pred);
    let y = mean(gt);
    let denom = (n - 1.0).max(1.0);
    let sigma_x = pred.iter().map(|p| (p - x).powi(2)).sum::<f64>() / denom;
    let sigma_y = gt.iter().map(|g| (g - y).powi(2)).sum::<f64>() / denom;
    let sigma_xy = pred.iter().zip(gt).map(|(p, g)| (p - x) * (g - y)).sum::<f64>() / denom;
    let alpha = 4.0 * x * y * sigma_xy;
    let beta = (x * x + y * y) * (sigma_x + sigma_y);
    if alpha != 0.0 {
        alpha / (beta + EPS)
    } else if beta == 0.0 {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask() -> Vec<f64> {
        (0..36).map(|i| f64::from((1..4).contains(&(i / 6)) && (1..4).contains(&(i % 6)))).collect()
    }

    #[test]
    fn perfect_prediction_scores_one() {
        let gt = square_mask();
        assert!((s_measure(&gt, &gt, 6, 6, 0.5) - 1.0).abs() < 1e-6);
        let curve = e_measure_curve(&gt, &gt);
        assert_eq!(curve.len(), E_THRESHOLDS);
        let best = curve.iter().cloned().fold(f64::MIN, f64::max);
        assert!(best > 1.0 - 0.05);
    }

    #[test]
    fn inverted_prediction_scores_low() {
        let gt = square_mask();
        let inverted: Vec<f64> = gt.iter().map(|g| 1.0 - g).collect();
        assert!(s_measure(&inverted, &gt, 6, 6, 0.5) < 0.2);
    }

    #[test]
    fn empty_ground_truth_rewards_empty_prediction() {
        let gt = vec![0.0; 16];
        assert_eq!(s_measure(&vec![0.0; 16], &gt, 4, 4, 0.5), 1.0);
        assert_eq!(s_measure(&vec![1.0; 16], &gt, 4, 4, 0.5), 0.0);
    }
}
