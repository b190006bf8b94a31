use crate::error::{CosalError, Result};
use crate::math::Tensor;

const C1: f64 = 0.01 * 0.01;
const C2: f64 = 0.03 * 0.03;
const ALPHA: f64 = 0.85;

/// Structural consistency between two saliency probability maps:
/// mean over images of `0.85 · (1 - SSIM) / 2 + 0.15 · L1`.
///
/// SSIM is computed over the whole map. `target` is treated as constant;
/// the returned gradient is with respect to `input`.
pub fn structure_consistency(input: &Tensor, target: &Tensor) -> Result<(f64, Tensor)> {
    let (n, c, h, w) = input.dims4()?;
    if input.shape != target.shape {
        return Err(CosalError::Shape(format!(
            "consistency inputs differ: {:?} vs {:?}",
            input.shape, target.shape
        )));
    }
    let plane = c * h * w;
    let count = plane as f64;
    let mut total = 0.0;
    let mut grad = input.zeros_like();

    for i in 0..n {
        let span = i * plane..(i + 1) * plane;
        let v = &input.data[span.clone()];
        let t = &target.data[span.clone()];

        let mu_v = v.iter().sum::<f64>() / count;
        let mu_t = t.iter().sum::<f64>() / count;
        let var_v = v.iter().map(|x| (x - mu_v).powi(2)).sum::<f64>() / count;
        let var_t = t.iter().map(|x| (x - mu_t).powi(2)).sum::<f64>() / count;
        let cov = v.iter().zip(t).map(|(a, b)| (a - mu_v) * (b - mu_t)).sum::<f64>() / count;

        let a1 = 2.0 * mu_t * mu_v + C1;
        let a2 = 2.0 * cov + C2;
        let b1 = mu_t * mu_t + mu_v * mu_v + C1;
        let b2 = var_t + var_v + C2;
        let ssim = (a1 * a2) / (b1 * b2);
        let l1 = v.iter().zip(t).map(|(a, b)| (a - b).abs()).sum::<f64>() / count;
        total += ALPHA * (1.0 - ssim) / 2.0 + (1.0 - ALPHA) * l1;

        for (k, g) in grad.data[span].iter_mut().enumerate() {
            let da1 = 2.0 * mu_t / count;
            let da2 = 2.0 * (t[k] - mu_t) / count;
            let db1 = 2.0 * mu_v / count;
            let db2 = 2.0 * (v[k] - mu_v) / count;
            let dssim = (da1 * a2 + a1 * da2) / (b1 * b2) - ssim * (db1 / b1 + db2 / b2);
            let dl1 = (v[k] - t[k]).signum() * f64::from(v[k] != t[k]) / count;
            *g = (-ALPHA / 2.0 * dssim + (1.0 - ALPHA) * dl1) / n as f64;
        }
    }
    Ok((total / n as f64, grad))
}
