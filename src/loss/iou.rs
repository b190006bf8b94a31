use crate::error::Result;
use crate::math::Tensor;

const EPS: f64 = 1e-12;

/// Soft IoU loss over probability maps: mean over images of
/// `1 - Σpg / (Σp + Σg - Σpg)`.
pub struct IouLoss;

impl IouLoss {
    pub fn loss(pred: &Tensor, gt: &Tensor) -> Result<f64> {
        let (n, plane) = planes(pred, gt)?;
        let mut total = 0.0;
        for i in 0..n {
            let (inter, union) = sums(&pred.data[i * plane..(i + 1) * plane], &gt.data[i * plane..(i + 1) * plane]);
            total += 1.0 - inter / (union + EPS);
        }
        Ok(total / n as f64)
    }

    /// Gradient w.r.t. the probabilities:
    /// ∂/∂p_k = -(g_k·U - I·(1 - g_k)) / (U²·N)
    pub fn derivative(pred: &Tensor, gt: &Tensor) -> Result<Tensor> {
        let (n, plane) = planes(pred, gt)?;
        let mut grad = pred.zeros_like();
        for i in 0..n {
            let span = i * plane..(i + 1) * plane;
            let (inter, union) = sums(&pred.data[span.clone()], &gt.data[span.clone()]);
            let denom = (union + EPS).powi(2) * n as f64;
            for (d, g) in grad.data[span.clone()].iter_mut().zip(&gt.data[span]) {
                *d = -(g * (union + EPS) - inter * (1.0 - g)) / denom;
            }
        }
        Ok(grad)
    }
}

fn planes(pred: &Tensor, gt: &Tensor) -> Result<(usize, usize)> {
    let (n, c, h, w) = pred.dims4()?;
    if pred.shape != gt.shape {
        return Err(crate::error::CosalError::Shape(format!(
            "prediction {:?} does not match ground truth {:?}",
            pred.shape, gt.shape
        )));
    }
    Ok((n, c * h * w))
}

fn sums(pred: &[f64], gt: &[f64]) -> (f64, f64) {
    let inter: f64 = pred.iter().zip(gt).map(|(p, g)| p * g).sum();
    let union = pred.iter().sum::<f64>() + gt.iter().sum::<f64>() - inter;
    (inter, union)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_overlap_is_zero() {
        let gt = Tensor::from_vec(&[1, 1, 2, 2], vec![1.0, 0.0, 1.0, 0.0]).unwrap();
        assert!(IouLoss::loss(&gt, &gt).unwrap().abs() < 1e-9);
        let empty = Tensor::zeros(&[1, 1, 2, 2]);
        assert!((IouLoss::loss(&empty, &gt).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn derivative_matches_finite_differences() {
        let pred = Tensor::from_vec(&[2, 1, 1, 3], vec![0.2, 0.7, 0.5, 0.9, 0.1, 0.4]).unwrap();
        let gt = Tensor::from_vec(&[2, 1, 1, 3], vec![0.0, 1.0, 1.0, 1.0, 0.0, 0.5]).unwrap();
        let grad = IouLoss::derivative(&pred, &gt).unwrap();
        let eps = 1e-6;
        for k in 0..pred.numel() {
            let mut plus = pred.clone();
            plus.data[k] += eps;
            let mut minus = pred.clone();
            minus.data[k] -= eps;
            let numeric = (IouLoss::loss(&plus, &gt).unwrap() - IouLoss::loss(&minus, &gt).unwrap()) / (2.0 * eps);
            assert!((numeric - grad.data[k]).abs() < 1e-7);
        }
    }
}
