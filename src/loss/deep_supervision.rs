use crate::error::{CosalError, Result};
use crate::loss::bce::BceLoss;
use crate::loss::iou::IouLoss;
use crate::loss::loss_type::SaliencyLossKind;
use crate::math::Tensor;

const SMOOTHING: f64 = 0.001;

/// Deep-supervision saliency loss: every scale is upsampled to the
/// ground-truth size and scored, and the per-scale losses are summed.
#[derive(Debug, Clone, Copy)]
pub struct DsLoss {
    pub kind: SaliencyLossKind,
}

impl DsLoss {
    pub fn new(kind: SaliencyLossKind) -> DsLoss {
        DsLoss { kind }
    }

    /// Returns the summed loss and, for each scale, the gradient with respect
    /// to that scale's logits at its own resolution.
    pub fn evaluate(&self, preds: &[&Tensor], gt: &Tensor) -> Result<(f64, Vec<Tensor>)> {
        let (_, _, gh, gw) = gt.dims4()?;
        let mut total = 0.0;
        let mut grads = Vec::with_capacity(preds.len());
        for pred in preds {
            let (n, _, h, w) = pred.dims4()?;
            if n != gt.shape[0] {
                return Err(CosalError::Shape(format!(
                    "{} saliency maps for {} ground-truth masks",
                    n, gt.shape[0]
                )));
            }
            let logits = pred.resize_bilinear(gh, gw)?;
            let dlogits = match self.kind {
                SaliencyLossKind::Iou => {
                    let probs = logits.sigmoid();
                    total += IouLoss::loss(&probs, gt)?;
                    let dprobs = IouLoss::derivative(&probs, gt)?;
                    dprobs.zip_map(&probs, |d, p| d * p * (1.0 - p))?
                }
                SaliencyLossKind::Bce => {
                    if logits.shape != gt.shape {
                        return Err(CosalError::Shape(format!(
                            "prediction {:?} does not match ground truth {:?}",
                            logits.shape, gt.shape
                        )));
                    }
                    total += BceLoss::loss(&logits.data, &gt.data);
                    Tensor::from_vec(&logits.shape, BceLoss::derivative(&logits.data, &gt.data))?
                }
            };
            grads.push(dlogits.resize_bilinear_adjoint(h, w)?);
        }
        Ok((total, grads))
    }
}

/// Softened ground truth: `gt · (1 - ε) + ε / 2` with ε = 0.001.
pub fn smoothed_gt(gt: &Tensor) -> Tensor {
    gt.map(|g| g * (1.0 - SMOOTHING) + SMOOTHING / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Tensor, Tensor, Tensor) {
        let coarse = Tensor::from_vec(&[1, 1, 2, 2], vec![0.5, -0.5, 1.0, -1.0]).unwrap();
        let fine = Tensor::from_vec(&[1, 1, 3, 3], (0..9).map(|i| (i as f64 - 4.0) * 0.3).collect()).unwrap();
        let gt = Tensor::from_vec(&[1, 1, 3, 3], vec![1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        (coarse, fine, gt)
    }

    #[test]
    fn gradients_match_finite_differences() {
        for kind in [SaliencyLossKind::Iou, SaliencyLossKind::Bce] {
            let ds = DsLoss::new(kind);
            let (coarse, fine, gt) = fixture();
            let (_, grads) = ds.evaluate(&[&coarse, &fine], &gt).unwrap();
            let eps = 1e-6;
            for k in 0..coarse.numel() {
                let mut plus = coarse.clone();
                plus.data[k] += eps;
                let mut minus = coarse.clone();
                minus.data[k] -= eps;
                let lp = ds.evaluate(&[&plus, &fine], &gt).unwrap().0;
                let lm = ds.evaluate(&[&minus, &fine], &gt).unwrap().0;
                let numeric = (lp - lm) / (2.0 * eps);
                assert!((numeric - grads[0].data[k]).abs() < 1e-7, "{:?} k={}", kind, k);
            }
            assert_eq!(grads[1].shape, fine.shape);
        }
    }

    #[test]
    fn smoothing_pulls_targets_off_the_extremes() {
        let gt = Tensor::from_vec(&[1, 1, 1, 2], vec![0.0, 1.0]).unwrap();
        let smooth = smoothed_gt(&gt);
        assert!((smooth.data[0] - 0.0005).abs() < 1e-12);
        assert!((smooth.data[1] - 0.9995).abs() < 1e-12);
    }
}
