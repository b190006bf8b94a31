use crate::loss::bce;
use crate::math::sigmoid;

/// Binary focal loss over logits: mean((1 - p_t)^γ · BCE), γ = 2.
pub struct FocalLoss;

const GAMMA: f64 = 2.0;

impl FocalLoss {
    pub fn loss(logits: &[f64], targets: &[f64]) -> f64 {
        if logits.is_empty() {
            return 0.0;
        }
        let n = logits.len() as f64;
        logits
            .iter()
            .zip(targets)
            .map(|(z, y)| {
                let ce = bce::element(*z, *y);
                let pt = (-ce).exp();
                (1.0 - pt).powf(GAMMA) * ce
            })
            .sum::<f64>()
            / n
    }

    /// d/dz of the mean focal loss, with log p_t = -BCE and
    /// d(log p_t)/dz = y - σ(z).
    pub fn derivative(logits: &[f64], targets: &[f64]) -> Vec<f64> {
        let n = logits.len().max(1) as f64;
        logits
            .iter()
            .zip(targets)
            .map(|(z, y)| {
                let log_pt = -bce::element(*z, *y);
                let pt = log_pt.exp();
                let dlog_pt = y - sigmoid(*z);
                let modulator = (1.0 - pt).powf(GAMMA);
                let dmodulator = -GAMMA * (1.0 - pt).powf(GAMMA - 1.0) * pt * dlog_pt;
                (dmodulator * -log_pt - modulator * dlog_pt) / n
            })
            .collect()
    }
}
