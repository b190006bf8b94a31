/// Binary cross-entropy over logits, averaged over every element.
pub struct BceLoss;

impl BceLoss {
    /// Numerically stable form: mean(max(z,0) - z·y + ln(1 + e^(-|z|)))
    pub fn loss(logits: &[f64], targets: &[f64]) -> f64 {
        if logits.is_empty() {
            return 0.0;
        }
        let n = logits.len() as f64;
        logits
            .iter()
            .zip(targets)
            .map(|(z, y)| element(*z, *y))
            .sum::<f64>()
            / n
    }

    /// Gradient w.r.t. the logits: (σ(z) - y) / n
    pub fn derivative(logits: &[f64], targets: &[f64]) -> Vec<f64> {
        let n = logits.len().max(1) as f64;
        logits
            .iter()
            .zip(targets)
            .map(|(z, y)| (crate::math::sigmoid(*z) - y) / n)
            .collect()
    }
}

/// Per-element BCE with logits.
pub(crate) fn element(z: f64, y: f64) -> f64 {
    z.max(0.0) - z * y + (-z.abs()).exp().ln_1p()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_probability_form() {
        let logits = [0.3, -1.2, 2.0];
        let targets = [1.0, 0.0, 0.5];
        let expected = logits
            .iter()
            .zip(&targets)
            .map(|(z, y)| {
                let p = crate::math::sigmoid(*z);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum::<f64>()
            / 3.0;
        assert!((BceLoss::loss(&logits, &targets) - expected).abs() < 1e-12);
    }

    #[test]
    fn derivative_matches_finite_differences() {
        let logits = [0.3, -1.2, 2.0];
        let targets = [1.0, 0.0, 0.5];
        let grad = BceLoss::derivative(&logits, &targets);
        let eps = 1e-6;
        for k in 0..logits.len() {
            let mut plus = logits;
            plus[k] += eps;
            let mut minus = logits;
            minus[k] -= eps;
            let numeric = (BceLoss::loss(&plus, &targets) - BceLoss::loss(&minus, &targets)) / (2.0 * eps);
            assert!((numeric - grad[k]).abs() < 1e-8);
        }
    }
}
