use crate::error::{CosalError, Result};
use crate::math::Tensor;

/// Softmax cross-entropy over `[N, classes]` logits against integer labels,
/// averaged over the batch.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn loss(logits: &Tensor, labels: &[usize]) -> Result<f64> {
        let (n, classes) = check(logits, labels)?;
        let mut total = 0.0;
        for (i, &label) in labels.iter().enumerate() {
            let row = &logits.data[i * classes..(i + 1) * classes];
            total += log_sum_exp(row) - row[label];
        }
        Ok(total / n as f64)
    }

    /// Combined softmax + cross-entropy gradient: (softmax(z) - onehot) / N
    pub fn derivative(logits: &Tensor, labels: &[usize]) -> Result<Tensor> {
        let (n, classes) = check(logits, labels)?;
        let mut grad = logits.zeros_like();
        for (i, &label) in labels.iter().enumerate() {
            let row = &logits.data[i * classes..(i + 1) * classes];
            let lse = log_sum_exp(row);
            let out = &mut grad.data[i * classes..(i + 1) * classes];
            for (g, z) in out.iter_mut().zip(row) {
                *g = (z - lse).exp() / n as f64;
            }
            out[label] -= 1.0 / n as f64;
        }
        Ok(grad)
    }
}

fn log_sum_exp(row: &[f64]) -> f64 {
    let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    max + row.iter().map(|z| (z - max).exp()).sum::<f64>().ln()
}

fn check(logits: &Tensor, labels: &[usize]) -> Result<(usize, usize)> {
    let (n, classes) = match logits.shape.as_slice() {
        [n, c] => (*n, *c),
        _ => {
            return Err(CosalError::Shape(format!(
                "class logits must be [N, classes], got {:?}",
                logits.shape
            )))
        }
    };
    if labels.len() != n || n == 0 {
        return Err(CosalError::Shape(format!(
            "{} labels for {} class predictions",
            labels.len(),
            n
        )));
    }
    if let Some(bad) = labels.iter().find(|&&l| l >= classes) {
        return Err(CosalError::Data(format!(
            "class label {} out of range for {} classes",
            bad, classes
        )));
    }
    Ok((n, classes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_logits_give_log_classes() {
        let logits = Tensor::zeros(&[2, 4]);
        let loss = CrossEntropyLoss::loss(&logits, &[0, 3]).unwrap();
        assert!((loss - 4f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn gradient_rows_sum_to_zero() {
        let logits = Tensor::from_vec(&[2, 3], vec![0.5, -0.1, 2.0, 1.0, 1.0, -3.0]).unwrap();
        let grad = CrossEntropyLoss::derivative(&logits, &[2, 0]).unwrap();
        for row in grad.data.chunks(3) {
            assert!(row.iter().sum::<f64>().abs() < 1e-12);
        }
        assert!(grad.data[2] < 0.0);
    }

    #[test]
    fn label_out_of_range_is_a_data_error() {
        let logits = Tensor::zeros(&[1, 3]);
        assert!(matches!(
            CrossEntropyLoss::loss(&logits, &[3]),
            Err(CosalError::Data(_))
        ));
    }
}
