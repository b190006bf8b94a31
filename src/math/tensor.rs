use serde::{Deserialize, Serialize};

use crate::error::{CosalError, Result};

/// Dense row-major tensor of `f64` values.
///
/// Image batches use the `N×C×H×W` layout. Loaders may add a leading grouping
/// axis (`1×N×C×H×W`) that the trainer squeezes away before the forward pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor::full(shape, 0.0)
    }

    pub fn full(shape: &[usize], value: f64) -> Tensor {
        Tensor {
            shape: shape.to_vec(),
            data: vec![value; shape.iter().product()],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Tensor> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(CosalError::Shape(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Tensor { shape: shape.to_vec(), data })
    }

    pub fn zeros_like(&self) -> Tensor {
        Tensor::zeros(&self.shape)
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns `(n, c, h, w)` for a rank-4 tensor.
    pub fn dims4(&self) -> Result<(usize, usize, usize, usize)> {
        match self.shape.as_slice() {
            &[n, c, h, w] => Ok((n, c, h, w)),
            other => Err(CosalError::Shape(format!("expected rank-4 tensor, got {:?}", other))),
        }
    }

    /// Removes axis `axis`, which must have length 1.
    pub fn squeeze(mut self, axis: usize) -> Result<Tensor> {
        match self.shape.get(axis) {
            Some(1) => {
                self.shape.remove(axis);
                Ok(self)
            }
            _ => Err(CosalError::Shape(format!(
                "cannot squeeze axis {} of shape {:?}",
                axis, self.shape
            ))),
        }
    }

    /// Concatenates tensors along the leading (batch) axis.
    pub fn cat_batch(parts: &[&Tensor]) -> Result<Tensor> {
        let first = parts
            .first()
            .ok_or_else(|| CosalError::Shape("cannot concatenate zero tensors".into()))?;
        let tail = &first.shape[1..];
        let mut lead = 0;
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.numel()).sum());
        for part in parts {
            if part.shape.is_empty() || &part.shape[1..] != tail {
                return Err(CosalError::Shape(format!(
                    "cannot concatenate {:?} with {:?}",
                    part.shape, first.shape
                )));
            }
            lead += part.shape[0];
            data.extend_from_slice(&part.data);
        }
        let mut shape = vec![lead];
        shape.extend_from_slice(tail);
        Ok(Tensor { shape, data })
    }

    /// Samples `[start, start + len)` of the leading axis.
    pub fn narrow_batch(&self, start: usize, len: usize) -> Result<Tensor> {
        let lead = *self.shape.first().unwrap_or(&0);
        if start + len > lead {
            return Err(CosalError::Shape(format!(
                "narrow {}..{} out of range for leading axis {}",
                start,
                start + len,
                lead
            )));
        }
        let stride: usize = self.shape[1..].iter().product();
        let mut shape = self.shape.clone();
        shape[0] = len;
        Ok(Tensor {
            shape,
            data: self.data[start * stride..(start + len) * stride].to_vec(),
        })
    }

    pub fn map<F>(&self, functor: F) -> Tensor
    where
        F: Fn(f64) -> f64,
    {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    pub fn zip_map<F>(&self, other: &Tensor, functor: F) -> Result<Tensor>
    where
        F: Fn(f64, f64) -> f64,
    {
        self.check_same_shape(other)?;
        Ok(Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().zip(&other.data).map(|(&a, &b)| functor(a, b)).collect(),
        })
    }

    pub fn add_assign(&mut self, other: &Tensor) -> Result<()> {
        self.check_same_shape(other)?;
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    pub fn scale(&self, factor: f64) -> Tensor {
        self.map(|x| x * factor)
    }

    pub fn sigmoid(&self) -> Tensor {
        self.map(sigmoid)
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            0.0
        } else {
            self.sum() / self.data.len() as f64
        }
    }

    /// Bilinear resize of the two spatial axes with corner alignment.
    pub fn resize_bilinear(&self, out_h: usize, out_w: usize) -> Result<Tensor> {
        let (n, c, h, w) = self.dims4()?;
        let rows = bilinear_taps(out_h, h);
        let cols = bilinear_taps(out_w, w);
        let mut out = Tensor::zeros(&[n, c, out_h, out_w]);
        for plane in 0..n * c {
            let src = &self.data[plane * h * w..(plane + 1) * h * w];
            let dst = &mut out.data[plane * out_h * out_w..(plane + 1) * out_h * out_w];
            for (oi, &(i0, i1, fy)) in rows.iter().enumerate() {
                for (oj, &(j0, j1, fx)) in cols.iter().enumerate() {
                    let top = src[i0 * w + j0] * (1.0 - fx) + src[i0 * w + j1] * fx;
                    let bottom = src[i1 * w + j0] * (1.0 - fx) + src[i1 * w + j1] * fx;
                    dst[oi * out_w + oj] = top * (1.0 - fy) + bottom * fy;
                }
            }
        }
        Ok(out)
    }

    /// Adjoint of [`Tensor::resize_bilinear`]: scatters an output-space gradient
    /// back onto an `in_h × in_w` input grid.
    pub fn resize_bilinear_adjoint(&self, in_h: usize, in_w: usize) -> Result<Tensor> {
        let (n, c, out_h, out_w) = self.dims4()?;
        let rows = bilinear_taps(out_h, in_h);
        let cols = bilinear_taps(out_w, in_w);
        let mut grad = Tensor::zeros(&[n, c, in_h, in_w]);
        for plane in 0..n * c {
            let src = &self.data[plane * out_h * out_w..(plane + 1) * out_h * out_w];
            let dst = &mut grad.data[plane * in_h * in_w..(plane + 1) * in_h * in_w];
            for (oi, &(i0, i1, fy)) in rows.iter().enumerate() {
                for (oj, &(j0, j1, fx)) in cols.iter().enumerate() {
                    let g = src[oi * out_w + oj];
                    dst[i0 * in_w + j0] += g * (1.0 - fy) * (1.0 - fx);
                    dst[i0 * in_w + j1] += g * (1.0 - fy) * fx;
                    dst[i1 * in_w + j0] += g * fy * (1.0 - fx);
                    dst[i1 * in_w + j1] += g * fy * fx;
                }
            }
        }
        Ok(grad)
    }

    /// Adaptive average pooling of the spatial axes.
    pub fn adaptive_avg_pool(&self, out_h: usize, out_w: usize) -> Result<Tensor> {
        let (n, c, h, w) = self.dims4()?;
        let rows = pool_windows(out_h, h);
        let cols = pool_windows(out_w, w);
        let mut out = Tensor::zeros(&[n, c, out_h, out_w]);
        for plane in 0..n * c {
            let src = &self.data[plane * h * w..(plane + 1) * h * w];
            for (oi, &(r0, r1)) in rows.iter().enumerate() {
                for (oj, &(c0, c1)) in cols.iter().enumerate() {
                    let mut acc = 0.0;
                    for i in r0..r1 {
                        for j in c0..c1 {
                            acc += src[i * w + j];
                        }
                    }
                    out.data[plane * out_h * out_w + oi * out_w + oj] =
                        acc / ((r1 - r0) * (c1 - c0)) as f64;
                }
            }
        }
        Ok(out)
    }

    /// Adjoint of [`Tensor::adaptive_avg_pool`].
    pub fn adaptive_avg_pool_adjoint(&self, in_h: usize, in_w: usize) -> Result<Tensor> {
        let (n, c, out_h, out_w) = self.dims4()?;
        let rows = pool_windows(out_h, in_h);
        let cols = pool_windows(out_w, in_w);
        let mut grad = Tensor::zeros(&[n, c, in_h, in_w]);
        for plane in 0..n * c {
            let dst = &mut grad.data[plane * in_h * in_w..(plane + 1) * in_h * in_w];
            for (oi, &(r0, r1)) in rows.iter().enumerate() {
                for (oj, &(c0, c1)) in cols.iter().enumerate() {
                    let g = self.data[plane * out_h * out_w + oi * out_w + oj]
                        / ((r1 - r0) * (c1 - c0)) as f64;
                    for i in r0..r1 {
                        for j in c0..c1 {
                            dst[i * in_w + j] += g;
                        }
                    }
                }
            }
        }
        Ok(grad)
    }

    fn check_same_shape(&self, other: &Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(CosalError::Shape(format!(
                "shape mismatch: {:?} vs {:?}",
                self.shape, other.shape
            )));
        }
        Ok(())
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Source taps `(lo, hi, frac)` for each output index, corners aligned.
fn bilinear_taps(out_len: usize, in_len: usize) -> Vec<(usize, usize, f64)> {
    (0..out_len)
        .map(|o| {
            let src = if out_len > 1 && in_len > 1 {
                o as f64 * (in_len - 1) as f64 / (out_len - 1) as f64
            } else {
                0.0
            };
            let lo = (src.floor() as usize).min(in_len.saturating_sub(1));
            let hi = (lo + 1).min(in_len.saturating_sub(1));
            (lo, hi, src - lo as f64)
        })
        .collect()
}

/// Half-open input windows `[start, end)` for each adaptive-pool output cell.
fn pool_windows(out_len: usize, in_len: usize) -> Vec<(usize, usize)> {
    (0..out_len)
        .map(|o| {
            let start = o * in_len / out_len;
            let end = ((o + 1) * in_len).div_ceil(out_len);
            (start, end.max(start + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squeeze_removes_grouping_axis() {
        let t = Tensor::zeros(&[1, 3, 2, 4, 4]);
        let s = t.squeeze(0).unwrap();
        assert_eq!(s.shape, vec![3, 2, 4, 4]);
        assert!(Tensor::zeros(&[2, 3]).squeeze(0).is_err());
    }

    #[test]
    fn cat_batch_stacks_leading_axis() {
        let a = Tensor::full(&[2, 1, 2, 2], 1.0);
        let b = Tensor::zeros(&[2, 1, 2, 2]);
        let c = Tensor::cat_batch(&[&a, &b]).unwrap();
        assert_eq!(c.shape, vec![4, 1, 2, 2]);
        assert_eq!(c.sum(), 8.0);
        assert!(Tensor::cat_batch(&[&a, &Tensor::zeros(&[1, 1, 3, 2])]).is_err());
    }

    #[test]
    fn bilinear_keeps_corners_and_constants() {
        let t = Tensor::from_vec(&[1, 1, 2, 2], vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let up = t.resize_bilinear(3, 3).unwrap();
        assert_eq!(up.data[0], 0.0);
        assert_eq!(up.data[2], 1.0);
        assert_eq!(up.data[6], 2.0);
        assert_eq!(up.data[8], 3.0);
        assert!((up.data[4] - 1.5).abs() < 1e-12);

        let flat = Tensor::full(&[1, 1, 5, 7], 0.25).resize_bilinear(2, 3).unwrap();
        assert!(flat.data.iter().all(|v| (v - 0.25).abs() < 1e-12));
    }

    #[test]
    fn bilinear_adjoint_matches_inner_product() {
        // <R x, y> == <x, R^T y>
        let x = Tensor::from_vec(&[1, 1, 3, 4], (0..12).map(|v| v as f64 * 0.3 - 1.0).collect())
            .unwrap();
        let y = Tensor::from_vec(&[1, 1, 5, 2], (0..10).map(|v| (v as f64).sin()).collect())
            .unwrap();
        let lhs: f64 = x.resize_bilinear(5, 2).unwrap().data.iter().zip(&y.data).map(|(a, b)| a * b).sum();
        let rhs: f64 = x.data.iter().zip(&y.resize_bilinear_adjoint(3, 4).unwrap().data).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-9);
    }

    #[test]
    fn adaptive_pool_adjoint_matches_inner_product() {
        let x = Tensor::from_vec(&[1, 1, 5, 6], (0..30).map(|v| (v as f64).cos()).collect())
            .unwrap();
        let y = Tensor::from_vec(&[1, 1, 2, 3], vec![0.5, -1.0, 2.0, 0.1, 0.3, -0.7]).unwrap();
        let lhs: f64 = x.adaptive_avg_pool(2, 3).unwrap().data.iter().zip(&y.data).map(|(a, b)| a * b).sum();
        let rhs: f64 = x.data.iter().zip(&y.adaptive_avg_pool_adjoint(5, 6).unwrap().data).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-9);
    }

    #[test]
    fn narrow_batch_selects_samples() {
        let t = Tensor::from_vec(&[3, 1, 1, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let mid = t.narrow_batch(1, 1).unwrap();
        assert_eq!(mid.data, vec![3.0, 4.0]);
        assert!(t.narrow_batch(2, 2).is_err());
    }
}
