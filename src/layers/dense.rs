use rand::rngs::StdRng;
use rand::Rng;
use std::f64::consts::PI;

use crate::activation::ActivationFunction;
use crate::network::parameter::{ParamGroup, Parameter};

/// Initial bias of ReLU units.
pub const RELU_BIAS_INIT: f64 = 0.01;

/// Dense layer applied independently at every pixel (a 1×1 convolution).
///
/// Weights are stored row-major as `[out_dim][in_dim]`.
#[derive(Debug, Clone)]
pub struct Layer {
    pub in_dim: usize,
    pub out_dim: usize,
    pub weight: Parameter,
    pub bias: Parameter,
    pub activator: ActivationFunction,
}

impl Layer {
    /// He initialization before ReLU, Xavier otherwise. ReLU biases start at
    /// [`RELU_BIAS_INIT`] so a pixel whose inputs are all zero never sits on
    /// the kink; other biases start at zero.
    pub fn new(
        name: &str,
        group: ParamGroup,
        in_dim: usize,
        out_dim: usize,
        activation: ActivationFunction,
        rng: &mut StdRng,
    ) -> Layer {
        let gain = match activation {
            ActivationFunction::ReLU => 2.0,
            _ => 1.0,
        };
        let std_dev = (gain / in_dim.max(1) as f64).sqrt();
        let bias = match activation {
            ActivationFunction::ReLU => RELU_BIAS_INIT,
            _ => 0.0,
        };
        let weight = (0..in_dim * out_dim)
            .map(|_| sample_standard_normal(rng) * std_dev)
            .collect();

        Layer {
            in_dim,
            out_dim,
            weight: Parameter::new(format!("{name}.weight"), group, weight),
            bias: Parameter::new(format!("{name}.bias"), group, vec![bias; out_dim]),
            activator: activation,
        }
    }

    /// Writes `z = W x + b` into `pre` and `σ(z)` into `post`.
    pub fn feed_from(&self, input: &[f64], pre: &mut [f64], post: &mut [f64]) {
        for o in 0..self.out_dim {
            let row = &self.weight.value[o * self.in_dim..(o + 1) * self.in_dim];
            let z = row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + self.bias.value[o];
            pre[o] = z;
            post[o] = self.activator.function(z);
        }
    }

    /// Accumulates parameter gradients for one pixel and adds `∂L/∂input`
    /// into `d_input`. `d_out` is the gradient in activation space.
    pub fn backward(&mut self, d_out: &[f64], pre: &[f64], input: &[f64], d_input: &mut [f64]) {
        for o in 0..self.out_dim {
            let delta = d_out[o] * self.activator.derivative(pre[o]);
            if delta == 0.0 {
                continue;
            }
            self.bias.grad[o] += delta;
            let base = o * self.in_dim;
            for i in 0..self.in_dim {
                self.weight.grad[base + i] += delta * input[i];
                d_input[i] += self.weight.value[base + i] * delta;
            }
        }
    }

    pub fn parameters(&self) -> [&Parameter; 2] {
        [&self.weight, &self.bias]
    }

    pub fn parameters_mut(&mut self) -> [&mut Parameter; 2] {
        [&mut self.weight, &mut self.bias]
    }
}

/// Samples N(0, 1) with the Box-Muller transform.
fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = 1.0 - rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = Layer::new("l", ParamGroup::Base, 3, 2, ActivationFunction::Sigmoid, &mut rng);
        let input = [0.2, -0.4, 0.9];
        // L = sum(post)
        let loss = |layer: &Layer| {
            let (mut pre, mut post) = ([0.0; 2], [0.0; 2]);
            layer.feed_from(&input, &mut pre, &mut post);
            post.iter().sum::<f64>()
        };

        let (mut pre, mut post) = ([0.0; 2], [0.0; 2]);
        layer.feed_from(&input, &mut pre, &mut post);
        let mut d_input = [0.0; 3];
        layer.backward(&[1.0, 1.0], &pre, &input, &mut d_input);

        let eps = 1e-6;
        for k in 0..layer.weight.value.len() {
            let mut plus = layer.clone();
            plus.weight.value[k] += eps;
            let mut minus = layer.clone();
            minus.weight.value[k] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!((numeric - layer.weight.grad[k]).abs() < 1e-6);
        }
        assert!(d_input.iter().any(|g| *g != 0.0));
    }

    #[test]
    fn same_seed_gives_same_weights() {
        let a = Layer::new("l", ParamGroup::Base, 4, 4, ActivationFunction::ReLU, &mut StdRng::seed_from_u64(9));
        let b = Layer::new("l", ParamGroup::Base, 4, 4, ActivationFunction::ReLU, &mut StdRng::seed_from_u64(9));
        assert_eq!(a.weight.value, b.weight.value);
        assert_eq!(a.weight.name, "l.weight");
    }

    #[test]
    fn relu_bias_starts_off_the_kink() {
        let mut rng = StdRng::seed_from_u64(1);
        let relu = Layer::new("r", ParamGroup::Base, 3, 2, ActivationFunction::ReLU, &mut rng);
        assert!(relu.bias.value.iter().all(|b| *b == RELU_BIAS_INIT));
        // A zero input still lands strictly inside the active region.
        let (mut pre, mut post) = ([0.0; 2], [0.0; 2]);
        relu.feed_from(&[0.0; 3], &mut pre, &mut post);
        assert!(pre.iter().all(|z| *z > 0.0));

        let linear = Layer::new("l", ParamGroup::Base, 3, 2, ActivationFunction::Identity, &mut rng);
        assert!(linear.bias.value.iter().all(|b| *b == 0.0));
    }
}
