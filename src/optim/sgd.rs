use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::network::Parameter;
use crate::optim::optimizer::Optimizer;

/// Plain gradient descent: `w -= lr · ∂L/∂w`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sgd {
    pub learning_rate: f64,
    pub backbone_scale: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64, backbone_scale: f64) -> Sgd {
        Sgd { learning_rate, backbone_scale }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "SGD"
    }

    fn step(&mut self, params: Vec<&mut Parameter>) -> Result<()> {
        for param in params.into_iter().filter(|p| p.trainable) {
            let lr = self.lr_for(param.group);
            for (w, g) in param.value.iter_mut().zip(&param.grad) {
                *w -= lr * g;
            }
        }
        Ok(())
    }

    fn base_lr(&self) -> f64 {
        self.learning_rate
    }

    fn set_base_lr(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn backbone_scale(&self) -> f64 {
        self.backbone_scale
    }

    fn state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state(&mut self, state: &serde_json::Value) -> Result<()> {
        *self = Sgd::deserialize(state)?;
        Ok(())
    }
}
