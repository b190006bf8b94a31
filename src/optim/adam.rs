use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CosalError, Result};
use crate::network::Parameter;
use crate::optim::optimizer::Optimizer;

const EPS: f64 = 1e-8;

/// First and second moment estimates of one parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Moments {
    pub step: u64,
    pub m: Vec<f64>,
    pub v: Vec<f64>,
}

/// Adam with bias correction and no weight decay. Moments are keyed by
/// parameter name so they survive a checkpoint round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub backbone_scale: f64,
    pub betas: (f64, f64),
    pub moments: BTreeMap<String, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f64, backbone_scale: f64, betas: (f64, f64)) -> Adam {
        Adam {
            learning_rate,
            backbone_scale,
            betas,
            moments: BTreeMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "Adam"
    }

    fn step(&mut self, params: Vec<&mut Parameter>) -> Result<()> {
        let (b1, b2) = self.betas;
        for param in params.into_iter().filter(|p| p.trainable) {
            let lr = self.lr_for(param.group);
            let len = param.value.len();
            let state = self.moments.entry(param.name.clone()).or_insert_with(|| Moments {
                step: 0,
                m: vec![0.0; len],
                v: vec![0.0; len],
            });
            if state.m.len() != len || state.v.len() != len {
                return Err(CosalError::Checkpoint(format!(
                    "optimizer state for '{}' has {} entries, parameter has {}",
                    param.name,
                    state.m.len(),
                    len
                )));
            }
            state.step += 1;
            let bias1 = 1.0 - b1.powi(state.step as i32);
            let bias2 = 1.0 - b2.powi(state.step as i32);
            for i in 0..len {
                let g = param.grad[i];
                state.m[i] = b1 * state.m[i] + (1.0 - b1) * g;
                state.v[i] = b2 * state.v[i] + (1.0 - b2) * g * g;
                let m_hat = state.m[i] / bias1;
                let v_hat = state.v[i] / bias2;
                param.value[i] -= lr * m_hat / (v_hat.sqrt() + EPS);
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
        *self = Adam::deserialize(state)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "Adam (lr: {}, backbone lr: {}, betas: ({}, {}), eps: {})",
            self.learning_rate,
            self.learning_rate * self.backbone_scale,
            self.betas.0,
            self.betas.1,
            EPS
        )
    }
}
