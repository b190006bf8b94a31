use serde::Deserialize;

use crate::config::RunConfig;
use crate::error::Result;
use crate::network::ModelRunner;
use crate::optim::adam::Adam;
use crate::optim::optimizer::Optimizer;
use crate::optim::scheduler::StepLr;

const DECAY_GAMMA: f64 = 0.1;

/// An optimizer paired with its per-epoch learning-rate schedule.
pub struct OptimizerSchedule {
    optimizer: Box<dyn Optimizer>,
    scheduler: StepLr,
}

impl OptimizerSchedule {
    pub fn new(optimizer: Box<dyn Optimizer>, decay_step_size: usize) -> OptimizerSchedule {
        let scheduler = StepLr::new(optimizer.base_lr(), decay_step_size, DECAY_GAMMA);
        OptimizerSchedule { optimizer, scheduler }
    }

    /// Adam over both parameter groups with step decay, as configured.
    pub fn from_config(config: &RunConfig) -> OptimizerSchedule {
        let adam = Adam::new(config.lr, config.backbone_lr_scale, config.adam_betas);
        OptimizerSchedule::new(Box::new(adam), config.decay_step_size)
    }

    pub fn zero_grad(&self, model: &mut dyn ModelRunner) {
        for param in model.parameters_mut() {
            param.zero_grad();
        }
    }

    pub fn step(&mut self, model: &mut dyn ModelRunner) -> Result<()> {
        self.optimizer.step(model.parameters_mut())
    }

    /// Advances the schedule by one epoch and applies the new rate.
    pub fn step_epoch(&mut self) -> f64 {
        let lr = self.scheduler.step();
        self.optimizer.set_base_lr(lr);
        lr
    }

    pub fn lr(&self) -> f64 {
        self.optimizer.base_lr()
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    pub fn scheduler(&self) -> &StepLr {
        &self.scheduler
    }

    pub fn optimizer_state(&self) -> Result<serde_json::Value> {
        self.optimizer.state()
    }

    pub fn load_optimizer_state(&mut self, state: &serde_json::Value) -> Result<()> {
        self.optimizer.load_state(state)?;
        self.optimizer.set_base_lr(self.scheduler.current_lr());
        Ok(())
    }

    pub fn scheduler_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.scheduler)?)
    }

    /// Restores the schedule position; the optimizer's rate follows it.
    pub fn load_scheduler_state(&mut self, state: &serde_json::Value) -> Result<()> {
        self.scheduler = StepLr::deserialize(state)?;
        self.optimizer.set_base_lr(self.scheduler.current_lr());
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "{}\nStepLR (step_size: {}, gamma: {})",
            self.optimizer.describe(),
            self.scheduler.step_size,
            self.scheduler.gamma
        )
    }
}
