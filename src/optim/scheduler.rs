use serde::{Deserialize, Serialize};

/// Step decay: after every `step_size` epochs the learning rate is
/// multiplied by `gamma`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLr {
    pub step_size: usize,
    pub gamma: f64,
    pub initial_lr: f64,
    /// Epochs completed so far.
    pub last_epoch: usize,
}

impl StepLr {
    pub fn new(initial_lr: f64, step_size: usize, gamma: f64) -> StepLr {
        StepLr {
            step_size,
            gamma,
            initial_lr,
            last_epoch: 0,
        }
    }

    /// Learning rate for the current position in the schedule.
    pub fn current_lr(&self) -> f64 {
        let decays = self.last_epoch / self.step_size.max(1);
        self.initial_lr * self.gamma.powi(decays as i32)
    }

    /// Marks one more epoch done and returns the new learning rate.
    pub fn step(&mut self) -> f64 {
        self.last_epoch += 1;
        self.current_lr()
    }
}
