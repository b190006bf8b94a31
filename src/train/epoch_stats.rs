use serde::{Deserialize, Serialize};

/// Running value and sample-weighted average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageMeter {
    pub val: f64,
    pub sum: f64,
    pub count: usize,
}

impl AverageMeter {
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Mutable state of the epoch in progress.
#[derive(Debug, Clone, Default)]
pub struct EpochState {
    pub epoch: usize,
    pub loss: AverageMeter,
    pub iterations: usize,
}

impl EpochState {
    pub fn new(epoch: usize) -> EpochState {
        EpochState { epoch, ..EpochState::default() }
    }
}

/// Per-epoch statistics collected by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochStats {
    /// 0-based epoch index.
    pub epoch: usize,
    pub total_epochs: usize,
    /// Sample-weighted mean training loss.
    pub train_loss: f64,
    /// Governing validation metric, when validation ran.
    pub val_metric: Option<f64>,
    /// Learning rate after the epoch's schedule step.
    pub lr: f64,
    /// Wall-clock duration of the epoch in milliseconds.
    pub elapsed_ms: u64,
}
