pub mod activation;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod layers;
pub mod loss;
pub mod math;
pub mod network;
pub mod optim;
pub mod train;

// Convenience re-exports
pub use config::{RunConfig, TrainArgs};
pub use error::{CosalError, Result};
pub use loss::{LossComposer, LossTermSet};
pub use math::Tensor;
pub use network::{CoSalNet, ModelRunner};
pub use optim::OptimizerSchedule;
pub use train::{run_training, CheckpointManager, Trainer, TrainerContext, Validator};
