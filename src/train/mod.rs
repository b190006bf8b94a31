pub mod checkpoint;
pub mod context;
pub mod driver;
pub mod epoch_stats;
pub mod sink;
pub mod trainer;
pub mod validator;

pub use checkpoint::{BestRecord, CheckpointManager, CheckpointRecord, EpochArtifacts};
pub use context::TrainerContext;
pub use driver::{run_training, RunPlan, TrainingReport};
pub use epoch_stats::{AverageMeter, EpochState, EpochStats};
pub use sink::{EpochSummary, FileSink, MemorySink, ProgressRecord, RunEvent, RunSink, ValidationRecord};
pub use trainer::Trainer;
pub use validator::{EvalModeGuard, SetScore, TestSet, Validator};
