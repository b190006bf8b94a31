pub mod args;
pub mod datasets;
pub mod run_config;

pub use args::TrainArgs;
pub use datasets::{testset_dirs, TrainSet};
pub use run_config::{MetricDirection, RunConfig, ValMetric};
