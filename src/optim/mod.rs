pub mod adam;
pub mod optimizer;
pub mod schedule;
pub mod scheduler;
pub mod sgd;

pub use adam::Adam;
pub use optimizer::Optimizer;
pub use schedule::OptimizerSchedule;
pub use scheduler::StepLr;
pub use sgd::Sgd;
