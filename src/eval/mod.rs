pub mod evaluator;
pub mod measures;

pub use evaluator::{Evaluator, SaliencyEvaluator};
