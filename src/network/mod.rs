pub mod cosal_net;
pub mod parameter;
pub mod runner;
pub mod spec;

pub use cosal_net::CoSalNet;
pub use parameter::{ParamGroup, Parameter, StateDict};
pub use runner::{HeadSet, ModelOutputs, ModelRunner, OutputGrads};
pub use spec::{ModelConfig, ModelKind};
