use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::error::{CosalError, Result};
use crate::network::cosal_net::CoSalNet;
use crate::network::runner::{HeadSet, ModelRunner};

/// Closed set of model architectures the binary can build by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    CoSalNet,
}

impl FromStr for ModelKind {
    type Err = CosalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosalnet" | "co_sal_net" => Ok(ModelKind::CoSalNet),
            other => Err(CosalError::Config(format!("unknown model '{}'; options: cosalnet", other))),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::CoSalNet => write!(f, "CoSalNet"),
        }
    }
}

/// Serializable description of the model to build.
///
/// Kept apart from the weights so the architecture can be recorded in the
/// run log and rebuilt before a checkpoint is loaded into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// Input channels (3 for RGB).
    pub in_channels: usize,
    /// Width of the per-pixel backbone features.
    pub hidden: usize,
    /// Size of the classification heads' output.
    pub num_classes: usize,
    pub heads: HeadSet,
    /// Seed for parameter initialization.
    pub seed: u64,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 || self.hidden == 0 {
            return Err(CosalError::Config("in_channels and hidden must be > 0".to_string()));
        }
        if (self.heads.cls || self.heads.cls_mask) && self.num_classes < 2 {
            return Err(CosalError::Config(
                "classification heads need num_classes >= 2".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Box<dyn ModelRunner>> {
        self.validate()?;
        match self.kind {
            ModelKind::CoSalNet => Ok(Box::new(CoSalNet::new(self.clone()))),
        }
    }
}
