use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CosalError;

/// Selects the per-scale loss the deep-supervision saliency term uses.
///
/// - `Iou`: soft IoU on sigmoid probabilities; the default.
/// - `Bce`: binary cross-entropy on the logits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaliencyLossKind {
    Iou,
    Bce,
}

impl FromStr for SaliencyLossKind {
    type Err = CosalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iou" => Ok(SaliencyLossKind::Iou),
            "bce" => Ok(SaliencyLossKind::Bce),
            other => Err(CosalError::Config(format!(
                "unknown saliency loss '{}'; options: iou, bce",
                other
            ))),
        }
    }
}

impl fmt::Display for SaliencyLossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaliencyLossKind::Iou => write!(f, "iou"),
            SaliencyLossKind::Bce => write!(f, "bce"),
        }
    }
}
