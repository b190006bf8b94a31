use serde::{Deserialize, Serialize};

use crate::error::{CosalError, Result};
use crate::math::Tensor;
use crate::network::parameter::{ParamGroup, Parameter, StateDict};

/// Auxiliary heads a model should produce in addition to the saliency maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadSet {
    pub cls: bool,
    pub contrast: bool,
    pub cls_mask: bool,
}

/// Everything a forward pass produces.
///
/// `scaled_preds` are saliency logits ordered coarse to fine; the last entry is
/// the full-resolution prediction. `pred_contrast` covers twice the batch: the
/// real group followed by the same group with its consensus removed.
#[derive(Debug, Clone)]
pub struct ModelOutputs {
    pub scaled_preds: Vec<Tensor>,
    pub pred_cls: Option<Tensor>,
    pub pred_contrast: Option<Tensor>,
    pub pred_cls_masks: Option<Vec<Tensor>>,
}

impl ModelOutputs {
    pub fn finest(&self) -> Result<&Tensor> {
        self.scaled_preds
            .last()
            .ok_or_else(|| CosalError::Shape("model produced no saliency maps".into()))
    }
}

/// Loss gradients with respect to each model output. `None` means the output
/// did not contribute to the loss.
#[derive(Debug, Clone)]
pub struct OutputGrads {
    pub scaled_preds: Vec<Option<Tensor>>,
    pub pred_cls: Option<Tensor>,
    pub pred_contrast: Option<Tensor>,
    pub pred_cls_masks: Vec<Option<Tensor>>,
}

impl OutputGrads {
    pub fn for_outputs(outputs: &ModelOutputs) -> OutputGrads {
        OutputGrads {
            scaled_preds: vec![None; outputs.scaled_preds.len()],
            pred_cls: None,
            pred_contrast: None,
            pred_cls_masks: vec![None; outputs.pred_cls_masks.as_ref().map_or(0, Vec::len)],
        }
    }

    pub fn add_scaled_pred(&mut self, index: usize, grad: &Tensor) -> Result<()> {
        let slot = self.scaled_preds.get_mut(index).ok_or_else(|| {
            CosalError::Shape(format!("no saliency output at index {}", index))
        })?;
        accumulate(slot, grad)
    }

    pub fn add_cls(&mut self, grad: &Tensor) -> Result<()> {
        accumulate(&mut self.pred_cls, grad)
    }

    pub fn add_contrast(&mut self, grad: &Tensor) -> Result<()> {
        accumulate(&mut self.pred_contrast, grad)
    }

    pub fn add_cls_mask(&mut self, index: usize, grad: &Tensor) -> Result<()> {
        let slot = self.pred_cls_masks.get_mut(index).ok_or_else(|| {
            CosalError::Shape(format!("no class-mask output at index {}", index))
        })?;
        accumulate(slot, grad)
    }
}

fn accumulate(slot: &mut Option<Tensor>, grad: &Tensor) -> Result<()> {
    match slot {
        Some(existing) => existing.add_assign(grad),
        None => {
            *slot = Some(grad.clone());
            Ok(())
        }
    }
}

/// The trainable model as seen by the training engine.
///
/// `forward` records whatever the following `backward` needs; `predict` runs
/// without touching that record. Gradients accumulate into
/// [`Parameter::grad`] until the optimizer zeroes them.
pub trait ModelRunner {
    fn forward(&mut self, images: &Tensor) -> Result<ModelOutputs>;

    fn predict(&self, images: &Tensor) -> Result<ModelOutputs>;

    fn backward(&mut self, grads: &OutputGrads) -> Result<()>;

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    /// Human-readable architecture summary for the run log.
    fn describe(&self) -> String;

    fn state(&self) -> StateDict {
        StateDict::from_parameters(self.parameters())
    }

    fn load_state(&mut self, state: &StateDict) -> Result<()> {
        state.apply_to(self.parameters_mut())
    }

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.value.len()).sum()
    }

    /// Marks every backbone parameter whose name does not contain `keep` as
    /// non-trainable. Returns how many parameters were frozen.
    fn freeze_backbone(&mut self, keep: &str) -> usize {
        let mut frozen = 0;
        for param in self.parameters_mut() {
            if param.group == ParamGroup::Backbone && !param.name.contains(keep) {
                param.trainable = false;
                frozen += 1;
            }
        }
        frozen
    }
}
