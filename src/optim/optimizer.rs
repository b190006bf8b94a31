use crate::network::{ParamGroup, Parameter};
use crate::error::Result;

/// Parameter-update rule.
///
/// Learning rates are per group: the backbone group runs at
/// `base_lr * backbone_scale`. Parameters with `trainable == false` are never
/// touched by `step`.
pub trait Optimizer {
    fn name(&self) -> &'static str;

    /// Applies one update from the accumulated gradients.
    fn step(&mut self, params: Vec<&mut Parameter>) -> Result<()>;

    fn base_lr(&self) -> f64;

    fn set_base_lr(&mut self, lr: f64);

    fn backbone_scale(&self) -> f64;

    fn lr_for(&self, group: ParamGroup) -> f64 {
        match group {
            ParamGroup::Base => self.base_lr(),
            ParamGroup::Backbone => self.base_lr() * self.backbone_scale(),
        }
    }

    fn state(&self) -> Result<serde_json::Value>;

    fn load_state(&mut self, state: &serde_json::Value) -> Result<()>;

    fn describe(&self) -> String {
        format!(
            "{} (lr: {}, backbone lr: {})",
            self.name(),
            self.lr_for(ParamGroup::Base),
            self.lr_for(ParamGroup::Backbone)
        )
    }
}
