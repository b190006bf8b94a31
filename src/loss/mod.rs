pub mod bce;
pub mod composer;
pub mod consistency;
pub mod cross_entropy;
pub mod deep_supervision;
pub mod focal;
pub mod iou;
pub mod loss_type;
pub mod terms;

pub use bce::BceLoss;
pub use composer::{ComposedLoss, LossComposer, LossTerm, Targets};
pub use cross_entropy::CrossEntropyLoss;
pub use deep_supervision::{smoothed_gt, DsLoss};
pub use focal::FocalLoss;
pub use iou::IouLoss;
pub use loss_type::SaliencyLossKind;
pub use terms::{LossTermSet, SelectedOutputs, TermName};
