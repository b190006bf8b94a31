use serde::Serialize;

use crate::config::RunConfig;
use crate::error::{CosalError, Result};
use crate::loss::consistency::structure_consistency;
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::loss::deep_supervision::{smoothed_gt, DsLoss};
use crate::loss::focal::FocalLoss;
use crate::loss::terms::{LossTermSet, SelectedOutputs, TermName};
use crate::math::Tensor;
use crate::network::{ModelOutputs, ModelRunner, OutputGrads};

/// Scale of the self-supervision consistency penalty inside the saliency term.
const SELF_SUPERVISION_WEIGHT: f64 = 0.3;
/// At most this many of the finest saliency maps are supervised.
const MAX_SAL_LAYERS: usize = 4;
/// Spatial downsampling of the self-supervision re-run.
const SELF_SUPERVISION_FACTOR: usize = 4;

/// Ground truth for one training batch.
#[derive(Debug, Clone, Copy)]
pub struct Targets<'a> {
    /// `[N, 1, H, W]` masks in [0, 1].
    pub gts: &'a Tensor,
    /// `gts` followed by an all-zero companion of the same shape.
    pub gts_cat: &'a Tensor,
    pub labels: &'a [usize],
}

/// One weighted term of the total loss. `value` already includes `weight`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossTerm {
    pub name: TermName,
    pub weight: f64,
    pub value: f64,
}

/// Result of one composition: the scalar total, its breakdown, and the
/// gradient of the total with respect to every model output.
#[derive(Debug, Clone)]
pub struct ComposedLoss {
    pub total: f64,
    pub terms: Vec<LossTerm>,
    pub grads: OutputGrads,
}

impl ComposedLoss {
    pub fn term(&self, name: TermName) -> Option<&LossTerm> {
        self.terms.iter().find(|t| t.name == name)
    }
}

/// Combines the active loss terms into one scalar per batch.
#[derive(Debug, Clone)]
pub struct LossComposer {
    terms: LossTermSet,
    ds: DsLoss,
    sal_layers: usize,
    lambda_sal: f64,
    lambda_cls: f64,
    lambda_contrast: f64,
    lambda_cls_mask: f64,
    label_smoothing: bool,
    self_supervision: bool,
}

impl LossComposer {
    pub fn from_config(config: &RunConfig) -> LossComposer {
        LossComposer {
            terms: config.loss,
            ds: DsLoss::new(config.saliency_loss),
            sal_layers: config.loss_sal_last_layers.min(MAX_SAL_LAYERS),
            lambda_sal: config.lambda_sal,
            lambda_cls: config.lambda_cls,
            lambda_contrast: config.lambda_contrast,
            lambda_cls_mask: config.lambda_cls_mask,
            label_smoothing: config.label_smoothing,
            self_supervision: config.self_supervision,
        }
    }

    /// Evaluates every active term. `model` is only consulted for the
    /// self-supervision re-run, which does not record gradients.
    pub fn compose(
        &self,
        model: &dyn ModelRunner,
        images: &Tensor,
        outputs: &ModelOutputs,
        targets: &Targets<'_>,
    ) -> Result<ComposedLoss> {
        let selected = self.terms.select(outputs)?;
        let mut grads = OutputGrads::for_outputs(outputs);
        let mut terms = Vec::with_capacity(self.terms.terms().len());

        for &name in self.terms.terms() {
            let (weight, value) = match name {
                TermName::Sal => (self.lambda_sal, self.saliency(model, images, &selected, targets, &mut grads)?),
                TermName::Cls => (self.lambda_cls, self.classification(&selected, targets, &mut grads)?),
                TermName::ClsMask => (self.lambda_cls_mask, self.class_masks(&selected, targets, &mut grads)?),
                TermName::Contrast => (self.lambda_contrast, self.contrast(&selected, targets, &mut grads)?),
            };
            terms.push(LossTerm { name, weight, value });
        }

        let total = terms.iter().map(|t| t.value).sum();
        Ok(ComposedLoss { total, terms, grads })
    }

    fn saliency(
        &self,
        model: &dyn ModelRunner,
        images: &Tensor,
        selected: &SelectedOutputs<'_>,
        targets: &Targets<'_>,
        grads: &mut OutputGrads,
    ) -> Result<f64> {
        let all = selected.scaled_preds;
        let offset = all.len().saturating_sub(self.sal_layers);
        let preds: Vec<&Tensor> = all[offset..].iter().collect();

        let (mut loss, mut scale_grads) = self.ds.evaluate(&preds, targets.gts)?;
        if self.label_smoothing {
            let (smooth_loss, smooth_grads) = self.ds.evaluate(&preds, &smoothed_gt(targets.gts))?;
            loss = 0.5 * (loss + smooth_loss);
            for (g, s) in scale_grads.iter_mut().zip(&smooth_grads) {
                *g = g.zip_map(s, |a, b| 0.5 * (a + b))?;
            }
        }
        for (i, g) in scale_grads.iter().enumerate() {
            grads.add_scaled_pred(offset + i, &g.scale(self.lambda_sal))?;
        }

        if self.self_supervision {
            let finest_index = all.len() - 1;
            let (ss_loss, ss_grad) = self.self_supervision_term(model, images, &all[finest_index])?;
            loss += SELF_SUPERVISION_WEIGHT * ss_loss;
            grads.add_scaled_pred(finest_index, &ss_grad.scale(SELF_SUPERVISION_WEIGHT * self.lambda_sal))?;
        }
        Ok(loss * self.lambda_sal)
    }

    /// Consistency between the prediction for a 4× downsampled input and the
    /// downsampled full-resolution prediction.
    fn self_supervision_term(&self, model: &dyn ModelRunner, images: &Tensor, finest: &Tensor) -> Result<(f64, Tensor)> {
        let (_, _, h, w) = images.dims4()?;
        let (lh, lw) = ((h / SELF_SUPERVISION_FACTOR).max(1), (w / SELF_SUPERVISION_FACTOR).max(1));
        let low_res = model.predict(&images.resize_bilinear(lh, lw)?)?;
        let low_pred = low_res.finest()?.resize_bilinear(lh, lw)?.sigmoid();

        let (_, _, fh, fw) = finest.dims4()?;
        let down = finest.resize_bilinear(lh, lw)?.sigmoid();
        let (value, dprob) = structure_consistency(&down, &low_pred)?;
        let dlogits = dprob.zip_map(&down, |d, p| d * p * (1.0 - p))?;
        Ok((value, dlogits.resize_bilinear_adjoint(fh, fw)?))
    }

    fn classification(&self, selected: &SelectedOutputs<'_>, targets: &Targets<'_>, grads: &mut OutputGrads) -> Result<f64> {
        let logits = selected.cls.ok_or_else(|| CosalError::Shape("missing class output".into()))?;
        let loss = CrossEntropyLoss::loss(logits, targets.labels)?;
        grads.add_cls(&CrossEntropyLoss::derivative(logits, targets.labels)?.scale(self.lambda_cls))?;
        Ok(loss * self.lambda_cls)
    }

    fn class_masks(&self, selected: &SelectedOutputs<'_>, targets: &Targets<'_>, grads: &mut OutputGrads) -> Result<f64> {
        let masks = selected
            .cls_masks
            .ok_or_else(|| CosalError::Shape("missing class-mask output".into()))?;
        let mut loss = 0.0;
        for (i, logits) in masks.iter().enumerate() {
            loss += CrossEntropyLoss::loss(logits, targets.labels)? * self.lambda_cls_mask;
            grads.add_cls_mask(i, &CrossEntropyLoss::derivative(logits, targets.labels)?.scale(self.lambda_cls_mask))?;
        }
        Ok(loss)
    }

    fn contrast(&self, selected: &SelectedOutputs<'_>, targets: &Targets<'_>, grads: &mut OutputGrads) -> Result<f64> {
        let logits = selected
            .contrast
            .ok_or_else(|| CosalError::Shape("missing contrast output".into()))?;
        if logits.shape != targets.gts_cat.shape {
            return Err(CosalError::Shape(format!(
                "contrast prediction {:?} does not match targets {:?}",
                logits.shape, targets.gts_cat.shape
            )));
        }
        let loss = FocalLoss::loss(&logits.data, &targets.gts_cat.data);
        let grad = FocalLoss::derivative(&logits.data, &targets.gts_cat.data);
        grads.add_contrast(&Tensor::from_vec(&logits.shape, grad)?.scale(self.lambda_contrast))?;
        Ok(loss * self.lambda_contrast)
    }
}
