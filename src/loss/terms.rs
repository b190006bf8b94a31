use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CosalError, Result};
use crate::math::Tensor;
use crate::network::{HeadSet, ModelOutputs};

/// One loss term the composer can evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermName {
    Sal,
    Cls,
    Contrast,
    ClsMask,
}

impl TermName {
    pub fn id(&self) -> &'static str {
        match self {
            TermName::Sal => "sal",
            TermName::Cls => "cls",
            TermName::Contrast => "contrast",
            TermName::ClsMask => "cls_mask",
        }
    }

    /// Name used in progress lines.
    pub fn label(&self) -> &'static str {
        match self {
            TermName::Sal => "loss_sal",
            TermName::Cls => "loss_cls",
            TermName::Contrast => "loss_contrast",
            TermName::ClsMask => "loss_cls_mask",
        }
    }

    fn from_id(id: &str) -> Option<TermName> {
        match id {
            "sal" => Some(TermName::Sal),
            "cls" => Some(TermName::Cls),
            "contrast" => Some(TermName::Contrast),
            "cls_mask" => Some(TermName::ClsMask),
            _ => None,
        }
    }
}

impl fmt::Display for TermName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The supported combinations of loss terms. Anything else is rejected by
/// [`LossTermSet::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LossTermSet {
    Sal,
    SalCls,
    SalContrast,
    SalClsMask,
    SalClsContrast,
    SalClsClsMask,
    SalClsContrastClsMask,
}

impl LossTermSet {
    pub const ALL: [LossTermSet; 7] = [
        LossTermSet::Sal,
        LossTermSet::SalCls,
        LossTermSet::SalContrast,
        LossTermSet::SalClsMask,
        LossTermSet::SalClsContrast,
        LossTermSet::SalClsClsMask,
        LossTermSet::SalClsContrastClsMask,
    ];

    /// Active terms in evaluation and logging order.
    pub fn terms(&self) -> &'static [TermName] {
        use TermName::*;
        match self {
            LossTermSet::Sal => &[Sal],
            LossTermSet::SalCls => &[Sal, Cls],
            LossTermSet::SalContrast => &[Sal, Contrast],
            LossTermSet::SalClsMask => &[Sal, ClsMask],
            LossTermSet::SalClsContrast => &[Sal, Cls, Contrast],
            LossTermSet::SalClsClsMask => &[Sal, Cls, ClsMask],
            LossTermSet::SalClsContrastClsMask => &[Sal, Cls, ClsMask, Contrast],
        }
    }

    pub fn contains(&self, term: TermName) -> bool {
        self.terms().contains(&term)
    }

    /// Auxiliary heads the model must produce for this combination.
    pub fn heads(&self) -> HeadSet {
        HeadSet {
            cls: self.contains(TermName::Cls),
            contrast: self.contains(TermName::Contrast),
            cls_mask: self.contains(TermName::ClsMask),
        }
    }

    /// Canonical `+`-joined identifier, e.g. `sal+cls+contrast`.
    pub fn id(&self) -> String {
        let mut names: Vec<TermName> = self.terms().to_vec();
        names.sort();
        names.iter().map(TermName::id).collect::<Vec<_>>().join("+")
    }

    /// Parses a `+`-joined term list. Order and repetition do not matter;
    /// the resulting set must equal one of the supported combinations.
    pub fn parse(s: &str) -> Result<LossTermSet> {
        let mut wanted = BTreeSet::new();
        for part in s.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            let term = TermName::from_id(part).ok_or_else(|| {
                CosalError::Config(format!("unknown loss term '{}' in '{}'", part, s))
            })?;
            wanted.insert(term);
        }
        LossTermSet::ALL
            .into_iter()
            .find(|set| set.terms().iter().copied().collect::<BTreeSet<_>>() == wanted)
            .ok_or_else(|| CosalError::Config(format!("unsupported loss term combination '{}'", s)))
    }

    /// Like [`LossTermSet::parse`], but in lenient mode an unsupported value
    /// falls back to saliency only with a warning.
    pub fn resolve(s: &str, strict: bool) -> Result<LossTermSet> {
        match LossTermSet::parse(s) {
            Ok(set) => Ok(set),
            Err(err) if strict => Err(err),
            Err(err) => {
                log::warn!("{}; training with 'sal' only", err);
                Ok(LossTermSet::Sal)
            }
        }
    }

    /// Picks the outputs this combination consumes, failing when the model
    /// did not produce a head the combination needs.
    pub fn select<'a>(&self, outputs: &'a ModelOutputs) -> Result<SelectedOutputs<'a>> {
        let heads = self.heads();
        let missing = |what: &str| CosalError::Shape(format!("loss '{}' needs {} output", self.id(), what));
        if outputs.scaled_preds.is_empty() {
            return Err(missing("saliency"));
        }
        Ok(SelectedOutputs {
            scaled_preds: &outputs.scaled_preds,
            cls: match heads.cls {
                true => Some(outputs.pred_cls.as_ref().ok_or_else(|| missing("class"))?),
                false => None,
            },
            contrast: match heads.contrast {
                true => Some(outputs.pred_contrast.as_ref().ok_or_else(|| missing("contrast"))?),
                false => None,
            },
            cls_masks: match heads.cls_mask {
                true => Some(outputs.pred_cls_masks.as_deref().ok_or_else(|| missing("class-mask"))?),
                false => None,
            },
        })
    }
}

impl fmt::Display for LossTermSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl TryFrom<String> for LossTermSet {
    type Error = CosalError;

    fn try_from(value: String) -> Result<Self> {
        LossTermSet::parse(&value)
    }
}

impl From<LossTermSet> for String {
    fn from(set: LossTermSet) -> String {
        set.id()
    }
}

/// The model outputs one term combination reads.
#[derive(Debug, Clone, Copy)]
pub struct SelectedOutputs<'a> {
    pub scaled_preds: &'a [Tensor],
    pub cls: Option<&'a Tensor>,
    pub contrast: Option<&'a Tensor>,
    pub cls_masks: Option<&'a [Tensor]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_order_and_repeats() {
        assert_eq!(LossTermSet::parse("cls+sal").unwrap(), LossTermSet::SalCls);
        assert_eq!(
            LossTermSet::parse("cls_mask+contrast+sal+cls+sal").unwrap(),
            LossTermSet::SalClsContrastClsMask
        );
        for set in LossTermSet::ALL {
            assert_eq!(LossTermSet::parse(&set.id()).unwrap(), set);
        }
    }

    #[test]
    fn unsupported_sets_are_rejected() {
        assert!(LossTermSet::parse("cls").is_err());
        assert!(LossTermSet::parse("sal+contrast+cls_mask").is_err());
        assert!(LossTermSet::parse("sal+edge").is_err());
        assert_eq!(LossTermSet::resolve("sal+edge", false).unwrap(), LossTermSet::Sal);
        assert!(LossTermSet::resolve("sal+edge", true).is_err());
    }

    #[test]
    fn serde_uses_the_identifier() {
        let json = serde_json::to_string(&LossTermSet::SalClsContrast).unwrap();
        assert_eq!(json, "\"sal+cls+contrast\"");
        let back: LossTermSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LossTermSet::SalClsContrast);
        assert!(serde_json::from_str::<LossTermSet>("\"cls\"").is_err());
    }

    #[test]
    fn select_requires_the_needed_heads() {
        let outputs = ModelOutputs {
            scaled_preds: vec![Tensor::zeros(&[1, 1, 2, 2])],
            pred_cls: None,
            pred_contrast: None,
            pred_cls_masks: None,
        };
        assert!(LossTermSet::Sal.select(&outputs).is_ok());
        assert!(LossTermSet::SalCls.select(&outputs).is_err());
    }
}
