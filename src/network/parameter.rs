use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CosalError, Result};

/// Optimizer group a parameter belongs to. The backbone group trains with a
/// scaled-down learning rate and can be frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamGroup {
    Base,
    Backbone,
}

/// One named, trainable buffer together with its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub group: ParamGroup,
    pub value: Vec<f64>,
    pub grad: Vec<f64>,
    pub trainable: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, group: ParamGroup, value: Vec<f64>) -> Parameter {
        let grad = vec![0.0; value.len()];
        Parameter {
            name: name.into(),
            group,
            value,
            grad,
            trainable: true,
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.iter_mut().for_each(|g| *g = 0.0);
    }
}

/// Name-keyed parameter snapshot, serialized as the `state_dict` field of
/// checkpoint files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDict(pub BTreeMap<String, Vec<f64>>);

impl StateDict {
    pub fn from_parameters<'a>(params: impl IntoIterator<Item = &'a Parameter>) -> StateDict {
        StateDict(params.into_iter().map(|p| (p.name.clone(), p.value.clone())).collect())
    }

    /// Copies every stored buffer into the matching parameter. Missing names
    /// and length mismatches are errors; nothing is written in that case.
    pub fn apply_to<'a>(&self, params: impl IntoIterator<Item = &'a mut Parameter>) -> Result<()> {
        let mut params: Vec<&mut Parameter> = params.into_iter().collect();
        for param in params.iter() {
            match self.0.get(&param.name) {
                Some(stored) if stored.len() == param.value.len() => {}
                Some(stored) => {
                    return Err(CosalError::Checkpoint(format!(
                        "parameter {} has {} values, checkpoint holds {}",
                        param.name,
                        param.value.len(),
                        stored.len()
                    )))
                }
                None => {
                    return Err(CosalError::Checkpoint(format!(
                        "parameter {} missing from checkpoint",
                        param.name
                    )))
                }
            }
        }
        for param in params.iter_mut() {
            param.value.copy_from_slice(&self.0[&param.name]);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_rejects_missing_and_mismatched_entries() {
        let mut a = Parameter::new("a", ParamGroup::Base, vec![0.0, 0.0]);
        let mut b = Parameter::new("b", ParamGroup::Backbone, vec![0.0]);

        let mut dict = StateDict::default();
        dict.0.insert("a".into(), vec![1.0, 2.0]);
        assert!(dict.apply_to([&mut a, &mut b]).is_err());
        assert_eq!(a.value, vec![0.0, 0.0]);

        dict.0.insert("b".into(), vec![3.0, 4.0]);
        assert!(dict.apply_to([&mut a, &mut b]).is_err());

        dict.0.insert("b".into(), vec![3.0]);
        dict.apply_to([&mut a, &mut b]).unwrap();
        assert_eq!(a.value, vec![1.0, 2.0]);
        assert_eq!(b.value, vec![3.0]);
    }
}
