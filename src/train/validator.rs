use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use crate::data::image_io::save_gray_png;
use crate::data::BatchSource;
use crate::error::{CosalError, Result};
use crate::eval::Evaluator;
use crate::network::ModelRunner;
use crate::train::context::TrainerContext;

/// Puts the model in evaluation mode and restores its previous mode when
/// dropped, including on early return.
pub struct EvalModeGuard<'a> {
    model: &'a mut dyn ModelRunner,
    was_training: bool,
}

impl<'a> EvalModeGuard<'a> {
    pub fn new(model: &'a mut dyn ModelRunner) -> EvalModeGuard<'a> {
        let was_training = model.is_training();
        model.set_training(false);
        EvalModeGuard { model, was_training }
    }
}

impl<'a> Deref for EvalModeGuard<'a> {
    type Target = dyn ModelRunner + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.model
    }
}

impl Drop for EvalModeGuard<'_> {
    fn drop(&mut self) {
        self.model.set_training(self.was_training);
    }
}

/// A held-out set: its loader and the ground-truth root the evaluator reads.
pub struct TestSet {
    pub name: String,
    pub gt_root: PathBuf,
    pub source: Box<dyn BatchSource>,
}

/// Score of one test set.
#[derive(Debug, Clone, PartialEq)]
pub struct SetScore {
    pub name: String,
    pub value: f64,
}

/// Writes predictions for held-out sets and scores them.
pub struct Validator<'e> {
    val_dir: PathBuf,
    evaluator: &'e dyn Evaluator,
}

impl<'e> Validator<'e> {
    pub fn new(val_dir: &Path, evaluator: &'e dyn Evaluator) -> Validator<'e> {
        Validator {
            val_dir: val_dir.to_path_buf(),
            evaluator,
        }
    }

    /// Scores the first set, or every set when `validate_all_testsets` is on.
    /// Scores come back in set order; the first one governs model selection.
    pub fn run_epoch(&self, ctx: &mut TrainerContext, test_sets: &mut [TestSet]) -> Result<Vec<SetScore>> {
        let limit = if ctx.config.validate_all_testsets { test_sets.len() } else { 1 };
        let metric = ctx.config.val_metric;
        let model = EvalModeGuard::new(ctx.model.as_mut());
        let mut scores = Vec::with_capacity(limit);
        for set in test_sets.iter_mut().take(limit) {
            log::info!("Validating {}...", set.name);
            let saved_root = self.val_dir.join(&set.name);
            let written = write_predictions(&*model, set.source.as_mut(), &saved_root)?;
            log::debug!("wrote {} predictions under {:?}", written, saved_root);
            let value = self.evaluator.evaluate(&saved_root, &set.gt_root, metric)?;
            scores.push(SetScore { name: set.name.clone(), value });
        }
        Ok(scores)
    }
}

/// Runs inference over `source` and writes each sigmoid map, resized to the
/// image's original size, to `<root>/<subpath>`. Returns the number written.
fn write_predictions(model: &dyn ModelRunner, source: &mut dyn BatchSource, root: &Path) -> Result<usize> {
    source.reset();
    let mut written = 0;
    while let Some(batch) = source.next_batch()? {
        batch.validate()?;
        let images = batch.images.squeeze(0)?;
        let outputs = model.predict(&images)?;
        let finest = outputs.finest()?;
        for (k, (subpath, &(h, w))) in batch.subpaths.iter().zip(&batch.orig_sizes).enumerate() {
            let map = finest
                .narrow_batch(k, 1)?
                .resize_bilinear(h as usize, w as usize)?
                .sigmoid();
            let path = root.join(subpath);
            let parent = path
                .parent()
                .ok_or_else(|| CosalError::Data(format!("bad prediction path {:?}", path)))?;
            fs::create_dir_all(parent)?;
            save_gray_png(&path, &map.data, h, w)?;
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{HeadSet, ModelConfig, ModelKind};

    #[test]
    fn guard_restores_training_mode() {
        let config = ModelConfig {
            kind: ModelKind::CoSalNet,
            in_channels: 3,
            hidden: 2,
            num_classes: 2,
            heads: HeadSet::default(),
            seed: 1,
        };
        let mut model = config.build().unwrap();
        model.set_training(true);
        {
            let guard = EvalModeGuard::new(model.as_mut());
            assert!(!guard.is_training());
        }
        assert!(model.is_training());

        model.set_training(false);
        drop(EvalModeGuard::new(model.as_mut()));
        assert!(!model.is_training());
    }
}
