use crate::data::{Batch, BatchSource};
use crate::error::Result;
use crate::loss::{LossComposer, Targets};
use crate::math::Tensor;
use crate::train::context::TrainerContext;
use crate::train::epoch_stats::EpochState;
use crate::train::sink::{EpochSummary, ProgressRecord, RunEvent};

/// Runs training epochs: forward, loss composition, backward and one
/// optimizer step per batch.
pub struct Trainer {
    composer: LossComposer,
}

impl Trainer {
    pub fn new(composer: LossComposer) -> Trainer {
        Trainer { composer }
    }

    /// Trains one pass over `source` and returns the sample-weighted average
    /// loss. Errors from the model or the data abort the epoch.
    pub fn run_epoch(&self, ctx: &mut TrainerContext, source: &mut dyn BatchSource, epoch: usize) -> Result<f64> {
        ctx.model.set_training(true);
        source.set_epoch(epoch);
        source.reset();
        let iters = source.num_batches();
        let epochs = ctx.config.epochs;
        let mut state = EpochState::new(epoch);

        while let Some(batch) = source.next_batch()? {
            let progress = self.train_step(ctx, batch, &mut state)?;
            if (state.iterations - 1) % ctx.config.log_interval == 0 {
                ctx.emit(RunEvent::Progress(ProgressRecord {
                    epoch,
                    epochs,
                    iter: state.iterations - 1,
                    iters,
                    terms: progress.terms,
                    loss: progress.loss,
                    loss_avg: state.loss.avg(),
                }))?;
            }
        }

        let lr = ctx.optim.step_epoch();
        ctx.emit(RunEvent::EpochSummary(EpochSummary {
            epoch,
            epochs,
            loss_avg: state.loss.avg(),
            lr,
        }))?;
        Ok(state.loss.avg())
    }

    fn train_step(&self, ctx: &mut TrainerContext, batch: Batch, state: &mut EpochState) -> Result<StepProgress> {
        batch.validate()?;
        let n = batch.len();
        // [1, N, ...] -> [N, ...]
        let images = batch.images.squeeze(0)?;
        let gts = batch.gts.squeeze(0)?;
        let gts_cat = Tensor::cat_batch(&[&gts, &gts.zeros_like()])?;
        let targets = Targets {
            gts: &gts,
            gts_cat: &gts_cat,
            labels: &batch.labels,
        };

        let outputs = ctx.model.forward(&images)?;
        let composed = self.composer.compose(ctx.model.as_ref(), &images, &outputs, &targets)?;
        state.loss.update(composed.total, n);
        state.iterations += 1;

        ctx.optim.zero_grad(ctx.model.as_mut());
        ctx.model.backward(&composed.grads)?;
        ctx.optim.step(ctx.model.as_mut())?;

        Ok(StepProgress {
            terms: composed.terms,
            loss: composed.total,
        })
    }
}

struct StepProgress {
    terms: Vec<crate::loss::LossTerm>,
    loss: f64,
}
