use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::config::{MetricDirection, ValMetric};
use crate::data::BatchSource;
use crate::error::Result;
use crate::eval::Evaluator;
use crate::loss::LossComposer;
use crate::train::checkpoint::{BestRecord, CheckpointManager};
use crate::train::context::TrainerContext;
use crate::train::epoch_stats::EpochStats;
use crate::train::sink::{RunEvent, ValidationRecord};
use crate::train::trainer::Trainer;
use crate::train::validator::{TestSet, Validator};

/// Resolved configuration written next to the checkpoints.
pub const RUN_CONFIG_FILE: &str = "run_config.json";

/// Where a run reads and writes, and where it starts.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub ckpt_dir: PathBuf,
    pub val_dir: PathBuf,
    pub resume: Option<PathBuf>,
    pub start_epoch: usize,
}

/// Outcome of [`run_training`].
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub start_epoch: usize,
    pub epochs: Vec<EpochStats>,
    pub best: Option<BestRecord>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.train_loss)
    }
}

/// Runs the whole schedule: resume, then train, validate and checkpoint
/// each epoch from the start epoch up to `config.epochs`.
pub fn run_training(
    ctx: &mut TrainerContext,
    train: &mut dyn BatchSource,
    test_sets: &mut [TestSet],
    evaluator: &dyn Evaluator,
    plan: &RunPlan,
) -> Result<TrainingReport> {
    log_run_details(ctx)?;

    let mut checkpoints = CheckpointManager::new(&plan.ckpt_dir, &ctx.config)?;
    ctx.config.save_json(&plan.ckpt_dir.join(RUN_CONFIG_FILE))?;
    let start_epoch = match &plan.resume {
        Some(path) => checkpoints.resume(ctx, path, plan.start_epoch)?,
        None => plan.start_epoch,
    };

    let trainer = Trainer::new(LossComposer::from_config(&ctx.config));
    let validator = Validator::new(&plan.val_dir, evaluator);
    let validate = ctx.config.validation && !test_sets.is_empty();
    if ctx.config.validation && test_sets.is_empty() {
        log::warn!("validation is enabled but no test sets are configured");
    }

    let mut report = TrainingReport {
        start_epoch,
        epochs: Vec::new(),
        best: checkpoints.best(),
    };

    for epoch in start_epoch..ctx.config.epochs {
        let started = Instant::now();

        // ── Train ────────────────────────────────────────────────────────
        let train_loss = trainer.run_epoch(ctx, train, epoch)?;

        // ── Validate ─────────────────────────────────────────────────────
        let mut governing = None;
        if validate {
            let scores = validator.run_epoch(ctx, test_sets)?;
            for (i, score) in scores.iter().enumerate() {
                if i == 0 {
                    governing = Some(score.value);
                    continue;
                }
                ctx.info(&format!(
                    "Validation: {} on {} for epoch-{} is {:.4}",
                    ctx.config.val_metric, score.name, epoch, score.value
                ))?;
            }
            if let Some(first) = scores.first() {
                let best = match checkpoints.best() {
                    Some(best) if !checkpoints.improves(first.value) => best,
                    _ => BestRecord { epoch, value: first.value },
                };
                ctx.emit(RunEvent::Validation(ValidationRecord {
                    epoch,
                    testset: first.name.clone(),
                    metric: ctx.config.val_metric,
                    value: first.value,
                    best_epoch: best.epoch,
                    best_value: best.value,
                }))?;
            }
        }

        // ── Persist ──────────────────────────────────────────────────────
        checkpoints.on_epoch_end(ctx, epoch, governing)?;

        report.epochs.push(EpochStats {
            epoch,
            total_epochs: ctx.config.epochs,
            train_loss,
            val_metric: governing,
            lr: ctx.optim.lr(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        report.best = checkpoints.best();
    }

    Ok(report)
}

/// Writes the configuration dump that opens every run log.
fn log_run_details(ctx: &mut TrainerContext) -> Result<()> {
    if ctx.config.val_metric == ValMetric::EMax && ctx.config.best_direction == MetricDirection::LowerIsBetter {
        log::warn!("E_max is a higher-is-better metric but best_direction is lower_is_better");
    }
    let model = ctx.model.describe();
    let optimizer = ctx.optim.describe();
    let config = serde_json::to_string_pretty(&ctx.config)?;
    ctx.info("Model details:")?;
    ctx.info(&model)?;
    ctx.info("Optimizer details:")?;
    ctx.info(&optimizer)?;
    ctx.info("Other hyperparameters:")?;
    ctx.info(&config)?;
    Ok(())
}
