use anyhow::Context;
use clap::Parser;

use cosal_train::config::{testset_dirs, RunConfig, TrainArgs, TrainSet};
use cosal_train::data::FolderDataset;
use cosal_train::eval::SaliencyEvaluator;
use cosal_train::train::{run_training, FileSink, RunPlan, TestSet, TrainerContext};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = TrainArgs::parse();
    let config = RunConfig::from_args(&args).context("invalid run configuration")?;

    // Training data
    let trainset = TrainSet::from_id(&args.trainset)?;
    let (img_root, gt_root) = trainset.dirs(&args.data_root);
    log::info!("Training set {} from {:?}", trainset.id(), img_root);
    let mut train = FolderDataset::open(&img_root, &gt_root, config.size, Some(config.batch_size))
        .with_context(|| format!("cannot open training set at {:?}", img_root))?;
    if let Some(seed) = config.rand_seed {
        train = train.with_shuffle(seed);
    }

    // Held-out sets
    let mut test_sets = Vec::new();
    if config.validation {
        for name in args.testset_names() {
            let (img_root, gt_root) = testset_dirs(&args.data_root, &name);
            let source = FolderDataset::open(&img_root, &gt_root, config.size, None)
                .with_context(|| format!("cannot open test set {} at {:?}", name, img_root))?;
            test_sets.push(TestSet { name, gt_root, source: Box::new(source) });
        }
    }

    let sink = FileSink::open(&args.ckpt_dir)
        .with_context(|| format!("cannot open run log in {:?}", args.ckpt_dir))?;
    let mut ctx = TrainerContext::from_config(config, Box::new(sink))?;
    log::info!("{} with {} parameters", ctx.config.model, ctx.model.num_parameters());

    let plan = RunPlan {
        ckpt_dir: args.ckpt_dir.clone(),
        val_dir: args.val_dir.clone(),
        resume: args.resume.clone(),
        start_epoch: args.start_epoch,
    };
    let evaluator = SaliencyEvaluator::default();
    let report = run_training(&mut ctx, &mut train, &mut test_sets, &evaluator, &plan)?;

    match report.best {
        Some(best) => log::info!(
            "Done. Best epoch is epoch-{} with {} {:.4}",
            best.epoch,
            ctx.config.val_metric,
            best.value
        ),
        None => log::info!("Done. Final train loss: {:.3}", report.final_loss().unwrap_or(f64::NAN)),
    }
    Ok(())
}
