mod common;

use std::path::{Path, PathBuf};

use cosal_train::config::RunConfig;
use cosal_train::data::{BatchSource, FolderDataset, InMemorySource};
use cosal_train::eval::SaliencyEvaluator;
use cosal_train::loss::{LossComposer, LossTermSet};
use cosal_train::network::{ModelConfig, ModelKind};
use cosal_train::optim::{OptimizerSchedule, Sgd};
use cosal_train::train::{run_training, MemorySink, RunEvent, RunPlan, Trainer, TrainerContext, TrainingReport};

use common::{small_config, synthetic_batch, write_image_set};

#[test]
fn identical_batches_give_non_increasing_loss() {
    let config = RunConfig {
        loss: LossTermSet::Sal,
        freeze: false,
        ..small_config(1)
    };
    let model = ModelConfig {
        kind: ModelKind::CoSalNet,
        in_channels: 3,
        hidden: config.hidden,
        num_classes: config.num_classes,
        heads: config.loss.heads(),
        seed: 5,
    }
    .build()
    .unwrap();
    let optim = OptimizerSchedule::new(Box::new(Sgd::new(1e-3, 1.0)), config.decay_step_size);
    let sink = MemorySink::new();
    let mut ctx = TrainerContext::new(model, optim, config, Box::new(sink.clone()));

    let batch = synthetic_batch(1, 0, 0);
    let mut source = InMemorySource::new(vec![batch.clone(), batch]);
    let trainer = Trainer::new(LossComposer::from_config(&ctx.config));
    trainer.run_epoch(&mut ctx, &mut source, 0).unwrap();

    let losses: Vec<f64> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            RunEvent::Progress(p) => Some(p.loss),
            _ => None,
        })
        .collect();
    assert_eq!(losses.len(), 2);
    assert!(losses[1] <= losses[0] + 1e-12, "{:?}", losses);
}

fn batches() -> Vec<cosal_train::data::Batch> {
    (0..3).map(|i| synthetic_batch(2, i, i)).collect()
}

fn run(config: RunConfig, ckpt_dir: &Path, resume: Option<PathBuf>) -> TrainingReport {
    run_on(config, &mut InMemorySource::new(batches()), ckpt_dir, resume)
}

fn run_on(config: RunConfig, source: &mut dyn BatchSource, ckpt_dir: &Path, resume: Option<PathBuf>) -> TrainingReport {
    let mut ctx = TrainerContext::from_config(config, Box::new(MemorySink::new())).unwrap();
    let plan = RunPlan {
        ckpt_dir: ckpt_dir.to_path_buf(),
        val_dir: ckpt_dir.join("val"),
        resume,
        start_epoch: 0,
    };
    run_training(&mut ctx, source, &mut [], &SaliencyEvaluator::default(), &plan).unwrap()
}

#[test]
fn resumed_run_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        loss: LossTermSet::SalClsContrastClsMask,
        validation: false,
        ..small_config(4)
    };

    let full = run(config.clone(), &dir.path().join("full"), None);
    assert_eq!(full.epochs.len(), 4);

    let split_dir = dir.path().join("split");
    let first = run(RunConfig { epochs: 2, ..config.clone() }, &split_dir, None);
    assert_eq!(first.epochs.len(), 2);
    let resumed = run(config, &split_dir, Some(split_dir.join("checkpoint.json")));
    assert_eq!(resumed.start_epoch, 2);
    assert_eq!(resumed.epochs.len(), 2);

    let expected = full.final_loss().unwrap();
    let actual = resumed.final_loss().unwrap();
    assert!((expected - actual).abs() < 1e-9, "{} vs {}", expected, actual);
    assert!((full.epochs[3].lr - resumed.epochs[1].lr).abs() < 1e-15);
}

#[test]
fn resumed_folder_run_draws_the_same_subsets() {
    let dir = tempfile::tempdir().unwrap();
    let items: Vec<(&str, String, u32, u32)> =
        (0..6).map(|i| ("apple", format!("img{}", i), 8 + i as u32, 8)).collect();
    let items: Vec<(&str, &str, u32, u32)> = items.iter().map(|(g, s, w, h)| (*g, s.as_str(), *w, *h)).collect();
    let (img_root, gt_root) = write_image_set(dir.path(), "train", &items);
    let open = || FolderDataset::open(&img_root, &gt_root, 8, Some(2)).unwrap().with_shuffle(7);
    let config = RunConfig {
        loss: LossTermSet::SalCls,
        validation: false,
        ..small_config(3)
    };

    let full = run_on(config.clone(), &mut open(), &dir.path().join("full"), None);

    let split_dir = dir.path().join("split");
    run_on(RunConfig { epochs: 1, ..config.clone() }, &mut open(), &split_dir, None);
    let resumed = run_on(config, &mut open(), &split_dir, Some(split_dir.join("checkpoint.json")));
    assert_eq!(resumed.start_epoch, 1);

    let expected = full.final_loss().unwrap();
    let actual = resumed.final_loss().unwrap();
    assert!((expected - actual).abs() < 1e-9, "{} vs {}", expected, actual);
}

#[test]
fn missing_resume_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig { validation: false, ..small_config(1) };
    let report = run(config, dir.path(), Some(dir.path().join("absent.json")));
    assert_eq!(report.start_epoch, 0);
    assert_eq!(report.epochs.len(), 1);
    assert!(dir.path().join("checkpoint.json").is_file());
    assert!(dir.path().join("ep0.json").is_file());
}
