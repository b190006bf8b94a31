use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{MetricDirection, RunConfig, ValMetric};
use crate::error::{CosalError, Result};
use crate::network::StateDict;
use crate::train::context::TrainerContext;

/// File name of the rolling checkpoint.
pub const ROLLING_CHECKPOINT: &str = "checkpoint.json";
/// Exact best value and the best file it belongs to; file names only
/// carry four decimals.
pub const BEST_MARKER: &str = "best.json";
const BEST_PREFIX: &str = "best_";
const EXT: &str = "json";

/// Best epoch so far and its governing metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    pub epoch: usize,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BestMarker {
    file: String,
    best: BestRecord,
}

/// Full training state persisted after every epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Next epoch to run.
    pub epoch: usize,
    pub state_dict: StateDict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<serde_json::Value>,
    pub scheduler: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best: Option<BestRecord>,
}

impl CheckpointRecord {
    pub fn load(path: &Path) -> Result<CheckpointRecord> {
        let file = fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| CosalError::Checkpoint(format!("cannot parse {:?}: {}", path, e)))
    }
}

/// What `on_epoch_end` wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochArtifacts {
    pub rolling: PathBuf,
    pub permanent: Option<PathBuf>,
    pub best: Option<PathBuf>,
}

/// Owns the checkpoint directory: the rolling checkpoint, permanent
/// snapshots of the final epochs, and the single best-model file.
#[derive(Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
    epochs: usize,
    val_last: usize,
    metric: ValMetric,
    direction: MetricDirection,
    best: Option<BestRecord>,
}

impl CheckpointManager {
    /// Opens `dir`, creating it if needed. A best file left by an earlier
    /// run seeds the best-so-far value, read exactly from [`BEST_MARKER`]
    /// when the marker names that file.
    pub fn new(dir: &Path, config: &RunConfig) -> Result<CheckpointManager> {
        fs::create_dir_all(dir)?;
        let mut manager = CheckpointManager {
            dir: dir.to_path_buf(),
            epochs: config.epochs,
            val_last: config.val_last,
            metric: config.val_metric,
            direction: config.best_direction,
            best: None,
        };
        for path in manager.best_files()? {
            let parsed = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| parse_best_name(n, manager.metric));
            match parsed {
                Some(found) if manager.direction.improves(found.value, manager.best.map(|b| b.value)) => {
                    manager.best = Some(found)
                }
                Some(_) => {}
                None => log::warn!("ignoring unrecognized best file {:?}", path),
            }
        }
        if let Some(marker) = manager.read_marker() {
            let current = manager.best.map(|b| best_name(b, manager.metric));
            if current.as_deref() == Some(marker.file.as_str()) {
                manager.best = Some(marker.best);
            }
        }
        if let Some(best) = manager.best {
            log::info!("existing best model: epoch {} with {} {:.4}", best.epoch, manager.metric, best.value);
        }
        Ok(manager)
    }

    pub fn best(&self) -> Option<BestRecord> {
        self.best
    }

    pub fn rolling_path(&self) -> PathBuf {
        self.dir.join(ROLLING_CHECKPOINT)
    }

    /// Would `value` replace the current best?
    pub fn improves(&self, value: f64) -> bool {
        self.direction.improves(value, self.best.map(|b| b.value))
    }

    /// Persists the epoch: rolling checkpoint, a permanent snapshot for the
    /// final `val_last` epochs, and a new best file when `metric` strictly
    /// improves on every earlier epoch.
    pub fn on_epoch_end(&mut self, ctx: &TrainerContext, epoch: usize, metric: Option<f64>) -> Result<EpochArtifacts> {
        let state_dict = ctx.model.state();

        let mut new_best = self.best;
        if let Some(value) = metric {
            if self.improves(value) {
                new_best = Some(BestRecord { epoch, value });
            }
        }

        let record = CheckpointRecord {
            epoch: epoch + 1,
            state_dict: state_dict.clone(),
            optimizer: Some(ctx.optim.optimizer_state()?),
            scheduler: ctx.optim.scheduler_state()?,
            best: new_best,
        };
        let rolling = self.rolling_path();
        write_json_atomic(&rolling, &record)?;

        let mut artifacts = EpochArtifacts { rolling, ..EpochArtifacts::default() };
        if epoch + self.val_last >= self.epochs {
            let path = self.dir.join(format!("ep{}.{}", epoch, EXT));
            write_json_atomic(&path, &state_dict)?;
            artifacts.permanent = Some(path);
        }

        if new_best != self.best {
            if let Some(best) = new_best {
                artifacts.best = Some(self.replace_best(&state_dict, best)?);
                self.best = new_best;
            }
        }
        Ok(artifacts)
    }

    /// Writes the new best file and its marker, then removes every other
    /// best file.
    fn replace_best(&self, state_dict: &StateDict, best: BestRecord) -> Result<PathBuf> {
        let name = best_name(best, self.metric);
        let path = self.dir.join(&name);
        write_json_atomic(&path, state_dict)?;
        write_json_atomic(&self.dir.join(BEST_MARKER), &BestMarker { file: name, best })?;
        for stale in self.best_files()? {
            if stale != path {
                fs::remove_file(&stale)?;
            }
        }
        Ok(path)
    }

    fn read_marker(&self) -> Option<BestMarker> {
        let path = self.dir.join(BEST_MARKER);
        let file = fs::File::open(&path).ok()?;
        match serde_json::from_reader(std::io::BufReader::new(file)) {
            Ok(marker) => Some(marker),
            Err(e) => {
                log::warn!("ignoring unreadable {:?}: {}", path, e);
                None
            }
        }
    }

    fn best_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_best = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(BEST_PREFIX) && n.ends_with(&format!(".{}", EXT)))
                .unwrap_or(false);
            if is_best && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Restores model, optimizer and schedule from `path` and returns the
    /// epoch to start from. A missing file is logged and `fallback` is
    /// returned instead.
    pub fn resume(&mut self, ctx: &mut TrainerContext, path: &Path, fallback: usize) -> Result<usize> {
        if !path.is_file() {
            log::warn!("no checkpoint found at {:?}", path);
            ctx.info(&format!("=> no checkpoint found at '{}'", path.display()))?;
            return Ok(fallback);
        }
        ctx.info(&format!("=> loading checkpoint '{}'", path.display()))?;
        let record = CheckpointRecord::load(path)?;
        ctx.model.load_state(&record.state_dict)?;
        ctx.optim.load_scheduler_state(&record.scheduler)?;
        match &record.optimizer {
            Some(state) => ctx.optim.load_optimizer_state(state)?,
            None => log::warn!("checkpoint {:?} has no optimizer state; optimizer starts fresh", path),
        }
        if record.best.is_some() {
            self.best = record.best;
        }
        ctx.info(&format!("=> loaded checkpoint '{}' (epoch {})", path.display(), record.epoch))?;
        Ok(record.epoch)
    }
}

/// `best_ep{epoch}_{tag}{value:.4}.json`
pub fn best_name(best: BestRecord, metric: ValMetric) -> String {
    format!("{}ep{}_{}{:.4}.{}", BEST_PREFIX, best.epoch, metric.file_tag(), best.value, EXT)
}

fn parse_best_name(name: &str, metric: ValMetric) -> Option<BestRecord> {
    let rest = name.strip_prefix(BEST_PREFIX)?.strip_prefix("ep")?;
    let rest = rest.strip_suffix(&format!(".{}", EXT))?;
    let (epoch, tail) = rest.split_once('_')?;
    let value = tail.strip_prefix(metric.file_tag())?;
    Some(BestRecord {
        epoch: epoch.parse().ok()?,
        value: value.parse().ok()?,
    })
}

/// Serializes `value` to a sibling temp file and renames it over `path`.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let file = fs::File::create(&tmp)?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        std::io::Write::flush(&mut writer)?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::sink::MemorySink;

    fn setup(dir: &Path, epochs: usize) -> (TrainerContext, CheckpointManager) {
        let config = RunConfig { hidden: 2, epochs, val_last: 2, ..RunConfig::default() };
        let manager = CheckpointManager::new(dir, &config).unwrap();
        let ctx = TrainerContext::from_config(config, Box::new(MemorySink::new())).unwrap();
        (ctx, manager)
    }

    fn best_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| n.starts_with("best_"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn best_file_tracks_running_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut manager) = setup(dir.path(), 6);
        let metrics = [0.40, 0.55, 0.50, 0.55, 0.70, 0.10];
        let mut running = f64::MIN;
        for (epoch, &m) in metrics.iter().enumerate() {
            manager.on_epoch_end(&ctx, epoch, Some(m)).unwrap();
            running = running.max(m);
            let names = best_names(dir.path());
            assert_eq!(names.len(), 1, "epoch {}: {:?}", epoch, names);
            let parsed = parse_best_name(&names[0], ValMetric::SMeasure).unwrap();
            assert!((parsed.value - running).abs() < 1e-4);
        }
        assert_eq!(manager.best().unwrap().epoch, 4);
        // ties keep the earlier epoch
        assert_eq!(best_names(dir.path()), vec!["best_ep4_Smeasure0.7000.json"]);
    }

    #[test]
    fn permanent_snapshots_only_for_final_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut manager) = setup(dir.path(), 4);
        for epoch in 0..4 {
            let artifacts = manager.on_epoch_end(&ctx, epoch, None).unwrap();
            assert_eq!(artifacts.permanent.is_some(), epoch >= 2);
            assert!(artifacts.best.is_none());
        }
        assert!(dir.path().join("ep2.json").is_file());
        assert!(dir.path().join("ep3.json").is_file());
        assert!(!dir.path().join("ep1.json").exists());
        let record = CheckpointRecord::load(&manager.rolling_path()).unwrap();
        assert_eq!(record.epoch, 4);
        assert!(record.optimizer.is_some());
        assert!(fs::read_dir(dir.path()).unwrap().all(|e| e.unwrap().path().extension().unwrap() != "tmp"));
    }

    #[test]
    fn new_manager_seeds_best_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (ctx, mut manager) = setup(dir.path(), 3);
            manager.on_epoch_end(&ctx, 0, Some(0.6)).unwrap();
        }
        let (ctx, mut manager) = setup(dir.path(), 3);
        assert_eq!(manager.best(), Some(BestRecord { epoch: 0, value: 0.6 }));
        manager.on_epoch_end(&ctx, 1, Some(0.5)).unwrap();
        assert_eq!(best_names(dir.path()), vec!["best_ep0_Smeasure0.6000.json"]);
    }

    #[test]
    fn seeded_best_keeps_full_precision() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (ctx, mut manager) = setup(dir.path(), 3);
            manager.on_epoch_end(&ctx, 0, Some(0.61234)).unwrap();
        }
        let (ctx, mut manager) = setup(dir.path(), 3);
        assert_eq!(manager.best(), Some(BestRecord { epoch: 0, value: 0.61234 }));
        // Same four-decimal name, but lower than the stored best.
        assert!(!manager.improves(0.61231));
        let artifacts = manager.on_epoch_end(&ctx, 1, Some(0.61231)).unwrap();
        assert!(artifacts.best.is_none());
        assert_eq!(best_names(dir.path()), vec!["best_ep0_Smeasure0.6123.json"]);
    }

    #[test]
    fn stale_marker_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (ctx, mut manager) = setup(dir.path(), 3);
            manager.on_epoch_end(&ctx, 0, Some(0.61234)).unwrap();
        }
        fs::rename(
            dir.path().join("best_ep0_Smeasure0.6123.json"),
            dir.path().join("best_ep1_Smeasure0.6500.json"),
        )
        .unwrap();
        let (_, manager) = setup(dir.path(), 3);
        assert_eq!(manager.best(), Some(BestRecord { epoch: 1, value: 0.65 }));
    }

    #[test]
    fn missing_resume_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctx, mut manager) = setup(dir.path(), 3);
        let start = manager.resume(&mut ctx, &dir.path().join("nope.json"), 2).unwrap();
        assert_eq!(start, 2);
    }

    #[test]
    fn resume_restores_state_and_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctx, mut manager) = setup(dir.path(), 5);
        ctx.optim.step_epoch();
        manager.on_epoch_end(&ctx, 2, Some(0.3)).unwrap();

        let (mut fresh, mut other) = setup(&dir.path().join("other"), 5);
        let start = other.resume(&mut fresh, &manager.rolling_path(), 0).unwrap();
        assert_eq!(start, 3);
        assert_eq!(fresh.model.state(), ctx.model.state());
        assert_eq!(fresh.optim.scheduler().last_epoch, 1);
        assert_eq!(other.best(), Some(BestRecord { epoch: 2, value: 0.3 }));
    }

    #[test]
    fn best_names_round_trip() {
        let best = BestRecord { epoch: 12, value: 0.8123 };
        let name = best_name(best, ValMetric::EMax);
        assert_eq!(name, "best_ep12_Emax0.8123.json");
        assert_eq!(parse_best_name(&name, ValMetric::EMax), Some(best));
        assert_eq!(parse_best_name(&name, ValMetric::SMeasure), None);
    }
}
