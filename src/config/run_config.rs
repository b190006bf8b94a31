use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::args::TrainArgs;
use crate::error::{CosalError, Result};
use crate::loss::{LossTermSet, SaliencyLossKind};
use crate::network::ModelKind;

/// Validation metric that governs best-model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValMetric {
    /// Mean structure measure over the test set.
    SMeasure,
    /// Maximum over thresholds of the mean enhanced-alignment measure.
    EMax,
}

impl ValMetric {
    /// Tag embedded in best-model filenames.
    pub fn file_tag(&self) -> &'static str {
        match self {
            ValMetric::SMeasure => "Smeasure",
            ValMetric::EMax => "Emax",
        }
    }
}

impl fmt::Display for ValMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValMetric::SMeasure => write!(f, "S_measure"),
            ValMetric::EMax => write!(f, "E_max"),
        }
    }
}

/// Which way a validation metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    HigherIsBetter,
    LowerIsBetter,
}

impl MetricDirection {
    /// Strict improvement; ties keep the earlier epoch.
    pub fn improves(&self, candidate: f64, best: Option<f64>) -> bool {
        match best {
            None => !candidate.is_nan(),
            Some(best) => match self {
                MetricDirection::HigherIsBetter => candidate > best,
                MetricDirection::LowerIsBetter => candidate < best,
            },
        }
    }
}

/// Training hyperparameters and feature flags for one run.
///
/// Built once at startup (`RunConfig::from_args`) and never mutated after.
/// A JSON file passed with `--config` supplies the base values; explicit
/// command-line values override it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelKind,
    /// Active loss terms.
    pub loss: LossTermSet,
    /// Deep-supervision loss variant used by the saliency term.
    pub saliency_loss: SaliencyLossKind,
    /// How many of the finest saliency maps enter the saliency term (capped at 4).
    pub loss_sal_last_layers: usize,
    pub lambda_sal: f64,
    pub lambda_cls: f64,
    pub lambda_contrast: f64,
    pub lambda_cls_mask: f64,
    pub label_smoothing: bool,
    pub self_supervision: bool,
    /// Freeze the backbone except its last block.
    pub freeze: bool,
    pub batch_size: usize,
    pub lr: f64,
    pub epochs: usize,
    /// Square input size images are resized to.
    pub size: u32,
    /// Epochs between learning-rate decays (factor 0.1).
    pub decay_step_size: usize,
    pub rand_seed: Option<u64>,
    pub validation: bool,
    /// Number of final epochs that keep a permanent weights snapshot.
    pub val_last: usize,
    /// Iterations between progress records.
    pub log_interval: usize,
    pub val_metric: ValMetric,
    pub best_direction: MetricDirection,
    /// Score every configured test set instead of only the first.
    pub validate_all_testsets: bool,
    /// Reject unsupported loss-term combinations instead of falling back to `sal`.
    pub strict_loss_terms: bool,
    /// Learning-rate multiplier for the backbone parameter group.
    pub backbone_lr_scale: f64,
    pub adam_betas: (f64, f64),
    pub num_classes: usize,
    pub hidden: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            model: ModelKind::CoSalNet,
            loss: LossTermSet::Sal,
            saliency_loss: SaliencyLossKind::Iou,
            loss_sal_last_layers: 4,
            lambda_sal: 1.0,
            lambda_cls: 3.0,
            lambda_contrast: 1.0,
            lambda_cls_mask: 1.0,
            label_smoothing: false,
            self_supervision: false,
            freeze: true,
            batch_size: 48,
            lr: 3e-4,
            epochs: 30,
            size: 224,
            decay_step_size: 300,
            rand_seed: Some(7),
            validation: true,
            val_last: 20,
            log_interval: 20,
            val_metric: ValMetric::SMeasure,
            best_direction: MetricDirection::HigherIsBetter,
            validate_all_testsets: false,
            strict_loss_terms: false,
            backbone_lr_scale: 0.01,
            adam_betas: (0.9, 0.99),
            num_classes: 291,
            hidden: 16,
        }
    }
}

impl RunConfig {
    /// Resolves the run configuration from an optional JSON file plus the
    /// command line.
    pub fn from_args(args: &TrainArgs) -> Result<RunConfig> {
        let mut config = match &args.config {
            Some(path) => RunConfig::load_json(path)?,
            None => RunConfig::default(),
        };
        if let Some(model) = &args.model {
            config.model = model.parse()?;
        }
        if let Some(loss) = &args.loss {
            config.loss = LossTermSet::resolve(loss, config.strict_loss_terms)?;
        }
        if let Some(batch_size) = args.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(lr) = args.lr {
            config.lr = lr;
        }
        if let Some(epochs) = args.epochs {
            config.epochs = epochs;
        }
        if let Some(size) = args.size {
            config.size = size;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CosalError::Config("batch_size must be > 0".to_string()));
        }
        if self.size == 0 {
            return Err(CosalError::Config("size must be > 0".to_string()));
        }
        if self.loss_sal_last_layers == 0 {
            return Err(CosalError::Config("loss_sal_last_layers must be > 0".to_string()));
        }
        if self.decay_step_size == 0 {
            return Err(CosalError::Config("decay_step_size must be > 0".to_string()));
        }
        if self.log_interval == 0 {
            return Err(CosalError::Config("log_interval must be > 0".to_string()));
        }
        if !(self.lr > 0.0) {
            return Err(CosalError::Config(format!("lr must be positive, got {}", self.lr)));
        }
        Ok(())
    }

    /// Serializes the configuration to a pretty-printed JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a `RunConfig`; absent fields take their defaults.
    ///
    /// `loss` resolves once `strict_loss_terms` is known, so an unsupported
    /// combination in a lenient file falls back to `sal` like it does on the
    /// command line.
    pub fn load_json(path: &Path) -> Result<RunConfig> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut value: serde_json::Value = serde_json::from_reader(reader)?;
        let loss = match value.as_object_mut().and_then(|fields| fields.remove("loss")) {
            Some(serde_json::Value::String(loss)) => Some(loss),
            Some(other) => {
                return Err(CosalError::Config(format!("loss must be a string, got {}", other)));
            }
            None => None,
        };
        let mut config: RunConfig = serde_json::from_value(value)?;
        if let Some(loss) = loss {
            config.loss = LossTermSet::resolve(&loss, config.strict_loss_terms)?;
        }
        Ok(config)
    }
}
