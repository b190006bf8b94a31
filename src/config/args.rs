use std::path::PathBuf;

use clap::Parser;

/// Command-line surface of the trainer. Options left unset fall back to the
/// `--config` file, then to `RunConfig::default()`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "cosal-train",
    about = "Train a group co-saliency model with validation-driven checkpointing"
)]
pub struct TrainArgs {
    /// Model architecture (options: cosalnet).
    #[arg(long)]
    pub model: Option<String>,
    /// Active loss terms joined by '+', e.g. sal+cls+contrast+cls_mask.
    #[arg(long)]
    pub loss: Option<String>,
    /// Maximum images per training group.
    #[arg(long = "bs", visible_alias = "batch-size")]
    pub batch_size: Option<usize>,
    /// Initial learning rate.
    #[arg(long = "lr", visible_alias = "learning-rate")]
    pub lr: Option<f64>,
    /// Path to the latest rolling checkpoint.
    #[arg(long)]
    pub resume: Option<PathBuf>,
    /// Total number of epochs.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Manual epoch number (useful on restarts without --resume).
    #[arg(long, default_value_t = 0)]
    pub start_epoch: usize,
    /// Training set (options: Jigsaw2_DUTS, DUTS_class).
    #[arg(long, default_value = "Jigsaw2_DUTS")]
    pub trainset: String,
    /// Input size images are resized to.
    #[arg(long)]
    pub size: Option<u32>,
    /// Directory for checkpoints and the run log.
    #[arg(long, default_value = "ckpt")]
    pub ckpt_dir: PathBuf,
    /// Test sets joined by '+'; the first one governs best-model selection.
    #[arg(long, default_value = "CoCA+CoSOD3k+CoSal2015")]
    pub testsets: String,
    /// Directory for temporary validation predictions.
    #[arg(long, default_value = "tmp4val")]
    pub val_dir: PathBuf,
    /// Root holding the datasets (images/<set>, gts/<set>).
    #[arg(long, default_value = "../../../datasets/sod")]
    pub data_root: PathBuf,
    /// JSON file with RunConfig values.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl TrainArgs {
    pub fn testset_names(&self) -> Vec<String> {
        self.testsets
            .split('+')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}
