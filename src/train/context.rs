use crate::config::RunConfig;
use crate::error::Result;
use crate::network::{ModelConfig, ModelRunner};
use crate::optim::OptimizerSchedule;
use crate::train::sink::{RunEvent, RunSink};

/// Backbone parameters whose name contains this stay trainable when the
/// backbone is frozen.
pub const UNFROZEN_BACKBONE_BLOCK: &str = "bb.conv5";

/// Input channels of the RGB images the loaders produce.
const IMAGE_CHANNELS: usize = 3;

/// The live state of one run, passed explicitly to the trainer, validator
/// and checkpoint manager.
pub struct TrainerContext {
    pub model: Box<dyn ModelRunner>,
    pub optim: OptimizerSchedule,
    pub config: RunConfig,
    pub sink: Box<dyn RunSink>,
}

impl TrainerContext {
    pub fn new(
        model: Box<dyn ModelRunner>,
        optim: OptimizerSchedule,
        config: RunConfig,
        sink: Box<dyn RunSink>,
    ) -> TrainerContext {
        TrainerContext { model, optim, config, sink }
    }

    /// Builds the configured model with the heads its loss terms need, an
    /// Adam schedule, and applies backbone freezing.
    pub fn from_config(config: RunConfig, sink: Box<dyn RunSink>) -> Result<TrainerContext> {
        let seed = config.rand_seed.unwrap_or_else(rand::random);
        let model_config = ModelConfig {
            kind: config.model,
            in_channels: IMAGE_CHANNELS,
            hidden: config.hidden,
            num_classes: config.num_classes,
            heads: config.loss.heads(),
            seed,
        };
        let mut model = model_config.build()?;
        if config.freeze {
            let frozen = model.freeze_backbone(UNFROZEN_BACKBONE_BLOCK);
            log::info!("froze {} backbone parameters", frozen);
        }
        let optim = OptimizerSchedule::from_config(&config);
        Ok(TrainerContext::new(model, optim, config, sink))
    }

    pub fn emit(&mut self, event: RunEvent) -> Result<()> {
        self.sink.emit(event)
    }

    pub fn info(&mut self, message: &str) -> Result<()> {
        self.sink.info(message)
    }
}
