use burn::prelude::*;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::data::LABELS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum NetworkType {
    #[value(name = "AlexNet")]
    AlexNet,
    #[value(name = "ResNet")]
    ResNet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[value(name = "SGD")]
    Sgd,
    #[value(name = "Adadelta")]
    Adadelta,
    #[value(name = "Adam")]
    Adam,
}

/// Everything a run needs, serialized next to the checkpoints so the run can
/// be repeated.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "NetworkType::AlexNet")]
    pub network: NetworkType,
    #[config(default = "OptimizerKind::Adam")]
    pub optimizer: OptimizerKind,
    #[config(default = 20)]
    pub epochs: usize,
    #[config(default = 1)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Stop once the validation loss moves less than this between epochs.
    #[config(default = 1e-2)]
    pub estop: f64,
    #[config(default = true)]
    pub augmentation: bool,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Depth, height and width every volume is resized to.
    #[config(default = "[110, 110, 110]")]
    pub volume_shape: [usize; 3],
    #[config(default = "LABELS.len()")]
    pub num_classes: usize,
    #[config(default = "String::from(\"best_model\")")]
    pub save_prefix: String,
    #[config(default = "None")]
    pub load_checkpoint: Option<String>,
    #[config(default = "String::from(\"train.txt\")")]
    pub train_manifest: String,
    #[config(default = "String::from(\"test.txt\")")]
    pub test_manifest: String,
    #[config(default = "String::from(\"./Image\")")]
    pub image_root: String,
}

impl TrainingConfig {
    pub fn config_path(&self) -> String {
        format!("{}.config.json", self.save_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_command_line_defaults() {
        let config = TrainingConfig::new();

        assert_eq!(config.network, NetworkType::AlexNet);
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert_eq!(config.epochs, 20);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.volume_shape, [110, 110, 110]);
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.save_prefix, "best_model");
        assert!(config.load_checkpoint.is_none());
    }

    #[test]
    fn round_trips_through_json_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let save = dir.path().join("run").to_string_lossy().into_owned();
        let config = TrainingConfig::new()
            .with_network(NetworkType::ResNet)
            .with_optimizer(OptimizerKind::Adadelta)
            .with_save_prefix(save);

        config.save(config.config_path()).unwrap();
        let loaded = TrainingConfig::load(config.config_path()).unwrap();

        assert_eq!(loaded.network, NetworkType::ResNet);
        assert_eq!(loaded.optimizer, OptimizerKind::Adadelta);
        assert_eq!(loaded.save_prefix, config.save_prefix);
    }
}
