use clap::{
    ArgAction, Parser,
    builder::RangedU64ValueParser,
    error::{ContextKind, ContextValue, ErrorKind},
};

use crate::config::{NetworkType, OptimizerKind, TrainingConfig};

#[derive(Parser, Debug, Clone)]
#[command(about = "Train a 3D CNN to diagnose Alzheimer's disease from MRI volumes")]
pub struct Options {
    /// Deep network type
    #[arg(long = "network_type", visible_alias = "nt", value_enum, default_value_t = NetworkType::AlexNet)]
    pub network_type: NetworkType,

    /// Restore network weights from a checkpoint before training
    #[arg(long)]
    pub load: Option<String>,

    /// Checkpoint file prefix
    #[arg(long, default_value = "best_model")]
    pub save: String,

    /// Randomly mirror training volumes
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub augmentation: bool,

    /// Epochs through the data
    #[arg(long, default_value_t = 20)]
    pub epochs: usize,

    /// Learning rate of the optimization
    #[arg(long = "learning_rate", visible_alias = "lr", default_value_t = 1e-3)]
    pub learning_rate: f64,

    /// Early stopping criteria on the development set
    #[arg(long, default_value_t = 1e-2)]
    pub estop: f64,

    /// Batch size for training
    #[arg(
        long = "batch_size",
        default_value_t = 1,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub batch_size: usize,

    /// Optimizer of choice for training
    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,

    /// ID of gpu device to use. Empty implies cpu usage
    #[arg(long, num_args = 0.., default_values_t = vec![0])]
    pub gpuid: Vec<usize>,

    /// Training sample manifest
    #[arg(long = "train_manifest", default_value = "train.txt")]
    pub train_manifest: String,

    /// Validation sample manifest
    #[arg(long = "test_manifest", default_value = "test.txt")]
    pub test_manifest: String,

    /// Directory the manifest paths are relative to
    #[arg(long = "image_root", default_value = "./Image")]
    pub image_root: String,

    /// Data loader worker threads
    #[arg(long = "num_workers", default_value_t = 4)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl Options {
    /// Parses what it recognizes and hands back everything else, so a stray
    /// flag is reported instead of aborting the run.
    pub fn parse_known<I, T>(args: I) -> Result<(Self, Vec<String>), clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut args: Vec<String> = args
            .into_iter()
            .map(Into::into)
            .map(|arg| normalize_flag(&arg))
            .collect();
        let mut unknown = Vec::new();

        loop {
            let err = match Self::try_parse_from(args.iter()) {
                Ok(options) => return Ok((options, unknown)),
                Err(err) => err,
            };
            if err.kind() != ErrorKind::UnknownArgument {
                return Err(err);
            }
            let Some(ContextValue::String(invalid)) = err.get(ContextKind::InvalidArg) else {
                return Err(err);
            };
            let with_value = format!("{invalid}=");
            let Some(position) = args
                .iter()
                .skip(1)
                .position(|arg| arg == invalid || arg.starts_with(&with_value))
            else {
                return Err(err);
            };
            unknown.push(args.remove(position + 1));
        }
    }

    pub fn to_config(&self) -> TrainingConfig {
        TrainingConfig::new()
            .with_network(self.network_type)
            .with_optimizer(self.optimizer)
            .with_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_learning_rate(self.learning_rate)
            .with_estop(self.estop)
            .with_augmentation(self.augmentation)
            .with_num_workers(self.num_workers)
            .with_seed(self.seed)
            .with_save_prefix(self.save.clone())
            .with_load_checkpoint(self.load.clone())
            .with_train_manifest(self.train_manifest.clone())
            .with_test_manifest(self.test_manifest.clone())
            .with_image_root(self.image_root.clone())
    }
}

/// `-lr` is a single-dash long flag, which clap cannot declare directly.
fn normalize_flag(arg: &str) -> String {
    match arg.strip_prefix("-lr") {
        Some("") => "--lr".to_string(),
        Some(rest) if rest.starts_with('=') => format!("--lr{rest}"),
        _ => arg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> (Options, Vec<String>) {
        let argv = std::iter::once("train").chain(args.iter().copied());
        Options::parse_known(argv).unwrap()
    }

    #[test]
    fn defaults_match_the_documented_interface() {
        let (options, unknown) = parse(&[]);

        assert!(unknown.is_empty());
        assert_eq!(options.network_type, NetworkType::AlexNet);
        assert_eq!(options.optimizer, OptimizerKind::Adam);
        assert_eq!(options.epochs, 20);
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.learning_rate, 1e-3);
        assert_eq!(options.estop, 1e-2);
        assert_eq!(options.gpuid, vec![0]);
        assert_eq!(options.save, "best_model");
        assert!(options.augmentation);
        assert!(options.load.is_none());
    }

    #[test]
    fn short_aliases_are_accepted() {
        let (options, _) = parse(&["--nt", "ResNet", "-lr", "0.01", "--optimizer", "SGD"]);

        assert_eq!(options.network_type, NetworkType::ResNet);
        assert_eq!(options.learning_rate, 0.01);
        assert_eq!(options.optimizer, OptimizerKind::Sgd);
    }

    #[test]
    fn underscore_flags_and_explicit_booleans() {
        let (options, _) = parse(&[
            "--network_type=ResNet",
            "--batch_size",
            "4",
            "--learning_rate",
            "0.5",
            "--augmentation",
            "false",
            "--optimizer",
            "Adadelta",
        ]);

        assert_eq!(options.network_type, NetworkType::ResNet);
        assert_eq!(options.batch_size, 4);
        assert_eq!(options.learning_rate, 0.5);
        assert!(!options.augmentation);
        assert_eq!(options.optimizer, OptimizerKind::Adadelta);
    }

    #[test]
    fn bare_gpuid_means_host_compute() {
        let (options, _) = parse(&["--gpuid"]);
        assert!(options.gpuid.is_empty());

        let (options, _) = parse(&["--gpuid", "1", "3"]);
        assert_eq!(options.gpuid, vec![1, 3]);
    }

    #[test]
    fn unknown_arguments_are_collected_not_fatal() {
        let (options, unknown) = parse(&["--dropout", "0.3", "--epochs", "2", "--verbose=1"]);

        assert_eq!(options.epochs, 2);
        assert_eq!(unknown, vec!["--dropout", "0.3", "--verbose=1"]);
    }

    #[test]
    fn invalid_choices_still_fail() {
        let argv = ["train", "--optimizer", "RMSprop"];

        let err = Options::parse_known(argv).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Options::parse_known(["train", "--batch_size", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let (options, _) = parse(&["--batch_size", "1"]);
        assert_eq!(options.batch_size, 1);
    }

    #[test]
    fn config_carries_every_option() {
        let (options, _) = parse(&["--load", "ckpt.bin", "--save", "run1", "--epochs", "3"]);

        let config = options.to_config();

        assert_eq!(config.load_checkpoint.as_deref(), Some("ckpt.bin"));
        assert_eq!(config.save_prefix, "run1");
        assert_eq!(config.epochs, 3);
        assert_eq!(config.image_root, "./Image");
    }
}
