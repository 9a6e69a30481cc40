use std::{path::Path, sync::Arc};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig},
    prelude::*,
    tensor::{
        Int,
        activation::{log_softmax, softmax},
        backend::AutodiffBackend,
    },
};
use tracing::{debug, info};

use crate::{
    alexnet::AlexNet3dConfig,
    checkpoint::{self, Checkpointer},
    config::{NetworkType, OptimizerKind, TrainingConfig},
    data::{VolumeBatch, VolumeBatcher, VolumeItem},
    dataset::{VolumeDataset, VolumeTransform},
    error::TrainError,
    model::VolumeClassifier,
    optim::AdadeltaConfig,
    resnet::ResNet3dConfig,
};

/// Mean negative log-likelihood of `targets` under `log_probs`.
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    log_probs.gather(1, targets.unsqueeze_dim(1)).neg().mean()
}

/// Views `[n, D, H, W]` images as `[batch_size, 1, D, H, W]`.
///
/// Uses the configured batch size, not the one in the tensor, so a short
/// final batch is rejected instead of silently reshaped.
pub fn add_channel_dim<B: Backend>(
    images: Tensor<B, 4>,
    batch_size: usize,
    volume_shape: [usize; 3],
) -> Result<Tensor<B, 5>, TrainError> {
    let [depth, height, width] = volume_shape;
    let actual = images.shape().num_elements();
    if actual != batch_size * depth * height * width {
        return Err(TrainError::Reshape {
            batch_size,
            volume_shape,
            actual,
        });
    }

    Ok(images.reshape([batch_size, 1, depth, height, width]))
}

pub struct BatchOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub correct: usize,
    pub len: usize,
}

impl<B: Backend> BatchOutput<B> {
    pub fn accuracy(&self) -> f64 {
        self.correct as f64 / self.len as f64
    }
}

/// Summed loss and correct predictions of one phase of one epoch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunningStats {
    pub loss_sum: f64,
    pub correct: usize,
    pub batches: usize,
    pub samples: usize,
}

impl RunningStats {
    pub fn record(&mut self, loss: f64, correct: usize, samples: usize) {
        self.loss_sum += loss;
        self.correct += correct;
        self.batches += 1;
        self.samples += samples;
    }

    /// A loader that stops early (an unreadable volume ends its iterator)
    /// must not pass for a finished epoch.
    pub fn ensure_complete(&self, phase: &'static str, dataset_len: usize) -> Result<(), TrainError> {
        if self.samples == dataset_len {
            Ok(())
        } else {
            Err(TrainError::IncompleteEpoch {
                phase,
                expected: dataset_len,
                actual: self.samples,
            })
        }
    }

    /// Divides by the nominal batch count, so a short final batch weighs as
    /// much as a full one.
    pub fn average_loss(&self, dataset_len: usize, batch_size: usize) -> f64 {
        self.loss_sum / (dataset_len as f64 / batch_size as f64)
    }

    pub fn accuracy(&self, dataset_len: usize) -> f64 {
        self.correct as f64 / dataset_len as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
    pub checkpoint: std::path::PathBuf,
}

pub struct TrainingSummary<M> {
    pub model: M,
    pub epochs: Vec<EpochReport>,
}

#[derive(Debug, Clone)]
pub struct Trainer {
    epochs: usize,
    batch_size: usize,
    volume_shape: [usize; 3],
    learning_rate: f64,
    estop: f64,
}

impl Trainer {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            epochs: config.epochs,
            batch_size: config.batch_size,
            volume_shape: config.volume_shape,
            learning_rate: config.learning_rate,
            estop: config.estop,
        }
    }

    fn forward_batch<B: Backend, M: VolumeClassifier<B>>(
        &self,
        model: &M,
        batch: VolumeBatch<B>,
    ) -> Result<BatchOutput<B>, TrainError> {
        let images = add_channel_dim(batch.images, self.batch_size, self.volume_shape)?;
        let targets = batch.targets;
        let len = targets.dims()[0];

        let output = model.forward(images);
        let log_probs = log_softmax(output.clone(), 1);
        let probs = softmax(output, 1);
        let loss = nll_loss(log_probs, targets.clone());

        let predicted = probs.argmax(1).squeeze::<1>(1);
        let correct = predicted
            .equal(targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>() as usize;

        Ok(BatchOutput { loss, correct, len })
    }

    /// Trains for up to `epochs` epochs, validating and checkpointing after
    /// each one, and stops early once the validation loss settles within
    /// `estop`.
    pub fn fit<B, M, O>(
        &self,
        mut model: M,
        mut optim: O,
        train: Arc<dyn DataLoader<B, VolumeBatch<B>>>,
        valid: Arc<dyn DataLoader<B::InnerBackend, VolumeBatch<B::InnerBackend>>>,
        checkpointer: &Checkpointer,
    ) -> Result<TrainingSummary<M>, TrainError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + VolumeClassifier<B>,
        M::InnerModule: VolumeClassifier<B::InnerBackend>,
        O: Optimizer<M, B>,
    {
        if self.batch_size == 0 {
            return Err(TrainError::ZeroBatchSize);
        }
        let train_len = train.num_items();
        let valid_len = valid.num_items();
        if train_len == 0 {
            return Err(TrainError::EmptyDataset("training"));
        }
        if valid_len == 0 {
            return Err(TrainError::EmptyDataset("validation"));
        }

        let mut reports = Vec::with_capacity(self.epochs);
        let mut last_valid_loss = f64::INFINITY;

        for epoch in 0..self.epochs {
            info!("At {epoch}-th epoch.");

            let mut train_stats = RunningStats::default();
            for (iteration, batch) in train.iter().enumerate() {
                let output = self.forward_batch(&model, batch)?;
                let loss = output.loss.clone().into_scalar().elem::<f64>();
                debug!("loss at batch {iteration}: {loss}");
                debug!("accuracy at batch {iteration}: {}", output.accuracy());
                train_stats.record(loss, output.correct, output.len);

                let grads = GradientsParams::from_grads(output.loss.backward(), &model);
                model = optim.step(self.learning_rate, model, grads);
            }
            debug!("{} training batches in epoch {epoch}", train_stats.batches);
            train_stats.ensure_complete("training", train_len)?;
            let train_loss = train_stats.average_loss(train_len, self.batch_size);
            let train_accuracy = train_stats.accuracy(train_len);
            info!("Average training loss is {train_loss} at the end of epoch {epoch}");
            info!("Average training accuracy is {train_accuracy} at the end of epoch {epoch}");

            let model_valid = model.valid();
            let mut valid_stats = RunningStats::default();
            for batch in valid.iter() {
                let output = self.forward_batch(&model_valid, batch)?;
                let loss = output.loss.into_scalar().elem::<f64>();
                valid_stats.record(loss, output.correct, output.len);
            }
            valid_stats.ensure_complete("validation", valid_len)?;
            let valid_loss = valid_stats.average_loss(valid_len, self.batch_size);
            let valid_accuracy = valid_stats.accuracy(valid_len);
            info!("Average validation loss is {valid_loss} at the end of epoch {epoch}");
            info!("Average validation accuracy is {valid_accuracy} at the end of epoch {epoch}");

            let checkpoint = checkpointer.save::<B, M>(&model, valid_loss, epoch)?;
            reports.push(EpochReport {
                epoch,
                train_loss,
                train_accuracy,
                valid_loss,
                valid_accuracy,
                checkpoint,
            });

            if (last_valid_loss - valid_loss).abs() < self.estop {
                info!(
                    "Validation loss changed by less than {} after epoch {epoch}, stopping",
                    self.estop
                );
                break;
            }
            last_valid_loss = valid_loss;
        }

        Ok(TrainingSummary {
            model,
            epochs: reports,
        })
    }
}

pub fn build_loader<B: Backend>(
    batcher: VolumeBatcher,
    dataset: impl Dataset<VolumeItem> + 'static,
    batch_size: usize,
    num_workers: usize,
    shuffle: Option<u64>,
    device: &B::Device,
) -> Arc<dyn DataLoader<B, VolumeBatch<B>>> {
    let mut builder =
        DataLoaderBuilder::<B, VolumeItem, VolumeBatch<B>>::new(batcher)
            .batch_size(batch_size)
            .set_device(device.clone());
    // Zero workers means loading on the calling thread.
    if num_workers > 0 {
        builder = builder.num_workers(num_workers);
    }
    if let Some(seed) = shuffle {
        builder = builder.shuffle(seed);
    }

    builder.build(dataset)
}

/// Loads both manifests, builds the selected network and optimizer on
/// `device`, and trains.
pub fn run<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: B::Device,
) -> Result<Vec<EpochReport>, TrainError> {
    config.save(config.config_path())?;
    B::seed(config.seed);

    let (train_dataset, valid_dataset) = load_datasets(config)?;
    info!(
        "{} training and {} validation volumes",
        train_dataset.len(),
        valid_dataset.len()
    );

    let train = build_loader::<B>(
        VolumeBatcher::new(),
        train_dataset,
        config.batch_size,
        config.num_workers,
        training_shuffle(config),
        &device,
    );
    let valid = build_loader::<B::InnerBackend>(
        VolumeBatcher::new(),
        valid_dataset,
        config.batch_size,
        config.num_workers,
        None,
        &device,
    );

    let trainer = Trainer::from_config(config);
    let checkpointer = Checkpointer::new(config.save_prefix.clone());

    match config.network {
        NetworkType::AlexNet => {
            let model = AlexNet3dConfig::new(config.num_classes).init::<B>(&device);
            fit_with_optimizer(&trainer, config, model, train, valid, &checkpointer, &device)
        }
        NetworkType::ResNet => {
            let model = ResNet3dConfig::new(config.num_classes).init::<B>(&device);
            fit_with_optimizer(&trainer, config, model, train, valid, &checkpointer, &device)
        }
    }
}

/// Training and validation datasets. Only training volumes are mirrored.
pub fn load_datasets(config: &TrainingConfig) -> Result<(VolumeDataset, VolumeDataset), TrainError> {
    let train = VolumeDataset::new(
        &config.image_root,
        &config.train_manifest,
        VolumeTransform::new(config.volume_shape).with_mirror(config.augmentation),
    )?;
    let valid = VolumeDataset::new(
        &config.image_root,
        &config.test_manifest,
        VolumeTransform::new(config.volume_shape),
    )?;

    Ok((train, valid))
}

/// Shuffle seed for the training loader. Restored runs walk the training
/// manifest in order.
pub fn training_shuffle(config: &TrainingConfig) -> Option<u64> {
    config.load_checkpoint.is_none().then_some(config.seed)
}

fn fit_with_optimizer<B, M>(
    trainer: &Trainer,
    config: &TrainingConfig,
    model: M,
    train: Arc<dyn DataLoader<B, VolumeBatch<B>>>,
    valid: Arc<dyn DataLoader<B::InnerBackend, VolumeBatch<B::InnerBackend>>>,
    checkpointer: &Checkpointer,
    device: &B::Device,
) -> Result<Vec<EpochReport>, TrainError>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + VolumeClassifier<B>,
    M::InnerModule: VolumeClassifier<B::InnerBackend>,
{
    let model = match &config.load_checkpoint {
        Some(path) => checkpoint::load::<B, M>(model, Path::new(path), device)?,
        None => model,
    };

    let summary = match config.optimizer {
        OptimizerKind::Sgd => {
            let optim = SgdConfig::new().init::<B, M>();
            trainer.fit(model, optim, train, valid, checkpointer)?
        }
        OptimizerKind::Adadelta => {
            let optim = AdadeltaConfig::new().init::<B, M>();
            trainer.fit(model, optim, train, valid, checkpointer)?
        }
        OptimizerKind::Adam => {
            let optim = AdamConfig::new().init::<B, M>();
            trainer.fit(model, optim, train, valid, checkpointer)?
        }
    };

    Ok(summary.epochs)
}
