//! Training loop implementation for Pix2Pix
//!
//! Every step updates the discriminator twice (real pair, then generated
//! pair) and the generator once through the composite network, in which
//! the discriminator convolutions are frozen.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tch::Tensor;
use tracing::{debug, info, warn};

use super::losses::{discriminator_loss, generator_loss, GeneratorLoss};
use super::metrics::{EMATracker, StepLosses, TrainingMetrics};
use crate::data::{AugmentConfig, DataLoader, PairedAugmenter, PairedDataset};
use crate::error::{Error, Result};
use crate::model::{to_nchw_tensor, Pix2Pix, Pix2PixOptimizers};
use crate::utils::save_checkpoint;

/// Training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub epochs: usize,
    /// Samples per step
    pub batch_size: usize,
    /// Replace the dataset with an augmented draw before training
    pub augment: bool,
    /// Size of the augmented draw as a multiple of the dataset size
    pub augment_factor: usize,
    /// Augmentation parameters
    pub augmentation: AugmentConfig,
    /// Save checkpoint every N epochs' worth of steps (0 disables)
    pub checkpoint_every: usize,
    /// Directory to save checkpoints
    pub checkpoint_dir: String,
    /// Pairs shown in each checkpoint's sample grid
    pub checkpoint_samples: usize,
    /// Seed of the batch sampler
    pub seed: u64,
    /// Show a progress bar on stderr
    pub progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            augment: true,
            augment_factor: 10,
            augmentation: AugmentConfig::default(),
            checkpoint_every: 10,
            checkpoint_dir: "checkpoints".to_string(),
            checkpoint_samples: 3,
            seed: 42,
            progress: true,
        }
    }
}

impl TrainingConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be > 0".into()));
        }
        if self.augment && self.augment_factor == 0 {
            return Err(Error::Config("augment factor must be > 0".into()));
        }
        Ok(())
    }
}

/// Step schedule derived from the dataset size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingPlan {
    /// Samples after optional augmentation
    pub num_samples: usize,
    pub batches_per_epoch: usize,
    pub total_steps: usize,
    /// Steps between checkpoints, 0 when disabled
    pub checkpoint_interval: usize,
}

/// Pix2Pix Trainer
pub struct Trainer {
    config: TrainingConfig,
    metrics: TrainingMetrics,
}

impl Trainer {
    /// Create a new trainer
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            metrics: TrainingMetrics::new(),
        }
    }

    /// Schedule for a dataset of `num_samples` pairs (before augmentation)
    pub fn plan(&self, num_samples: usize) -> TrainingPlan {
        let num_samples = if self.config.augment {
            num_samples * self.config.augment_factor
        } else {
            num_samples
        };
        let batches_per_epoch = if self.config.batch_size == 0 {
            0
        } else {
            num_samples / self.config.batch_size
        };
        TrainingPlan {
            num_samples,
            batches_per_epoch,
            total_steps: batches_per_epoch * self.config.epochs,
            checkpoint_interval: batches_per_epoch * self.config.checkpoint_every,
        }
    }

    /// Train the Pix2Pix model
    ///
    /// # Arguments
    ///
    /// * `model` - Pix2Pix model to train
    /// * `dataset` - Paired (input, target) images in (N, H, W, C) layout
    ///
    /// # Returns
    ///
    /// Metrics of every step of this run
    pub fn train(
        &mut self,
        model: &mut Pix2Pix,
        dataset: &PairedDataset,
    ) -> Result<&TrainingMetrics> {
        self.config.validate()?;
        self.metrics = TrainingMetrics::new();

        if dataset.inputs.shape() != dataset.targets.shape() {
            return Err(Error::shape(format!(
                "inputs {:?} and targets {:?} differ in shape",
                dataset.inputs.shape(),
                dataset.targets.shape()
            )));
        }

        let plan = self.plan(dataset.len());
        if plan.total_steps == 0 {
            warn!(
                "Nothing to train: {} samples, batch size {}, {} epochs",
                plan.num_samples, self.config.batch_size, self.config.epochs
            );
            return Ok(&self.metrics);
        }

        let (h, w) = dataset.image_dim();
        if (h as i64, w as i64) != model.image_dim() {
            return Err(Error::shape(format!(
                "dataset images are {}x{}, model was built for {:?}",
                h,
                w,
                model.image_dim()
            )));
        }

        let data = if self.config.augment {
            let mut augmenter = PairedAugmenter::new(
                dataset.clone(),
                plan.num_samples,
                self.config.augmentation.clone(),
            )?;
            augmenter.draw()
        } else {
            dataset.clone()
        };
        let mut loader = DataLoader::new(data, self.config.batch_size, self.config.seed);
        let mut opts = model.optimizers()?;

        info!(
            "Starting training for {} epochs, {} batches per epoch ({} steps)",
            self.config.epochs, plan.batches_per_epoch, plan.total_steps
        );

        let pb = if self.config.progress {
            ProgressBar::new(plan.total_steps as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }

        let mut gen_ema = EMATracker::new(0.1);
        for step in 0..plan.total_steps {
            let batch = loader.next_batch();
            let losses = train_step(model, &mut opts, &batch)?;
            self.metrics.record_step(losses);
            gen_ema.update(losses.g_total);

            debug!(
                "step {}: d_real={:.3} d_fake={:.3} g={:.3}",
                step + 1,
                losses.d_real,
                losses.d_fake,
                losses.g_total
            );
            pb.set_message(format!(
                "D: {:.3}/{:.3}, G: {:.3}",
                losses.d_real,
                losses.d_fake,
                gen_ema.value()
            ));
            pb.inc(1);

            let done = step + 1;
            if done % plan.batches_per_epoch == 0 {
                let epoch = done / plan.batches_per_epoch;
                info!(
                    "Epoch {}/{}: D_loss={:.4}, G_loss={:.4}",
                    epoch,
                    self.config.epochs,
                    self.metrics.disc_loss_ma(plan.batches_per_epoch),
                    self.metrics.gen_loss_ma(plan.batches_per_epoch)
                );
                if self.metrics.check_mode_collapse(plan.batches_per_epoch) {
                    warn!("Possible mode collapse detected! Consider adjusting learning rates.");
                }
            }

            if plan.checkpoint_interval > 0 && done % plan.checkpoint_interval == 0 {
                let samples = loader.sample(self.config.checkpoint_samples.max(1));
                if let Err(e) = save_checkpoint(
                    &model.generator,
                    &samples,
                    &self.metrics,
                    done,
                    done / plan.batches_per_epoch,
                    &self.config.checkpoint_dir,
                ) {
                    warn!("Failed to save checkpoint: {}", e);
                }
            }
        }

        pb.finish_with_message("done");
        Ok(&self.metrics)
    }

    /// Get training metrics
    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    /// Get configuration
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }
}

fn discriminator_update(
    model: &Pix2Pix,
    opts: &mut Pix2PixOptimizers,
    input: &Tensor,
    target: &Tensor,
    labels: &Tensor,
) -> f64 {
    let logits = model.discriminator.forward_t(input, target, true);
    let loss = discriminator_loss(&logits, labels, model.config().disc_loss_weight);

    opts.discriminator.zero_grad();
    opts.discriminator_norm.zero_grad();
    loss.backward();
    opts.discriminator.step();
    opts.discriminator_norm.step();

    loss.double_value(&[])
}

/// Single training step on one batch of real pairs
pub fn train_step(
    model: &mut Pix2Pix,
    opts: &mut Pix2PixOptimizers,
    batch: &PairedDataset,
) -> Result<StepLosses> {
    let device = model.device();
    let input = to_nchw_tensor(&batch.inputs, device);
    let target = to_nchw_tensor(&batch.targets, device);
    let n = input.size()[0];

    let real_labels = model.patch_labels(n, 1.0);
    let fake_labels = model.patch_labels(n, 0.0);

    let fake = tch::no_grad(|| model.generator.forward(&input));
    if fake.size() != target.size() {
        return Err(Error::shape(format!(
            "generated batch {:?} does not match target batch {:?}",
            fake.size(),
            target.size()
        )));
    }

    // Discriminator: real pairs, then generated pairs
    let d_real = discriminator_update(model, opts, &input, &target, &real_labels);
    let d_fake = discriminator_update(model, opts, &input, &fake, &fake_labels);

    let g_loss = generator_update(model, opts, &input, &target, &real_labels);

    Ok(StepLosses {
        d_real,
        d_fake,
        g_total: g_loss.total.double_value(&[]),
        g_adversarial: g_loss.adversarial.double_value(&[]),
        g_l1: g_loss.l1.double_value(&[]),
    })
}

/// Generator update through the composite network. The discriminator
/// convolutions are frozen for the update; its BatchNorm keeps training.
fn generator_update(
    model: &mut Pix2Pix,
    opts: &mut Pix2PixOptimizers,
    input: &Tensor,
    target: &Tensor,
    real_labels: &Tensor,
) -> GeneratorLoss {
    let config = model.config().clone();
    model.freeze_discriminator();
    let generated = model.generator.forward(input);
    let logits = model.discriminator.forward_t(input, &generated, true);
    let g_loss = generator_loss(
        &logits,
        real_labels,
        &generated,
        target,
        config.adversarial_weight,
        config.l1_weight,
    );

    opts.generator.zero_grad();
    opts.composite_norm.zero_grad();
    g_loss.total.backward();
    opts.generator.step();
    opts.composite_norm.step();
    model.unfreeze_discriminator();

    g_loss
}
