//! Pix2Pix wrapper combining the U-Net generator and the PatchGAN discriminator
//!
//! [`GeneratorModel`] is the part that gets persisted and served.
//! [`Pix2Pix`] adds a fresh discriminator around it for a training run.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device, Kind, Tensor};
use tracing::debug;

use super::convert::{from_nchw_tensor, to_nchw_tensor};
use super::discriminator::{Discriminator, DiscriminatorConfig};
use super::generator::{Generator, GeneratorConfig};
use crate::error::{Error, Result};

/// Architecture sidecar stored next to a weights file
pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}

/// Generator network together with its weights and device
pub struct GeneratorModel {
    vs: VarStore,
    generator: Generator,
    device: Device,
}

impl GeneratorModel {
    /// Create a freshly initialised generator
    pub fn new(config: GeneratorConfig, device: Device) -> Result<Self> {
        config.validate()?;
        let vs = VarStore::new(device);
        let generator = Generator::new(&vs.root(), config);
        Ok(Self { vs, generator, device })
    }

    /// Load weights from `path` and the architecture from its JSON sidecar
    pub fn load(path: impl AsRef<Path>, device: Device) -> Result<Self> {
        let path = path.as_ref();
        let model_load = |reason: String| Error::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(model_load("weights file not found".to_string()));
        }
        let sidecar = sidecar_path(path);
        let content = fs::read_to_string(&sidecar)
            .map_err(|e| model_load(format!("cannot read {}: {}", sidecar.display(), e)))?;
        let config: GeneratorConfig = serde_json::from_str(&content)
            .map_err(|e| model_load(format!("bad architecture in {}: {}", sidecar.display(), e)))?;
        config
            .validate()
            .map_err(|e| model_load(e.to_string()))?;

        let mut model = Self::new(config, device)?;
        model
            .vs
            .load(path)
            .map_err(|e| model_load(format!("weights do not match architecture: {}", e)))?;

        debug!("loaded generator from {}", path.display());
        Ok(model)
    }

    /// Save weights to `path` and the architecture to its JSON sidecar
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        self.vs.save(path)?;
        let content = serde_json::to_string_pretty(self.generator.config())?;
        fs::write(sidecar_path(path), content)?;
        Ok(())
    }

    /// Independent copy with the same architecture and weights
    pub fn try_clone(&self) -> Result<Self> {
        let mut copy = Self::new(self.config().clone(), self.device)?;
        copy.vs.copy(&self.vs)?;
        Ok(copy)
    }

    /// Run the generator on an NCHW tensor
    pub fn forward(&self, input: &Tensor) -> Tensor {
        self.generator.generate(input)
    }

    /// Predict (N, H, W, out_channels) outputs for (N, H, W, in_channels) inputs
    pub fn predict(&self, inputs: &Array4<f32>) -> Result<Array4<f32>> {
        let (_, h, w, c) = inputs.dim();
        let config = self.config();
        if c as i64 != config.in_channels {
            return Err(Error::shape(format!(
                "generator expects {} channels, got {}",
                config.in_channels, c
            )));
        }
        config.check_input(h as i64, w as i64)?;

        let xs = to_nchw_tensor(inputs, self.device);
        let ys = tch::no_grad(|| self.generator.generate(&xs));
        from_nchw_tensor(&ys)
    }

    pub fn config(&self) -> &GeneratorConfig {
        self.generator.config()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }
}

/// Optimisation and loss settings of a Pix2Pix run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pix2PixConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    /// Weight of the adversarial term of the generator loss
    pub adversarial_weight: f64,
    /// Weight of the L1 reconstruction term of the generator loss
    pub l1_weight: f64,
    /// Scale applied to each discriminator loss
    pub disc_loss_weight: f64,
}

impl Default for Pix2PixConfig {
    fn default() -> Self {
        Self {
            learning_rate: 2e-4,
            beta1: 0.5,
            beta2: 0.999,
            adversarial_weight: 1.0,
            l1_weight: 100.0,
            disc_loss_weight: 0.5,
        }
    }
}

impl Pix2PixConfig {
    fn adam(&self) -> nn::Adam {
        nn::Adam {
            beta1: self.beta1,
            beta2: self.beta2,
            ..Default::default()
        }
    }
}

/// Optimizers of one training run
pub struct Pix2PixOptimizers {
    /// Generator weights
    pub generator: nn::Optimizer,
    /// Discriminator convolutions during discriminator updates
    pub discriminator: nn::Optimizer,
    /// Discriminator BatchNorm during discriminator updates
    pub discriminator_norm: nn::Optimizer,
    /// Discriminator BatchNorm during composite generator updates
    pub composite_norm: nn::Optimizer,
}

/// Generator plus a discriminator for adversarial training
pub struct Pix2Pix {
    pub generator: GeneratorModel,
    pub discriminator: Discriminator,
    /// Discriminator convolution weights, frozen during generator updates
    pub disc_vs: VarStore,
    /// Discriminator BatchNorm parameters, trained by both updates
    pub disc_norm_vs: VarStore,
    config: Pix2PixConfig,
    image_dim: (i64, i64),
    patch_shape: (i64, i64),
}

impl Pix2Pix {
    /// Wrap `generator` with a freshly initialised discriminator for
    /// `image_dim` = (height, width) images
    pub fn new(
        generator: GeneratorModel,
        disc_config: DiscriminatorConfig,
        config: Pix2PixConfig,
        image_dim: (i64, i64),
    ) -> Result<Self> {
        disc_config.validate()?;
        let gen_config = generator.config();
        let pair_channels = gen_config.in_channels + gen_config.out_channels;
        if disc_config.in_channels != pair_channels {
            return Err(Error::Config(format!(
                "discriminator takes {} channels but a (source, target) pair has {}",
                disc_config.in_channels, pair_channels
            )));
        }
        let (h, w) = image_dim;
        gen_config.check_input(h, w)?;

        let device = generator.device();
        let disc_vs = VarStore::new(device);
        let disc_norm_vs = VarStore::new(device);
        let discriminator = Discriminator::new(&disc_vs.root(), &disc_norm_vs.root(), disc_config);
        let patch_shape = discriminator.output_shape(h, w, device)?;
        debug!("discriminator patch shape {:?} for {}x{} images", patch_shape, h, w);

        Ok(Self {
            generator,
            discriminator,
            disc_vs,
            disc_norm_vs,
            config,
            image_dim,
            patch_shape,
        })
    }

    /// Build Adam optimizers for every trainable group
    pub fn optimizers(&self) -> Result<Pix2PixOptimizers> {
        let lr = self.config.learning_rate;
        Ok(Pix2PixOptimizers {
            generator: self.config.adam().build(self.generator.var_store(), lr)?,
            discriminator: self.config.adam().build(&self.disc_vs, lr)?,
            discriminator_norm: self.config.adam().build(&self.disc_norm_vs, lr)?,
            composite_norm: self.config.adam().build(&self.disc_norm_vs, lr)?,
        })
    }

    /// Constant patch label tensor of shape (batch, 1, patch_h, patch_w)
    pub fn patch_labels(&self, batch: i64, value: f64) -> Tensor {
        let (ph, pw) = self.patch_shape;
        Tensor::full([batch, 1, ph, pw], value, (Kind::Float, self.generator.device()))
    }

    /// Freeze the discriminator convolutions for a composite update
    pub fn freeze_discriminator(&mut self) {
        self.disc_vs.freeze();
    }

    pub fn unfreeze_discriminator(&mut self) {
        self.disc_vs.unfreeze();
    }

    pub fn patch_shape(&self) -> (i64, i64) {
        self.patch_shape
    }

    pub fn image_dim(&self) -> (i64, i64) {
        self.image_dim
    }

    pub fn config(&self) -> &Pix2PixConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.generator.device()
    }

    /// Drop the discriminator and keep the trained generator
    pub fn into_generator(self) -> GeneratorModel {
        self.generator
    }
}
