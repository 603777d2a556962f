//! PatchGAN discriminator for (height map, vegetation map) pairs
//!
//! The discriminator scores overlapping patches of the concatenated source
//! and target images rather than the whole image, so its output is a
//! (N, 1, patch_h, patch_w) grid of logits.
//!
//! Convolution weights and BatchNorm parameters live in two different
//! variable stores: the composite generator update freezes the former and
//! keeps training the latter.

use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, nn::ModuleT, Device, Kind, Tensor};

use super::layers::{down_config, leaky_relu, same_pad, unpadded_config};
use crate::error::{Error, Result};

/// Discriminator network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscriminatorConfig {
    /// Channels of the concatenated (source, target) input
    pub in_channels: i64,
    /// Filters of the stride-2 blocks; the first block has no BatchNorm
    pub filters: Vec<i64>,
    /// Filters of the stride-1 block before the logit layer
    pub final_filters: i64,
    /// Square kernel size; must be even
    pub kernel_size: i64,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            in_channels: 6,
            filters: vec![16, 32, 64, 128],
            final_filters: 128,
            kernel_size: 8,
        }
    }
}

impl DiscriminatorConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.filters.is_empty() {
            return Err(Error::Config("discriminator needs at least one stride-2 block".into()));
        }
        if self.kernel_size < 2 || self.kernel_size % 2 != 0 {
            return Err(Error::Config(format!(
                "discriminator kernel size must be even and >= 2, got {}",
                self.kernel_size
            )));
        }
        let any_empty = self.filters.iter().any(|&f| f <= 0);
        if self.in_channels <= 0 || self.final_filters <= 0 || any_empty {
            return Err(Error::Config("discriminator channel counts must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct DownBlock {
    conv: nn::Conv2D,
    bn: Option<nn::BatchNorm>,
}

/// Discriminator network
#[derive(Debug)]
pub struct Discriminator {
    config: DiscriminatorConfig,
    blocks: Vec<DownBlock>,
    conv_final: nn::Conv2D,
    bn_final: nn::BatchNorm,
    output: nn::Conv2D,
}

impl Discriminator {
    /// Create a new Discriminator network
    ///
    /// # Arguments
    ///
    /// * `conv_vs` - Path holding the convolution weights
    /// * `norm_vs` - Path holding the BatchNorm parameters
    /// * `config` - Layer configuration
    pub fn new(conv_vs: &nn::Path, norm_vs: &nn::Path, config: DiscriminatorConfig) -> Self {
        let k = config.kernel_size;

        let mut blocks = Vec::with_capacity(config.filters.len());
        let mut in_c = config.in_channels;
        for (i, &filters) in config.filters.iter().enumerate() {
            let path = conv_vs / format!("conv{}", i + 1);
            let conv = nn::conv2d(path, in_c, filters, k, down_config(k));
            let bn = (i > 0).then(|| {
                nn::batch_norm2d(norm_vs / format!("bn{}", i + 1), filters, Default::default())
            });
            blocks.push(DownBlock { conv, bn });
            in_c = filters;
        }

        let final_c = config.final_filters;
        let conv_final = nn::conv2d(conv_vs / "conv_final", in_c, final_c, k, unpadded_config());
        let bn_final = nn::batch_norm2d(norm_vs / "bn_final", final_c, Default::default());
        let output = nn::conv2d(conv_vs / "output", final_c, 1, k, unpadded_config());

        Self {
            config,
            blocks,
            conv_final,
            bn_final,
            output,
        }
    }

    /// Patch logits for a (source, target) pair, both (N, C, H, W)
    pub fn forward_t(&self, source: &Tensor, target: &Tensor, train: bool) -> Tensor {
        let xs = Tensor::cat(&[source, target], 1);
        self.forward_joined(&xs, train)
    }

    fn forward_joined(&self, xs: &Tensor, train: bool) -> Tensor {
        let k = self.config.kernel_size;
        let mut x = xs.shallow_clone();

        for block in &self.blocks {
            x = block.conv.forward(&x);
            if let Some(bn) = &block.bn {
                x = bn.forward_t(&x, train);
            }
            x = leaky_relu(&x);
        }

        x = self.conv_final.forward(&same_pad(&x, k));
        x = leaky_relu(&self.bn_final.forward_t(&x, train));

        self.output.forward(&same_pad(&x, k))
    }

    /// (patch_h, patch_w) produced for an input of `height` x `width`.
    ///
    /// Measured by running a dummy batch through the network.
    pub fn output_shape(&self, height: i64, width: i64, device: Device) -> Result<(i64, i64)> {
        let dummy = Tensor::zeros(
            [1, self.config.in_channels, height, width],
            (Kind::Float, device),
        );
        let size = tch::no_grad(|| self.forward_joined(&dummy, false)).size();
        match size.as_slice() {
            [_, 1, ph, pw] if *ph > 0 && *pw > 0 => Ok((*ph, *pw)),
            other => Err(Error::shape(format!(
                "discriminator produced {:?} for a {}x{} input",
                other, height, width
            ))),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &DiscriminatorConfig {
        &self.config
    }
}

impl ModuleT for Discriminator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.forward_joined(xs, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::VarStore;

    fn build(config: DiscriminatorConfig) -> (VarStore, VarStore, Discriminator) {
        let conv_vs = VarStore::new(Device::Cpu);
        let norm_vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(&conv_vs.root(), &norm_vs.root(), config);
        (conv_vs, norm_vs, disc)
    }

    #[test]
    fn test_patch_shape_default() {
        let (_c, _n, disc) = build(DiscriminatorConfig::default());
        assert_eq!(disc.output_shape(256, 256, Device::Cpu).unwrap(), (16, 16));
        assert_eq!(disc.output_shape(64, 128, Device::Cpu).unwrap(), (4, 8));
    }

    #[test]
    fn test_forward_pair() {
        let config = DiscriminatorConfig {
            filters: vec![4, 8],
            final_filters: 8,
            kernel_size: 4,
            ..DiscriminatorConfig::default()
        };
        let (_c, _n, disc) = build(config);
        let src = Tensor::randn([2, 3, 16, 16], (Kind::Float, Device::Cpu));
        let tgt = Tensor::randn([2, 3, 16, 16], (Kind::Float, Device::Cpu));

        let logits = disc.forward_t(&src, &tgt, true);
        assert_eq!(logits.size(), vec![2, 1, 4, 4]);
    }

    #[test]
    fn test_batch_norm_lives_in_norm_store() {
        let (conv_vs, norm_vs, _disc) = build(DiscriminatorConfig::default());
        let conv_names: Vec<String> = conv_vs.variables().into_keys().collect();
        let norm_names: Vec<String> = norm_vs.variables().into_keys().collect();

        assert!(conv_names.iter().all(|n| !n.contains("bn")));
        assert!(norm_names.iter().all(|n| n.contains("bn")));
        // bn2..bn4 plus bn_final, weight and bias each
        assert_eq!(norm_vs.trainable_variables().len(), 8);
    }
}
