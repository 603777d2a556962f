//! U-Net generator mapping height rasters to vegetation rasters
//!
//! Architecture:
//! 1. Encoder: stride-2 convolutions with BatchNorm (skipped on the first
//!    block) and LeakyReLU
//! 2. Bottleneck: stride-2 convolution with ReLU, no normalisation
//! 3. Decoder: stride-2 transposed convolutions with BatchNorm, optional
//!    dropout, concatenation with the mirrored encoder output, ReLU
//! 4. Output: transposed convolution back to full size with Tanh
//!
//! BatchNorm always normalises with batch statistics and dropout stays on,
//! in training and in inference alike.

use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, nn::ModuleT, Tensor};

use super::layers::{down_config, leaky_relu, up_config};
use crate::error::{Error, Result};

/// Generator network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Channels of the input image
    pub in_channels: i64,
    /// Channels of the generated image
    pub out_channels: i64,
    /// Filters of each encoder block; decoders mirror them in reverse
    pub encoder_filters: Vec<i64>,
    /// Filters of the bottleneck convolution
    pub bottleneck_filters: i64,
    /// Square kernel size; must be even
    pub kernel_size: i64,
    /// Dropout rate of the leading decoder blocks
    pub dropout: f64,
    /// How many decoder blocks (from the bottleneck up) apply dropout
    pub dropout_blocks: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            out_channels: 3,
            encoder_filters: vec![16, 32, 64, 128, 128],
            bottleneck_filters: 128,
            kernel_size: 8,
            dropout: 0.5,
            dropout_blocks: 1,
        }
    }
}

impl GeneratorConfig {
    /// Factor by which the bottleneck is smaller than the input
    pub fn downsampling(&self) -> i64 {
        1 << (self.encoder_filters.len() + 1)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.encoder_filters.is_empty() {
            return Err(Error::Config("generator needs at least one encoder block".into()));
        }
        if self.kernel_size < 2 || self.kernel_size % 2 != 0 {
            return Err(Error::Config(format!(
                "generator kernel size must be even and >= 2, got {}",
                self.kernel_size
            )));
        }
        if self.in_channels <= 0
            || self.out_channels <= 0
            || self.bottleneck_filters <= 0
            || self.encoder_filters.iter().any(|&f| f <= 0)
        {
            return Err(Error::Config("generator channel counts must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!("dropout must be in [0, 1), got {}", self.dropout)));
        }
        Ok(())
    }

    /// Check that an image of `height` x `width` fits the encoder/decoder ladder
    pub fn check_input(&self, height: i64, width: i64) -> Result<()> {
        let factor = self.downsampling();
        if height <= 0 || width <= 0 || height % factor != 0 || width % factor != 0 {
            return Err(Error::shape(format!(
                "generator needs height and width divisible by {}, got {}x{}",
                factor, height, width
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct EncoderBlock {
    conv: nn::Conv2D,
    bn: Option<nn::BatchNorm>,
}

#[derive(Debug)]
struct DecoderBlock {
    conv: nn::ConvTranspose2D,
    bn: nn::BatchNorm,
    dropout: Option<f64>,
}

/// Generator network
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    encoders: Vec<EncoderBlock>,
    bottleneck: nn::Conv2D,
    decoders: Vec<DecoderBlock>,
    output: nn::ConvTranspose2D,
}

impl Generator {
    /// Create a new Generator network
    pub fn new(vs: &nn::Path, config: GeneratorConfig) -> Self {
        let k = config.kernel_size;

        let mut encoders = Vec::with_capacity(config.encoder_filters.len());
        let mut in_c = config.in_channels;
        for (i, &filters) in config.encoder_filters.iter().enumerate() {
            let conv = nn::conv2d(vs / format!("enc{}", i + 1), in_c, filters, k, down_config(k));
            let bn = (i > 0).then(|| {
                nn::batch_norm2d(vs / format!("enc{}_bn", i + 1), filters, Default::default())
            });
            encoders.push(EncoderBlock { conv, bn });
            in_c = filters;
        }

        let bottleneck_c = config.bottleneck_filters;
        let bottleneck = nn::conv2d(vs / "bottleneck", in_c, bottleneck_c, k, down_config(k));

        let mut decoders = Vec::with_capacity(encoders.len());
        let mut in_c = config.bottleneck_filters;
        for (j, &filters) in config.encoder_filters.iter().rev().enumerate() {
            let path = vs / format!("dec{}", j + 1);
            let conv = nn::conv_transpose2d(path, in_c, filters, k, up_config(k));
            let bn_path = vs / format!("dec{}_bn", j + 1);
            let bn = nn::batch_norm2d(bn_path, filters, Default::default());
            let dropout = (j < config.dropout_blocks && config.dropout > 0.0)
                .then_some(config.dropout);
            decoders.push(DecoderBlock { conv, bn, dropout });
            // concatenated with the mirrored encoder output of equal width
            in_c = filters * 2;
        }

        let out_c = config.out_channels;
        let output = nn::conv_transpose2d(vs / "output", in_c, out_c, k, up_config(k));

        Self {
            config,
            encoders,
            bottleneck,
            decoders,
            output,
        }
    }

    /// Map a batch (N, in_channels, H, W) to (N, out_channels, H, W) in [-1, 1]
    pub fn generate(&self, input: &Tensor) -> Tensor {
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = input.shallow_clone();

        for block in &self.encoders {
            x = block.conv.forward(&x);
            if let Some(bn) = &block.bn {
                x = bn.forward_t(&x, true);
            }
            x = leaky_relu(&x);
            skips.push(x.shallow_clone());
        }

        x = self.bottleneck.forward(&x).relu();

        for (block, skip) in self.decoders.iter().zip(skips.iter().rev()) {
            x = block.conv.forward(&x);
            x = block.bn.forward_t(&x, true);
            if let Some(p) = block.dropout {
                x = x.dropout(p, true);
            }
            x = Tensor::cat(&[&x, skip], 1).relu();
        }

        self.output.forward(&x).tanh()
    }

    /// Get configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

impl Module for Generator {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.generate(xs)
    }
}
