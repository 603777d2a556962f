//! Model module containing the conditional GAN components
//!
//! This module provides:
//! - U-Net generator mapping height maps to vegetation maps
//! - PatchGAN discriminator scoring (source, target) pairs
//! - Pix2Pix wrapper with optimizers and generator persistence
//! - Conversion between host arrays and tensors

mod convert;
mod discriminator;
mod generator;
mod layers;
mod pix2pix;

pub use convert::{from_nchw_tensor, to_nchw_tensor};
pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use generator::{Generator, GeneratorConfig};
pub use pix2pix::{sidecar_path, GeneratorModel, Pix2Pix, Pix2PixConfig, Pix2PixOptimizers};
