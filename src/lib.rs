//! # Vegetation cGAN
//!
//! This crate trains and serves a conditional GAN (pix2pix) that maps terrain
//! height rasters to vegetation density rasters for a procedural terrain tool.
//!
//! ## Modules
//!
//! - `data`: Line-protocol parsing, instance assembly, reshaping and augmentation
//! - `model`: U-Net generator, PatchGAN discriminator and the Pix2Pix wrapper
//! - `training`: Training loop, loss functions and metrics
//! - `serving`: Polling inference server with in-place retraining
//! - `utils`: Configuration and checkpoints

pub mod data;
pub mod error;
pub mod model;
pub mod serving;
pub mod training;
pub mod utils;

pub use data::{
    collect_inference_instances, collect_training_instances, reshape_for_inference,
    reshape_for_training, InferenceInstance, PairedAugmenter, PairedDataset, StreamParser,
    TrainingInstance,
};
pub use error::{Error, ProtocolError, Result};
pub use model::{GeneratorModel, Pix2Pix};
pub use serving::{InferenceServer, ServeOutcome};
pub use training::{Trainer, TrainingConfig, TrainingMetrics};
pub use utils::{save_checkpoint, load_checkpoint, Config};
