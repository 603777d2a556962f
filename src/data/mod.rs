//! Data module for ingesting and preparing raster pairs
//!
//! This module provides:
//! - Line-protocol parser and writer shared with the terrain host
//! - Assembly of parsed blocks into training/inference instances
//! - Reshaping into channel-broadcast batch tensors
//! - Synchronised augmentation and random mini-batch loading

mod augment;
mod instance;
mod loader;
mod protocol;
mod reshape;

pub use augment::{AffineTransform, AugmentConfig, PairedAugmenter};
pub use instance::{
    assemble_inference, assemble_training, collect_inference_instances,
    collect_training_instances, InferenceInstance, PartialInstance, TrainingInstance,
};
pub use loader::DataLoader;
pub use protocol::{
    write_block, write_raster, BlockKind, RawBlock, Section, StreamParser, DEFAULT_RASTER_ROWS,
    FINISH,
};
pub use reshape::{
    broadcast_channels, channel_raster, reshape_for_inference, reshape_for_training,
    PairedDataset, NETWORK_CHANNELS,
};
