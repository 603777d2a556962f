//! Utility module with helper functions
//!
//! This module provides:
//! - Configuration handling
//! - Checkpoint save/load utilities

mod checkpoint;
mod config;

pub use checkpoint::{
    find_latest_checkpoint, list_checkpoints, load_checkpoint, load_checkpoint_meta,
    save_checkpoint, save_sample_grid, CheckpointMeta,
};
pub use config::{ensure_config_exists, Config, DataConfig, ModelConfig, ServingConfig};
