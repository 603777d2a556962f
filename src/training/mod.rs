//! Training module for Pix2Pix
//!
//! This module provides:
//! - Training loop with alternating discriminator/generator updates
//! - Loss functions (patch BCE and L1)
//! - Training configuration and per-step metrics

mod losses;
mod metrics;
mod trainer;

pub use losses::{adversarial_loss, discriminator_loss, generator_loss, l1_loss, GeneratorLoss};
pub use metrics::{EMATracker, StepLosses, TrainingMetrics};
pub use trainer::{train_step, Trainer, TrainingConfig, TrainingPlan};
