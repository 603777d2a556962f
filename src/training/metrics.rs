//! Training metrics for monitoring adversarial training
//!
//! One record per optimisation step; per-epoch views are moving averages
//! over those records.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Losses of one training step
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepLosses {
    /// Discriminator loss on the real pair
    pub d_real: f64,
    /// Discriminator loss on the generated pair
    pub d_fake: f64,
    /// Weighted generator loss
    pub g_total: f64,
    /// Unweighted adversarial part of the generator loss
    pub g_adversarial: f64,
    /// Unweighted L1 part of the generator loss
    pub g_l1: f64,
}

impl StepLosses {
    /// Whether every recorded loss is a finite number
    pub fn is_finite(&self) -> bool {
        [self.d_real, self.d_fake, self.g_total, self.g_adversarial, self.g_l1]
            .iter()
            .all(|v| v.is_finite())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StepRecord {
    step: usize,
    d_real: f64,
    d_fake: f64,
    g_total: f64,
    g_adversarial: f64,
    g_l1: f64,
}

/// Metrics collected during training
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    /// Losses of every step, in order
    pub steps: Vec<StepLosses>,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one step
    pub fn record_step(&mut self, losses: StepLosses) {
        self.steps.push(losses);
    }

    /// Get number of recorded steps
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Get latest step losses
    pub fn latest(&self) -> Option<StepLosses> {
        self.steps.last().copied()
    }

    /// Moving average of the weighted generator loss
    pub fn gen_loss_ma(&self, window: usize) -> f64 {
        self.moving_average(window, |s| s.g_total)
    }

    /// Moving average of the combined (real + fake) discriminator loss
    pub fn disc_loss_ma(&self, window: usize) -> f64 {
        self.moving_average(window, |s| s.d_real + s.d_fake)
    }

    fn moving_average(&self, window: usize, f: impl Fn(&StepLosses) -> f64) -> f64 {
        if self.steps.is_empty() || window == 0 {
            return 0.0;
        }
        let n = window.min(self.steps.len());
        let sum: f64 = self.steps.iter().rev().take(n).map(f).sum();
        sum / n as f64
    }

    /// Check if training appears to have collapsed
    ///
    /// Mode collapse indicators:
    /// - Discriminator loss very low (can easily distinguish)
    /// - Adversarial generator loss very high (can't fool discriminator)
    pub fn check_mode_collapse(&self, window: usize) -> bool {
        if window == 0 || self.num_steps() < window {
            return false;
        }

        let disc_ma = self.disc_loss_ma(window);
        let adv_ma = self.moving_average(window, |s| s.g_adversarial);

        disc_ma < 0.1 && adv_ma > 5.0
    }

    /// Save metrics to CSV file
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        for (i, s) in self.steps.iter().enumerate() {
            writer.serialize(StepRecord {
                step: i + 1,
                d_real: s.d_real,
                d_fake: s.d_fake,
                g_total: s.g_total,
                g_adversarial: s.g_adversarial,
                g_l1: s.g_l1,
            })?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Load metrics from CSV file
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut metrics = Self::new();

        for result in reader.deserialize() {
            let record: StepRecord = result?;
            metrics.record_step(StepLosses {
                d_real: record.d_real,
                d_fake: record.d_fake,
                g_total: record.g_total,
                g_adversarial: record.g_adversarial,
                g_l1: record.g_l1,
            });
        }

        Ok(metrics)
    }
}

/// Exponential moving average tracker
#[derive(Debug)]
pub struct EMATracker {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl EMATracker {
    /// Create new EMA tracker
    ///
    /// # Arguments
    ///
    /// * `alpha` - Smoothing factor (0 < alpha <= 1). Higher = more weight on recent
    pub fn new(alpha: f64) -> Self {
        Self {
            value: 0.0,
            alpha: alpha.clamp(0.001, 1.0),
            initialized: false,
        }
    }

    /// Update with new value
    pub fn update(&mut self, new_value: f64) {
        if !self.initialized {
            self.value = new_value;
            self.initialized = true;
        } else {
            self.value = self.alpha * new_value + (1.0 - self.alpha) * self.value;
        }
    }

    /// Get current EMA value
    pub fn value(&self) -> f64 {
        self.value
    }
}
