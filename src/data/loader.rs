//! DataLoader drawing random mini-batches for adversarial training
//!
//! Batches are sampled with replacement, so an "epoch" is a count of
//! `floor(num_samples / batch_size)` draws rather than a full pass.

use ndarray::Axis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::reshape::PairedDataset;

/// DataLoader over a paired dataset
pub struct DataLoader {
    /// Full dataset of shape (num_samples, height, width, channels)
    data: PairedDataset,
    /// Batch size
    batch_size: usize,
    rng: StdRng,
}

impl DataLoader {
    /// Create a new DataLoader
    ///
    /// # Arguments
    ///
    /// * `data` - Paired input/target batches
    /// * `batch_size` - Number of samples per batch
    /// * `seed` - Seed of the index sampler
    pub fn new(data: PairedDataset, batch_size: usize, seed: u64) -> Self {
        Self {
            data,
            batch_size,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Get the number of batches per epoch (incomplete batches are dropped)
    pub fn num_batches(&self) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        self.num_samples() / self.batch_size
    }

    /// Get total number of samples
    pub fn num_samples(&self) -> usize {
        self.data.inputs.len_of(Axis(0))
    }

    /// Random indices into the dataset, with replacement
    pub fn sample_indices(&mut self) -> Vec<usize> {
        let n = self.num_samples();
        if n == 0 {
            return Vec::new();
        }
        (0..self.batch_size).map(|_| self.rng.gen_range(0..n)).collect()
    }

    /// Draw the next random batch
    pub fn next_batch(&mut self) -> PairedDataset {
        let indices = self.sample_indices();
        self.data.select(&indices)
    }

    /// Draw `n` samples regardless of the configured batch size
    pub fn sample(&mut self, n: usize) -> PairedDataset {
        let total = self.num_samples();
        let indices: Vec<usize> = (0..n).map(|_| self.rng.gen_range(0..total.max(1))).collect();
        self.data.select(&indices)
    }
}
