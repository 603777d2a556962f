//! Synchronised geometric augmentation of paired batches
//!
//! Each sample gets one random affine transform (rotation, zoom, shift) plus
//! optional flips, and that exact transform is applied to both the input and
//! the target so pixel correspondence survives. Sampling is bilinear and
//! out-of-range coordinates take the nearest edge pixel.

use ndarray::{Array3, Array4, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::reshape::PairedDataset;
use crate::error::{Error, Result};

/// Ranges of the random transforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Maximum rotation in degrees, either direction
    pub rotation_range: f32,
    /// Zoom factors are drawn from [1 - zoom_range, 1 + zoom_range]
    pub zoom_range: f32,
    /// Horizontal shift as a fraction of the width
    pub width_shift_range: f32,
    /// Vertical shift as a fraction of the height
    pub height_shift_range: f32,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    /// Seed of the transform and shuffle stream
    pub seed: u64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            rotation_range: 90.0,
            zoom_range: 0.1,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            horizontal_flip: true,
            vertical_flip: true,
            seed: 1,
        }
    }
}

/// One concrete draw of the augmentation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    /// Rotation in radians
    pub theta: f32,
    /// Zoom along rows
    pub zoom_y: f32,
    /// Zoom along columns
    pub zoom_x: f32,
    /// Shift in pixels along rows
    pub shift_y: f32,
    /// Shift in pixels along columns
    pub shift_x: f32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl AffineTransform {
    /// The transform that leaves a sample unchanged
    pub fn identity() -> Self {
        Self {
            theta: 0.0,
            zoom_y: 1.0,
            zoom_x: 1.0,
            shift_y: 0.0,
            shift_x: 0.0,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }

    /// Draw a transform for an image of `height` x `width`
    pub fn sample<R: Rng>(
        rng: &mut R,
        config: &AugmentConfig,
        height: usize,
        width: usize,
    ) -> Self {
        let theta = symmetric(rng, config.rotation_range).to_radians();
        let (zoom_y, zoom_x) = if config.zoom_range > 0.0 {
            let lo = 1.0 - config.zoom_range;
            let hi = 1.0 + config.zoom_range;
            (rng.gen_range(lo..hi), rng.gen_range(lo..hi))
        } else {
            (1.0, 1.0)
        };
        let shift_y = symmetric(rng, config.height_shift_range) * height as f32;
        let shift_x = symmetric(rng, config.width_shift_range) * width as f32;
        let flip_horizontal = config.horizontal_flip && rng.gen_bool(0.5);
        let flip_vertical = config.vertical_flip && rng.gen_bool(0.5);

        Self {
            theta,
            zoom_y,
            zoom_x,
            shift_y,
            shift_x,
            flip_horizontal,
            flip_vertical,
        }
    }

    /// Source coordinate (row, col) sampled for output pixel (r, c)
    fn source(&self, r: usize, c: usize, height: usize, width: usize) -> (f32, f32) {
        let r = if self.flip_vertical { height - 1 - r } else { r };
        let c = if self.flip_horizontal { width - 1 - c } else { c };

        let cy = (height as f32 - 1.0) / 2.0;
        let cx = (width as f32 - 1.0) / 2.0;
        let u = self.zoom_y * (r as f32 - cy) + self.shift_y;
        let v = self.zoom_x * (c as f32 - cx) + self.shift_x;
        let (sin, cos) = self.theta.sin_cos();

        (cy + cos * u - sin * v, cx + sin * u + cos * v)
    }

    /// Apply to one (H, W, C) sample; every channel uses the same mapping
    pub fn apply(&self, sample: ArrayView3<'_, f32>) -> Array3<f32> {
        let (h, w, channels) = sample.dim();
        let mut out = Array3::zeros((h, w, channels));
        if h == 0 || w == 0 {
            return out;
        }

        for r in 0..h {
            for c in 0..w {
                let (sy, sx) = self.source(r, c, h, w);
                let sy = sy.clamp(0.0, (h - 1) as f32);
                let sx = sx.clamp(0.0, (w - 1) as f32);
                let y0 = sy.floor() as usize;
                let x0 = sx.floor() as usize;
                let y1 = (y0 + 1).min(h - 1);
                let x1 = (x0 + 1).min(w - 1);
                let fy = sy - y0 as f32;
                let fx = sx - x0 as f32;

                for ch in 0..channels {
                    let top = lerp(sample[[y0, x0, ch]], sample[[y0, x1, ch]], fx);
                    let bottom = lerp(sample[[y1, x0, ch]], sample[[y1, x1, ch]], fx);
                    out[[r, c, ch]] = lerp(top, bottom, fy);
                }
            }
        }
        out
    }
}

fn symmetric<R: Rng>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..range)
    } else {
        0.0
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    if t == 0.0 {
        a
    } else {
        a + (b - a) * t
    }
}

/// Infinite, seeded stream of augmented batches drawn from a paired dataset
pub struct PairedAugmenter {
    dataset: PairedDataset,
    batch_size: usize,
    config: AugmentConfig,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
}

impl PairedAugmenter {
    /// Create an augmenter seeded from `config.seed`
    pub fn new(dataset: PairedDataset, batch_size: usize, config: AugmentConfig) -> Result<Self> {
        if dataset.inputs.shape()[..3] != dataset.targets.shape()[..3] {
            return Err(Error::shape(format!(
                "augmentation needs matching (N, H, W); got {:?} and {:?}",
                dataset.inputs.shape(),
                dataset.targets.shape()
            )));
        }
        if dataset.is_empty() {
            return Err(Error::shape("cannot augment an empty dataset"));
        }
        if batch_size == 0 {
            return Err(Error::Config("augmentation batch size must be > 0".to_string()));
        }

        let seed = config.seed;
        let mut augmenter = Self {
            order: (0..dataset.len()).collect(),
            dataset,
            batch_size,
            config,
            rng: StdRng::seed_from_u64(seed),
            cursor: 0,
        };
        augmenter.reseed(seed);
        Ok(augmenter)
    }

    /// Restart the stream; equal seeds give equal sequences
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.order = (0..self.dataset.len()).collect();
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
    }

    /// Samples per draw
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn next_indices(&mut self) -> Vec<usize> {
        let mut indices = Vec::with_capacity(self.batch_size);
        while indices.len() < self.batch_size {
            if self.cursor == self.order.len() {
                self.order.shuffle(&mut self.rng);
                self.cursor = 0;
            }
            indices.push(self.order[self.cursor]);
            self.cursor += 1;
        }
        indices
    }

    /// Draw one augmented batch of `batch_size` samples
    pub fn draw(&mut self) -> PairedDataset {
        let indices = self.next_indices();
        let (h, w) = self.dataset.image_dim();
        let in_shape = self.dataset.inputs.shape();
        let tg_shape = self.dataset.targets.shape();
        let mut inputs = Array4::zeros((self.batch_size, h, w, in_shape[3]));
        let mut targets = Array4::zeros((self.batch_size, h, w, tg_shape[3]));

        for (slot, &idx) in indices.iter().enumerate() {
            let transform = AffineTransform::sample(&mut self.rng, &self.config, h, w);
            let input = transform.apply(self.dataset.inputs.index_axis(Axis(0), idx));
            let target = transform.apply(self.dataset.targets.index_axis(Axis(0), idx));
            inputs.index_axis_mut(Axis(0), slot).assign(&input);
            targets.index_axis_mut(Axis(0), slot).assign(&target);
        }

        PairedDataset { inputs, targets }
    }
}

impl Iterator for PairedAugmenter {
    type Item = PairedDataset;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.draw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn ramp_batch(n: usize, h: usize, w: usize) -> Array4<f32> {
        Array4::from_shape_fn((n, h, w, 3), |(i, r, c, _)| (i * 1000 + r * w + c) as f32)
    }

    #[test]
    fn test_identical_pair_stays_identical() {
        let batch = ramp_batch(3, 8, 8);
        let dataset = PairedDataset::new(batch.clone(), batch).unwrap();
        let mut augmenter = PairedAugmenter::new(dataset, 4, AugmentConfig::default()).unwrap();

        for _ in 0..10 {
            let drawn = augmenter.next().unwrap();
            assert_eq!(drawn.inputs.shape(), &[4, 8, 8, 3]);
            assert_eq!(drawn.inputs, drawn.targets);
        }
    }

    #[test]
    fn test_reseed_restarts_sequence() {
        let batch = ramp_batch(2, 6, 6);
        let dataset = PairedDataset::new(batch.clone(), batch).unwrap();
        let mut augmenter = PairedAugmenter::new(dataset, 3, AugmentConfig::default()).unwrap();

        let first = augmenter.draw();
        let _ = augmenter.draw();
        augmenter.reseed(AugmentConfig::default().seed);
        assert_eq!(augmenter.draw(), first);
    }

    #[test]
    fn test_batch_larger_than_dataset_cycles() {
        let batch = ramp_batch(2, 4, 4);
        let dataset = PairedDataset::new(batch.clone(), batch).unwrap();
        let mut augmenter = PairedAugmenter::new(dataset, 20, AugmentConfig::default()).unwrap();
        assert_eq!(augmenter.draw().len(), 20);
    }

    #[test]
    fn test_identity_transform_is_exact() {
        let sample = ramp_batch(1, 5, 7).index_axis(Axis(0), 0).to_owned();
        let out = AffineTransform::identity().apply(sample.view());
        assert_eq!(out, sample);
    }

    #[test]
    fn test_flips_reverse_axes() {
        let sample = ramp_batch(1, 3, 4).index_axis(Axis(0), 0).to_owned();
        let transform = AffineTransform {
            flip_horizontal: true,
            ..AffineTransform::identity()
        };
        let out = transform.apply(sample.view());
        assert_eq!(out[[0, 0, 0]], sample[[0, 3, 0]]);
        assert_eq!(out[[2, 1, 1]], sample[[2, 2, 1]]);

        let transform = AffineTransform {
            flip_vertical: true,
            ..AffineTransform::identity()
        };
        let out = transform.apply(sample.view());
        assert_eq!(out[[0, 0, 0]], sample[[2, 0, 0]]);
    }

    #[test]
    fn test_constant_image_is_invariant() {
        let sample = Array3::from_elem((6, 6, 3), 0.75f32);
        let mut rng = StdRng::seed_from_u64(7);
        let transform = AffineTransform::sample(&mut rng, &AugmentConfig::default(), 6, 6);
        let out = transform.apply(sample.view());
        assert!(out.iter().all(|&v| (v - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_sampled_parameters_respect_ranges() {
        let config = AugmentConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let t = AffineTransform::sample(&mut rng, &config, 10, 20);
            assert!(t.theta.abs() <= std::f32::consts::FRAC_PI_2 + 1e-6);
            assert!((0.9..=1.1).contains(&t.zoom_x));
            assert!((0.9..=1.1).contains(&t.zoom_y));
            assert!(t.shift_y.abs() <= 1.0);
            assert!(t.shift_x.abs() <= 2.0);
        }
    }

    #[test]
    fn test_mismatched_pair_rejected() {
        let dataset = PairedDataset {
            inputs: ramp_batch(2, 4, 4),
            targets: ramp_batch(3, 4, 4),
        };
        assert!(PairedAugmenter::new(dataset, 1, AugmentConfig::default()).is_err());
    }
}
