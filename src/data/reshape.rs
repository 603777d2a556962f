//! Conversion of instance collections into channel-broadcast batch tensors
//!
//! Networks follow a 3-channel convention, so every single-channel raster is
//! repeated across `NETWORK_CHANNELS` identical channels in (N, H, W, C) order.

use ndarray::{s, Array2, Array3, Array4, ArrayView2, Axis};

use super::instance::{InferenceInstance, TrainingInstance};
use crate::error::{Error, Result};

/// Channels expected by the generator and produced by it
pub const NETWORK_CHANNELS: usize = 3;

/// Input/target batch pair of identical shape (N, H, W, C)
#[derive(Debug, Clone, PartialEq)]
pub struct PairedDataset {
    pub inputs: Array4<f32>,
    pub targets: Array4<f32>,
}

impl PairedDataset {
    /// Pair two batches, rejecting different shapes
    pub fn new(inputs: Array4<f32>, targets: Array4<f32>) -> Result<Self> {
        if inputs.shape() != targets.shape() {
            return Err(Error::shape(format!(
                "inputs {:?} and targets {:?} differ in shape",
                inputs.shape(),
                targets.shape()
            )));
        }
        Ok(Self { inputs, targets })
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.inputs.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (height, width) of every sample
    pub fn image_dim(&self) -> (usize, usize) {
        let shape = self.inputs.shape();
        (shape[1], shape[2])
    }

    /// Gather samples by index into a new dataset
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            inputs: self.inputs.select(Axis(0), indices),
            targets: self.targets.select(Axis(0), indices),
        }
    }
}

/// Stack the rasters of a collection into (N, H, W, channels)
fn stack_broadcast<'a, I>(rasters: I, channels: usize) -> Result<Array4<f32>>
where
    I: ExactSizeIterator<Item = ArrayView2<'a, f32>>,
{
    let n = rasters.len();
    let mut out: Option<Array4<f32>> = None;

    for (i, raster) in rasters.enumerate() {
        let (h, w) = raster.dim();
        let batch = out.get_or_insert_with(|| Array4::zeros((n, h, w, channels)));
        let expected = (batch.shape()[1], batch.shape()[2]);
        if expected != (h, w) {
            return Err(Error::shape(format!(
                "instance {} is {}x{}, expected {}x{}",
                i, h, w, expected.0, expected.1
            )));
        }
        batch
            .slice_mut(s![i, .., .., ..])
            .assign(&broadcast_channels(raster, channels)?);
    }

    out.ok_or_else(|| Error::shape("cannot build a batch from zero instances"))
}

/// Repeat one raster across `channels` identical channels (H, W, C)
pub fn broadcast_channels(raster: ArrayView2<'_, f32>, channels: usize) -> Result<Array3<f32>> {
    let (h, w) = raster.dim();
    raster
        .insert_axis(Axis(2))
        .broadcast((h, w, channels))
        .map(|view| view.to_owned())
        .ok_or_else(|| {
            Error::shape(format!("cannot broadcast {}x{} to {} channels", h, w, channels))
        })
}

/// Heights become the input batch, plants the target batch
pub fn reshape_for_training(instances: &[TrainingInstance]) -> Result<PairedDataset> {
    let heights = instances.iter().map(|i| i.heights().view());
    let plants = instances.iter().map(|i| i.plants().view());
    let inputs = stack_broadcast(heights, NETWORK_CHANNELS)?;
    let targets = stack_broadcast(plants, NETWORK_CHANNELS)?;
    PairedDataset::new(inputs, targets)
}

/// Heights only; inference has no ground truth
pub fn reshape_for_inference(instances: &[InferenceInstance]) -> Result<Array4<f32>> {
    stack_broadcast(instances.iter().map(|i| i.heights().view()), NETWORK_CHANNELS)
}

/// Extract one channel of one sample as a raster
pub fn channel_raster(batch: &Array4<f32>, sample: usize, channel: usize) -> Array2<f32> {
    batch.slice(s![sample, .., .., channel]).to_owned()
}
