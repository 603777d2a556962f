//! Conversion between host-side (N, H, W, C) arrays and NCHW tensors

use ndarray::Array4;
use tch::{Device, Kind, Tensor};

use crate::error::{Error, Result};

/// Copy an (N, H, W, C) array into an (N, C, H, W) float tensor on `device`
pub fn to_nchw_tensor(batch: &Array4<f32>, device: Device) -> Tensor {
    let (n, h, w, c) = batch.dim();
    let data: Vec<f32> = batch.iter().copied().collect();
    Tensor::from_slice(&data)
        .view([n as i64, h as i64, w as i64, c as i64])
        .permute([0, 3, 1, 2])
        .contiguous()
        .to_device(device)
}

/// Copy an (N, C, H, W) tensor back into an (N, H, W, C) array
pub fn from_nchw_tensor(tensor: &Tensor) -> Result<Array4<f32>> {
    let size = tensor.size();
    if size.len() != 4 {
        return Err(Error::shape(format!("expected a 4D tensor, got {:?}", size)));
    }
    let (n, c, h, w) = (size[0] as usize, size[1] as usize, size[2] as usize, size[3] as usize);

    let flat = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .permute([0, 2, 3, 1])
        .contiguous()
        .view([-1]);
    let data = Vec::<f32>::try_from(&flat)?;

    Array4::from_shape_vec((n, h, w, c), data).map_err(|e| Error::shape(e.to_string()))
}
