//! Building blocks shared by the generator and discriminator

use tch::{nn, Tensor};

/// Negative slope of the LeakyReLU activations
pub const LEAKY_SLOPE: f64 = 0.2;

/// Weight init N(0, 0.02) used by every convolution
pub fn normal_init() -> nn::Init {
    nn::Init::Randn {
        mean: 0.0,
        stdev: 0.02,
    }
}

/// Padding that makes a stride-2 convolution exactly halve an even input
pub fn halving_padding(kernel_size: i64) -> i64 {
    (kernel_size - 2) / 2
}

/// Stride-2 convolution config halving the spatial size
pub fn down_config(kernel_size: i64) -> nn::ConvConfig {
    nn::ConvConfig {
        stride: 2,
        padding: halving_padding(kernel_size),
        ws_init: normal_init(),
        ..Default::default()
    }
}

/// Stride-2 transposed convolution config doubling the spatial size
pub fn up_config(kernel_size: i64) -> nn::ConvTransposeConfig {
    nn::ConvTransposeConfig {
        stride: 2,
        padding: halving_padding(kernel_size),
        ws_init: normal_init(),
        ..Default::default()
    }
}

/// Stride-1 convolution without implicit padding; pair with [`same_pad`]
pub fn unpadded_config() -> nn::ConvConfig {
    nn::ConvConfig {
        stride: 1,
        padding: 0,
        ws_init: normal_init(),
        ..Default::default()
    }
}

/// Zero-pad so a stride-1 convolution keeps the spatial size.
///
/// For even kernels the extra row/column goes to the bottom/right.
pub fn same_pad(xs: &Tensor, kernel_size: i64) -> Tensor {
    let total = kernel_size - 1;
    let before = total / 2;
    let after = total - before;
    xs.zero_pad2d(before, after, before, after)
}

/// LeakyReLU with [`LEAKY_SLOPE`]
pub fn leaky_relu(xs: &Tensor) -> Tensor {
    xs.maximum(&(xs * LEAKY_SLOPE))
}
