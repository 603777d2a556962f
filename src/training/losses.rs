//! Loss functions for conditional GAN training
//!
//! Discriminator outputs are patch logits, so every loss compares a logit
//! grid against a patch label tensor of the same shape.

use tch::Tensor;

/// Binary cross entropy between patch logits and patch labels
///
/// # Arguments
///
/// * `logits` - Discriminator output (N, 1, patch_h, patch_w), before sigmoid
/// * `labels` - Patch labels of the same shape, 1.0 = real, 0.0 = fake
///
/// # Returns
///
/// Scalar loss tensor
pub fn adversarial_loss(logits: &Tensor, labels: &Tensor) -> Tensor {
    logits.binary_cross_entropy_with_logits::<Tensor>(labels, None, None, tch::Reduction::Mean)
}

/// Discriminator loss for one (real or fake) update, scaled by `weight`
pub fn discriminator_loss(logits: &Tensor, labels: &Tensor, weight: f64) -> Tensor {
    adversarial_loss(logits, labels) * weight
}

/// Mean absolute error between generated and target images
pub fn l1_loss(generated: &Tensor, target: &Tensor) -> Tensor {
    (generated - target).abs().mean(tch::Kind::Float)
}

/// Generator loss terms of the composite update
pub struct GeneratorLoss {
    /// Weighted sum that is backpropagated
    pub total: Tensor,
    /// Unweighted adversarial term
    pub adversarial: Tensor,
    /// Unweighted L1 term
    pub l1: Tensor,
}

/// Composite generator loss: fool the discriminator and stay close to the target
///
/// # Arguments
///
/// * `fake_logits` - Discriminator output on (source, generated)
/// * `real_labels` - Ones patch labels
/// * `generated` - Generator output
/// * `target` - Ground-truth target
/// * `adversarial_weight` - Weight of the adversarial term
/// * `l1_weight` - Weight of the L1 term
pub fn generator_loss(
    fake_logits: &Tensor,
    real_labels: &Tensor,
    generated: &Tensor,
    target: &Tensor,
    adversarial_weight: f64,
    l1_weight: f64,
) -> GeneratorLoss {
    let adversarial = adversarial_loss(fake_logits, real_labels);
    let l1 = l1_loss(generated, target);
    let total = &adversarial * adversarial_weight + &l1 * l1_weight;
    GeneratorLoss {
        total,
        adversarial,
        l1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn test_adversarial_loss_scalar_positive() {
        let logits = Tensor::randn([2, 1, 4, 4], (Kind::Float, Device::Cpu));
        let labels = Tensor::ones([2, 1, 4, 4], (Kind::Float, Device::Cpu));
        let loss = adversarial_loss(&logits, &labels);

        assert_eq!(loss.size(), Vec::<i64>::new());
        assert!(loss.double_value(&[]) > 0.0);
    }

    #[test]
    fn test_confident_discriminator_has_small_loss() {
        let real = Tensor::full([4, 1, 2, 2], 10.0, (Kind::Float, Device::Cpu));
        let ones = Tensor::ones([4, 1, 2, 2], (Kind::Float, Device::Cpu));
        let fake = Tensor::full([4, 1, 2, 2], -10.0, (Kind::Float, Device::Cpu));
        let zeros = Tensor::zeros([4, 1, 2, 2], (Kind::Float, Device::Cpu));

        assert!(discriminator_loss(&real, &ones, 0.5).double_value(&[]) < 0.01);
        assert!(discriminator_loss(&fake, &zeros, 0.5).double_value(&[]) < 0.01);
    }

    #[test]
    fn test_discriminator_loss_is_weighted() {
        let logits = Tensor::zeros([1, 1, 2, 2], (Kind::Float, Device::Cpu));
        let labels = Tensor::ones([1, 1, 2, 2], (Kind::Float, Device::Cpu));
        let full = adversarial_loss(&logits, &labels).double_value(&[]);
        let half = discriminator_loss(&logits, &labels, 0.5).double_value(&[]);

        assert!((full - std::f64::consts::LN_2).abs() < 1e-5);
        assert!((half - full * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_generator_loss_combines_terms() {
        let logits = Tensor::zeros([1, 1, 2, 2], (Kind::Float, Device::Cpu));
        let labels = Tensor::ones([1, 1, 2, 2], (Kind::Float, Device::Cpu));
        let generated = Tensor::full([1, 3, 4, 4], 0.5, (Kind::Float, Device::Cpu));
        let target = Tensor::zeros([1, 3, 4, 4], (Kind::Float, Device::Cpu));

        let loss = generator_loss(&logits, &labels, &generated, &target, 1.0, 100.0);
        let l1 = loss.l1.double_value(&[]);
        let adv = loss.adversarial.double_value(&[]);

        assert!((l1 - 0.5).abs() < 1e-6);
        assert!((loss.total.double_value(&[]) - (adv + 100.0 * l1)).abs() < 1e-4);
    }
}
