//! Checkpoint save/load utilities
//!
//! A checkpoint directory `checkpoint_step_{step:06}` holds the generator
//! weights with their architecture sidecar, a PNG grid of sample
//! predictions, JSON metadata and the step metrics so far.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tch::{Device, Kind, Tensor};

use crate::data::PairedDataset;
use crate::error::{Error, Result};
use crate::model::{to_nchw_tensor, GeneratorModel};
use crate::training::TrainingMetrics;

const CHECKPOINT_PREFIX: &str = "checkpoint_step_";
const GENERATOR_FILE: &str = "generator.ot";

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Steps completed
    pub step: usize,
    /// Epochs completed, rounded down
    pub epoch: usize,
    /// Discriminator loss on real pairs at the last step
    pub d_real: f64,
    /// Discriminator loss on generated pairs at the last step
    pub d_fake: f64,
    /// Generator loss at the last step
    pub g_total: f64,
    /// RFC 3339 timestamp of checkpoint
    pub timestamp: String,
    /// Generator architecture (as JSON)
    pub config: String,
}

/// Save a complete checkpoint (generator + sample grid + metadata + metrics)
///
/// # Arguments
///
/// * `generator` - Generator to save
/// * `samples` - Pairs shown in the sample grid
/// * `metrics` - Training metrics
/// * `step` - Steps completed
/// * `epoch` - Epochs completed
/// * `dir` - Directory holding all checkpoints
///
/// # Returns
///
/// Path to saved checkpoint
pub fn save_checkpoint(
    generator: &GeneratorModel,
    samples: &PairedDataset,
    metrics: &TrainingMetrics,
    step: usize,
    epoch: usize,
    dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    let checkpoint_dir = dir.as_ref().join(format!("{}{:06}", CHECKPOINT_PREFIX, step));
    fs::create_dir_all(&checkpoint_dir)?;

    generator.save(checkpoint_dir.join(GENERATOR_FILE))?;
    save_sample_grid(generator, samples, checkpoint_dir.join("samples.png"))?;

    let latest = metrics.latest().unwrap_or_default();
    let meta = CheckpointMeta {
        step,
        epoch,
        d_real: latest.d_real,
        d_fake: latest.d_fake,
        g_total: latest.g_total,
        timestamp: chrono::Utc::now().to_rfc3339(),
        config: serde_json::to_string(generator.config())?,
    };
    fs::write(
        checkpoint_dir.join("meta.json"),
        serde_json::to_string_pretty(&meta)?,
    )?;

    metrics.save_csv(checkpoint_dir.join("metrics.csv"))?;

    tracing::info!("Saved checkpoint to {}", checkpoint_dir.display());
    Ok(checkpoint_dir)
}

/// Write a 3-row grid: source inputs, generated outputs, real targets.
///
/// Values in [-1, 1] map to [0, 255]; anything outside is clipped.
pub fn save_sample_grid(
    generator: &GeneratorModel,
    samples: &PairedDataset,
    path: impl AsRef<Path>,
) -> Result<()> {
    if samples.is_empty() {
        return Err(Error::shape("sample grid needs at least one pair"));
    }
    let generated = generator.predict(&samples.inputs)?;

    let rows: Vec<Tensor> = [&samples.inputs, &generated, &samples.targets]
        .iter()
        .map(|batch| grid_row(&to_nchw_tensor(batch, Device::Cpu)))
        .collect();
    let grid = Tensor::cat(&rows, 1);
    let image = ((grid + 1.0) * 127.5).clamp(0.0, 255.0).to_kind(Kind::Uint8);

    tch::vision::image::save(&image, path.as_ref())?;
    Ok(())
}

/// (N, C, H, W) -> (C, H, N * W), samples side by side
fn grid_row(batch: &Tensor) -> Tensor {
    let size = batch.size();
    let (n, c, h, w) = (size[0], size[1], size[2], size[3]);
    batch.permute([1, 2, 0, 3]).reshape([c, h, n * w])
}

/// Load checkpoint metadata
pub fn load_checkpoint_meta(checkpoint_dir: impl AsRef<Path>) -> Result<CheckpointMeta> {
    let content = fs::read_to_string(checkpoint_dir.as_ref().join("meta.json"))?;
    let meta: CheckpointMeta = serde_json::from_str(&content)?;
    Ok(meta)
}

/// Load a complete checkpoint
///
/// # Returns
///
/// Tuple of (generator, metadata, metrics)
pub fn load_checkpoint(
    checkpoint_dir: impl AsRef<Path>,
    device: Device,
) -> Result<(GeneratorModel, CheckpointMeta, TrainingMetrics)> {
    let checkpoint_dir = checkpoint_dir.as_ref();
    let generator = GeneratorModel::load(checkpoint_dir.join(GENERATOR_FILE), device)?;
    let meta = load_checkpoint_meta(checkpoint_dir)?;

    let metrics_path = checkpoint_dir.join("metrics.csv");
    let metrics = if metrics_path.exists() {
        TrainingMetrics::load_csv(&metrics_path)?
    } else {
        TrainingMetrics::new()
    };

    tracing::info!(
        "Loaded checkpoint from {} (step {})",
        checkpoint_dir.display(),
        meta.step
    );
    Ok((generator, meta, metrics))
}

fn checkpoint_dirs(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().ok().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with(CHECKPOINT_PREFIX))
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect()
}

/// Find the latest checkpoint in a directory
pub fn find_latest_checkpoint(dir: impl AsRef<Path>) -> Option<PathBuf> {
    // zero-padded step numbers sort lexicographically
    checkpoint_dirs(dir.as_ref()).into_iter().max()
}

/// List all checkpoints in a directory, oldest first
pub fn list_checkpoints(dir: impl AsRef<Path>) -> Vec<(PathBuf, CheckpointMeta)> {
    let mut dirs = checkpoint_dirs(dir.as_ref());
    dirs.sort();
    dirs.into_iter()
        .filter_map(|path| load_checkpoint_meta(&path).ok().map(|meta| (path, meta)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GeneratorConfig;
    use crate::training::StepLosses;
    use ndarray::Array4;
    use tempfile::TempDir;

    fn small_generator() -> GeneratorModel {
        let config = GeneratorConfig {
            encoder_filters: vec![4],
            bottleneck_filters: 4,
            kernel_size: 4,
            ..GeneratorConfig::default()
        };
        GeneratorModel::new(config, Device::Cpu).unwrap()
    }

    fn samples(n: usize) -> PairedDataset {
        let inputs = Array4::from_elem((n, 8, 8, 3), 0.5f32);
        let targets = Array4::from_elem((n, 8, 8, 3), -0.5f32);
        PairedDataset::new(inputs, targets).unwrap()
    }

    #[test]
    fn test_checkpoint_meta_serialization() {
        let meta = CheckpointMeta {
            step: 10,
            epoch: 1,
            d_real: 0.5,
            d_fake: 0.6,
            g_total: 12.0,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            config: "{}".to_string(),
        };

        let json = serde_json::to_string(&meta).unwrap();
        let loaded: CheckpointMeta = serde_json::from_str(&json).unwrap();

        assert_eq!(meta, loaded);
    }

    #[test]
    fn test_save_writes_all_files() {
        let dir = TempDir::new().unwrap();
        let mut metrics = TrainingMetrics::new();
        metrics.record_step(StepLosses {
            d_real: 0.3,
            d_fake: 0.4,
            g_total: 20.0,
            g_adversarial: 0.7,
            g_l1: 0.19,
        });

        let generator = small_generator();
        let path = save_checkpoint(&generator, &samples(3), &metrics, 40, 10, dir.path()).unwrap();

        assert_eq!(path.file_name().unwrap(), "checkpoint_step_000040");
        for file in ["generator.ot", "generator.json", "samples.png", "meta.json", "metrics.csv"] {
            assert!(path.join(file).exists(), "missing {}", file);
        }

        let (generator, meta, loaded_metrics) = load_checkpoint(&path, Device::Cpu).unwrap();
        assert_eq!(meta.step, 40);
        assert_eq!(meta.g_total, 20.0);
        assert_eq!(loaded_metrics.num_steps(), 1);
        assert_eq!(generator.config().encoder_filters, vec![4]);
    }

    #[test]
    fn test_find_latest_checkpoint() {
        let dir = TempDir::new().unwrap();
        assert!(find_latest_checkpoint(dir.path()).is_none());

        let generator = small_generator();
        let metrics = TrainingMetrics::new();
        save_checkpoint(&generator, &samples(1), &metrics, 9, 1, dir.path()).unwrap();
        save_checkpoint(&generator, &samples(1), &metrics, 18, 2, dir.path()).unwrap();

        let latest = find_latest_checkpoint(dir.path()).unwrap();
        assert!(latest.ends_with("checkpoint_step_000018"));

        let listed = list_checkpoints(dir.path());
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].1.step, 9);
    }
}
