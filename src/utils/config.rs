//! Configuration management
//!
//! Provides unified configuration for training and serving.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::DEFAULT_RASTER_ROWS;
use crate::error::{Error, Result};
use crate::model::{DiscriminatorConfig, GeneratorConfig, Pix2PixConfig};
use crate::training::TrainingConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfig,
    /// Serving configuration
    pub serving: ServingConfig,
}

/// Input stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Rows following each `plants`/`heights` header
    pub raster_rows: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            raster_rows: DEFAULT_RASTER_ROWS,
        }
    }
}

/// Model-related configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Generator architecture
    pub generator: GeneratorConfig,
    /// Discriminator architecture
    pub discriminator: DiscriminatorConfig,
    /// Optimizer and loss weights
    pub optimizer: Pix2PixConfig,
    /// Device: "cpu" or "cuda"
    pub device: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            discriminator: DiscriminatorConfig::default(),
            optimizer: Pix2PixConfig::default(),
            device: "cpu".to_string(),
        }
    }
}

/// Inference server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Generator weights; the architecture sits next to it as `.json`
    pub model_path: String,
    /// Epochs run when a request carries training instances
    pub retrain_epochs: usize,
    /// Sleep between polls of an idle input stream
    pub poll_interval_ms: u64,
    /// Channels of each prediction written back
    pub output_channels: usize,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_path: "model/generator.ot".to_string(),
            retrain_epochs: 100,
            poll_interval_ms: 100,
            output_channels: 2,
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from TOML or JSON depending on the extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if is_toml(path) {
            Self::from_toml(path)
        } else {
            Self::from_json(path)
        }
    }

    /// Get device from configuration
    pub fn get_device(&self) -> tch::Device {
        match self.model.device.to_lowercase().as_str() {
            "cuda" | "gpu" => {
                if tch::Cuda::is_available() {
                    tch::Device::Cuda(0)
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                    tch::Device::Cpu
                }
            }
            _ => tch::Device::Cpu,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.data.raster_rows == 0 {
            return Err(Error::Config("raster rows must be > 0".into()));
        }
        self.model.generator.validate()?;
        self.model.discriminator.validate()?;
        let pair = self.model.generator.in_channels + self.model.generator.out_channels;
        if self.model.discriminator.in_channels != pair {
            return Err(Error::Config(format!(
                "discriminator in_channels must be {} (generator input + output)",
                pair
            )));
        }
        if self.model.optimizer.learning_rate <= 0.0 {
            return Err(Error::Config("learning rate must be > 0".into()));
        }
        self.training.validate()?;
        if self.serving.output_channels == 0
            || self.serving.output_channels as i64 > self.model.generator.out_channels
        {
            return Err(Error::Config(format!(
                "output channels must be in 1..={}",
                self.model.generator.out_channels
            )));
        }
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().map(|ext| ext == "toml").unwrap_or(false)
}

/// Create default configuration file if it doesn't exist
pub fn ensure_config_exists(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if path.exists() {
        Config::load(path)
    } else {
        let config = Config::default();
        if is_toml(path) {
            config.save_toml(path)?;
        } else {
            config.save_json(path)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.data.raster_rows, 256);
        assert_eq!(config.serving.output_channels, 2);
        assert_eq!(config.serving.poll_interval_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let loaded: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.training.epochs = 3;
        config.save_toml(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[training]\nepochs = 5\n\n[serving]\nretrain_epochs = 2").unwrap();

        let config = Config::from_toml(file.path()).unwrap();
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.serving.retrain_epochs, 2);
        assert_eq!(config.model.generator, GeneratorConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.serving.output_channels = 4;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.model.discriminator.in_channels = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ensure_config_exists_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let created = ensure_config_exists(&path).unwrap();
        assert!(path.exists());
        assert_eq!(ensure_config_exists(&path).unwrap(), created);
    }
}
