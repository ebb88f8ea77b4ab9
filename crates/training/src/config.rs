//! Experiment configuration loaded from TOML.

use crate::train::TrainConfig;
use anyhow::Context;
use breed_dataset::DataConfig;
use models::BreedClassifierConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "BREED_CONFIG";
pub const DEFAULT_CONFIG_NAME: &str = "breed.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub channels: Vec<usize>,
    pub hidden: usize,
    pub dropout: f64,
    pub freeze_features: bool,
    /// Feature-extractor weights to start from.
    pub pretrained_features: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let base = BreedClassifierConfig::default();
        Self {
            channels: base.channels,
            hidden: base.hidden,
            dropout: base.dropout,
            freeze_features: base.freeze_features,
            pretrained_features: None,
        }
    }
}

impl ModelConfig {
    pub fn classifier(&self, num_classes: usize) -> BreedClassifierConfig {
        BreedClassifierConfig {
            num_classes,
            channels: self.channels.clone(),
            hidden: self.hidden,
            dropout: self.dropout,
            freeze_features: self.freeze_features,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub train: TrainConfig,
    /// JSONL file receiving every plotted point.
    pub metrics_out: Option<PathBuf>,
    pub checkpoint: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            model: ModelConfig::default(),
            train: TrainConfig::default(),
            metrics_out: None,
            checkpoint: PathBuf::from("checkpoints/breed_classifier.bin"),
        }
    }
}

impl ExperimentConfig {
    /// `$BREED_CONFIG` or `./breed.toml`; defaults when absent or malformed.
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        Self::load_or_default(&path)
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_path(path) {
            Ok(Some(cfg)) => cfg,
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring config file: {e:#}");
                Self::default()
            }
        }
    }

    /// `Ok(None)` when the file does not exist.
    pub fn from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg = toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("breed.toml");
        std::fs::write(
            &path,
            r#"
metrics_out = "logs/metrics.jsonl"

[data]
data_dir = "data/tiny"
batch_size = 8

[data.augment]
image_size = 64
crop_scale = [0.5, 1.0]

[train]
num_epochs = 3
"#,
        )?;
        let cfg = ExperimentConfig::from_path(&path)?
            .ok_or_else(|| anyhow::anyhow!("config not found"))?;
        assert_eq!(cfg.data.data_dir, PathBuf::from("data/tiny"));
        assert_eq!(cfg.data.batch_size, 8);
        assert_eq!(cfg.data.valid_ratio, 0.1);
        assert_eq!(cfg.data.augment.image_size, 64);
        assert_eq!(cfg.data.augment.crop_scale, (0.5, 1.0));
        assert_eq!(cfg.data.augment.resize, 256);
        assert_eq!(cfg.train.num_epochs, 3);
        assert_eq!(cfg.train.lr_period, 2);
        assert_eq!(cfg.metrics_out, Some(PathBuf::from("logs/metrics.jsonl")));
        assert_eq!(cfg.model, ModelConfig::default());
        Ok(())
    }

    #[test]
    fn missing_file_is_none_and_malformed_falls_back() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(ExperimentConfig::from_path(&dir.path().join("nope.toml"))?.is_none());
        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[train\nnum_epochs = ")?;
        assert!(ExperimentConfig::from_path(&bad).is_err());
        assert_eq!(ExperimentConfig::load_or_default(&bad), ExperimentConfig::default());
        Ok(())
    }

    #[test]
    fn classifier_config_carries_class_count() {
        let cfg = ModelConfig::default().classifier(7);
        assert_eq!(cfg.num_classes, 7);
        assert!(cfg.freeze_features);
    }
}
