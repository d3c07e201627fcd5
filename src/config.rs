// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Application configuration
//!
//! Defaults reproduce the stock deployment: hub checkpoints for the
//! pretrained models, local directories for the fine-tuned ones.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a model's config, tokenizer and weights come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelSource {
    /// A Hugging Face hub repository
    Hub {
        repo: String,
        #[serde(default = "default_revision")]
        revision: String,
    },
    /// A directory on the local filesystem
    Local { path: PathBuf },
}

fn default_revision() -> String {
    "main".to_string()
}

impl ModelSource {
    pub fn hub(repo: &str) -> Self {
        ModelSource::Hub {
            repo: repo.to_string(),
            revision: default_revision(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        ModelSource::Local { path: path.into() }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Hub { repo, revision } => write!(f, "hub:{}@{}", repo, revision),
            ModelSource::Local { path } => write!(f, "local:{}", path.display()),
        }
    }
}

impl FromStr for ModelSource {
    type Err = anyhow::Error;

    /// `hub:<repo>[@<revision>]`, `local:<path>`, or a bare local path
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("hub:") {
            let (repo, revision) = match rest.split_once('@') {
                Some((repo, revision)) => (repo, revision.to_string()),
                None => (rest, default_revision()),
            };
            if repo.is_empty() || revision.is_empty() {
                bail!("Invalid hub model source '{}'", s);
            }
            return Ok(ModelSource::Hub {
                repo: repo.to_string(),
                revision,
            });
        }
        let path = s.strip_prefix("local:").unwrap_or(s);
        if path.is_empty() {
            bail!("Empty model source");
        }
        Ok(ModelSource::local(path))
    }
}

/// Which classifier output index holds which class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    pub fake_index: usize,
    pub real_index: usize,
}

impl Default for LabelMap {
    fn default() -> Self {
        Self {
            fake_index: 0,
            real_index: 1,
        }
    }
}

impl LabelMap {
    /// Check the mapping against a classifier with `num_labels` outputs
    pub fn validate(&self, num_labels: usize) -> Result<()> {
        if self.fake_index == self.real_index {
            bail!(
                "Label map assigns fake and real to the same index {}",
                self.fake_index
            );
        }
        let highest = self.fake_index.max(self.real_index);
        if highest >= num_labels {
            bail!(
                "Label map index {} is out of range for a classifier with {} labels",
                highest,
                num_labels
            );
        }
        Ok(())
    }
}

/// Compute device selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use CUDA device 0 when available
    #[default]
    Auto,
    Cpu,
}

/// Model sources for the four resident models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub pretrained_detector: ModelSource,
    pub finetuned_detector: ModelSource,
    pub pretrained_generator: ModelSource,
    pub finetuned_generator: ModelSource,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            pretrained_detector: ModelSource::hub("bert-base-uncased"),
            finetuned_detector: ModelSource::local("./fakenews_detector_model_final"),
            pretrained_generator: ModelSource::hub("Qwen/Qwen2.5-0.5B"),
            finetuned_generator: ModelSource::local("./qwen2.5-fakenews"),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub models: ModelsConfig,
    /// Detector output index assignment
    pub label_map: LabelMap,
    /// Seed for the generation RNG, fixed once at startup
    pub seed: u64,
    pub device: DevicePreference,
    /// HTTP bind address
    pub address: SocketAddr,
    /// Directory holding `ISOT/` and `WELFake.csv` (dataset endpoints disabled if unset)
    pub data_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: ModelsConfig::default(),
            label_map: LabelMap::default(),
            seed: 42,
            device: DevicePreference::Auto,
            address: SocketAddr::from(([127, 0, 0, 1], 8501)),
            data_dir: None,
        }
    }
}

impl AppConfig {
    /// Read a JSON config file; absent fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Checks that do not need any model loaded
    pub fn validate(&self) -> Result<()> {
        if self.label_map.fake_index == self.label_map.real_index {
            bail!("label_map.fake_index and label_map.real_index must differ");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.address.port(), 8501);
        assert_eq!(config.label_map, LabelMap { fake_index: 0, real_index: 1 });
        assert_eq!(
            config.models.finetuned_detector,
            ModelSource::local("./fakenews_detector_model_final")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_label_map_validation() {
        assert!(LabelMap::default().validate(2).is_ok());
        assert!(LabelMap { fake_index: 1, real_index: 0 }.validate(2).is_ok());
        assert!(LabelMap { fake_index: 0, real_index: 0 }.validate(2).is_err());
        assert!(LabelMap { fake_index: 0, real_index: 2 }.validate(2).is_err());
        assert!(LabelMap::default().validate(1).is_err());
    }

    #[test]
    fn test_partial_json_config() {
        let json = r#"{
            "seed": 7,
            "label_map": {"fake_index": 1, "real_index": 0},
            "models": {
                "pretrained_detector": {"kind": "hub", "repo": "distilbert-base-uncased"},
                "finetuned_detector": {"kind": "local", "path": "/models/detector"},
                "pretrained_generator": {"kind": "hub", "repo": "Qwen/Qwen2.5-0.5B", "revision": "v1"},
                "finetuned_generator": {"kind": "local", "path": "/models/generator"}
            }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.label_map.fake_index, 1);
        assert_eq!(config.address.port(), 8501);
        assert_eq!(
            config.models.pretrained_generator,
            ModelSource::Hub { repo: "Qwen/Qwen2.5-0.5B".to_string(), revision: "v1".to_string() }
        );
        assert_eq!(
            config.models.pretrained_detector,
            ModelSource::hub("distilbert-base-uncased")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ModelSource::hub("gpt2").to_string(), "hub:gpt2@main");
        assert_eq!(ModelSource::local("./m").to_string(), "local:./m");
    }

    #[test]
    fn test_source_from_str() {
        assert_eq!("hub:gpt2".parse::<ModelSource>().unwrap(), ModelSource::hub("gpt2"));
        assert_eq!(
            "hub:Qwen/Qwen2.5-0.5B@v2".parse::<ModelSource>().unwrap(),
            ModelSource::Hub { repo: "Qwen/Qwen2.5-0.5B".to_string(), revision: "v2".to_string() }
        );
        assert_eq!("local:./m".parse::<ModelSource>().unwrap(), ModelSource::local("./m"));
        assert_eq!("./m".parse::<ModelSource>().unwrap(), ModelSource::local("./m"));
        assert!("hub:".parse::<ModelSource>().is_err());
        assert!("".parse::<ModelSource>().is_err());
    }
}
