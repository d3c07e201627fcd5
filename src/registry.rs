// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Model registry
//!
//! Owns the four resident models (pretrained/fine-tuned detector,
//! pretrained/fine-tuned generator) for the lifetime of the process:
//! - resolves hub or local sources to config, tokenizer and weight files
//! - selects the compute device
//! - seeds the generation RNG once
//! - validates the detector label map against each loaded classifier

use crate::classifier::{BertSequenceClassifier, SequenceClassifier};
use crate::config::{AppConfig, DevicePreference, LabelMap, ModelSource};
use crate::generator::{CausalLanguageModel, Qwen2CausalLm};
use anyhow::{bail, Context, Result};
use candle_core::Device;
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Output width every detector must have: one fake and one real score
pub const DETECTOR_LABELS: usize = 2;

/// Which side of a comparison a model belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Pretrained,
    FineTuned,
}

impl Variant {
    /// Comparison order: pretrained first
    pub const BOTH: [Variant; 2] = [Variant::Pretrained, Variant::FineTuned];

    /// Tag shown above each result panel
    pub fn source_tag(&self) -> &'static str {
        match self {
            Variant::Pretrained => "Pretrained Model",
            Variant::FineTuned => "Fine-Tuned Model",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Classification,
    Generation,
}

/// A loaded model with its comparison side, task and provenance
pub struct ModelPair<M> {
    pub variant: Variant,
    pub task: Task,
    pub source: ModelSource,
    pub model: M,
}

impl<M> ModelPair<M> {
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            variant: self.variant,
            task: self.task,
            source: self.source.to_string(),
        }
    }
}

/// Serializable description of one resident model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub variant: Variant,
    pub task: Task,
    pub source: String,
}

pub type ClassifierPair = ModelPair<Box<dyn SequenceClassifier>>;
/// Decoding advances the KV cache, so generators are locked per call
pub type GeneratorPair = ModelPair<Mutex<Box<dyn CausalLanguageModel>>>;

/// Files making up one model checkpoint
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

impl ModelFiles {
    pub fn resolve(source: &ModelSource) -> Result<Self> {
        match source {
            ModelSource::Local { path } => Self::from_dir(path),
            ModelSource::Hub { repo, revision } => Self::from_hub(repo, revision),
        }
    }

    /// Local checkpoint; every file must already exist
    pub fn from_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("Model directory not found: {}", dir.display());
        }

        let config = dir.join("config.json");
        let tokenizer = dir.join("tokenizer.json");
        for required in [&config, &tokenizer] {
            if !required.exists() {
                bail!("Missing {} in model directory", required.display());
            }
        }

        let index_path = dir.join("model.safetensors.index.json");
        let weights = if index_path.exists() {
            safetensor_shards(&index_path)?
                .into_iter()
                .map(|f| dir.join(f))
                .collect()
        } else {
            let single = dir.join("model.safetensors");
            if !single.exists() {
                bail!("No safetensors weights found in {}", dir.display());
            }
            vec![single]
        };

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    /// Hub checkpoint, downloaded into the local hub cache on first use
    pub fn from_hub(repo_id: &str, revision: &str) -> Result<Self> {
        tracing::info!("Resolving {}@{} from the hub", repo_id, revision);
        let api = Api::new().context("Failed to initialise hub client")?;
        let repo = api.repo(Repo::with_revision(
            repo_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));

        let config = repo
            .get("config.json")
            .with_context(|| format!("Failed to fetch config.json from {}", repo_id))?;
        let tokenizer = repo
            .get("tokenizer.json")
            .with_context(|| format!("Failed to fetch tokenizer.json from {}", repo_id))?;

        let weights = match repo.get("model.safetensors.index.json") {
            Ok(index_path) => safetensor_shards(&index_path)?
                .iter()
                .map(|f| {
                    repo.get(f)
                        .with_context(|| format!("Failed to fetch {} from {}", f, repo_id))
                })
                .collect::<Result<Vec<_>>>()?,
            Err(_) => vec![repo
                .get("model.safetensors")
                .with_context(|| format!("Failed to fetch model.safetensors from {}", repo_id))?],
        };

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }
}

/// Unique shard file names listed in a safetensors index
fn safetensor_shards(index_path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(index_path)
        .with_context(|| format!("Failed to read {}", index_path.display()))?;
    let index: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", index_path.display()))?;

    let files: BTreeSet<String> = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .map(|map| map.values().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    if files.is_empty() {
        bail!("No safetensors shards listed in {}", index_path.display());
    }
    Ok(files.into_iter().collect())
}

/// Pick CUDA device 0 when allowed and present, else CPU
pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Auto => match Device::cuda_if_available(0) {
            Ok(device) if device.is_cuda() => {
                tracing::info!("CUDA device detected, using GPU");
                device
            }
            Ok(_) => {
                tracing::warn!("No CUDA device available, using CPU");
                Device::Cpu
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to initialise CUDA, using CPU");
                Device::Cpu
            }
        },
    }
}

/// Already constructed models, for building a registry without loading weights
pub struct RegistryParts {
    pub pretrained_detector: Box<dyn SequenceClassifier>,
    pub finetuned_detector: Box<dyn SequenceClassifier>,
    pub pretrained_generator: Box<dyn CausalLanguageModel>,
    pub finetuned_generator: Box<dyn CausalLanguageModel>,
}

pub struct ModelRegistry {
    pretrained_detector: ClassifierPair,
    finetuned_detector: ClassifierPair,
    pretrained_generator: GeneratorPair,
    finetuned_generator: GeneratorPair,
    label_map: LabelMap,
    rng: Mutex<ChaCha8Rng>,
    device: String,
}

impl ModelRegistry {
    /// Load all four models. Any failure here is a startup failure.
    pub fn load(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let device = select_device(config.device);
        let models = &config.models;

        // Heads missing from a checkpoint are initialised from their own stream
        let mut head_rng = ChaCha8Rng::seed_from_u64(config.seed);

        let load_classifier = |source: &ModelSource, rng: &mut ChaCha8Rng| -> Result<Box<dyn SequenceClassifier>> {
            tracing::info!("Loading detector from {}", source);
            let files = ModelFiles::resolve(source)?;
            let model = BertSequenceClassifier::load(&files, &device, rng)
                .with_context(|| format!("Incompatible detector checkpoint at {}", source))?;
            Ok(Box::new(model))
        };
        let load_generator = |source: &ModelSource| -> Result<Box<dyn CausalLanguageModel>> {
            tracing::info!("Loading generator from {}", source);
            let files = ModelFiles::resolve(source)?;
            let model = Qwen2CausalLm::load(&files, &device)
                .with_context(|| format!("Incompatible generator checkpoint at {}", source))?;
            Ok(Box::new(model))
        };

        let parts = RegistryParts {
            pretrained_detector: load_classifier(&models.pretrained_detector, &mut head_rng)?,
            finetuned_detector: load_classifier(&models.finetuned_detector, &mut head_rng)?,
            pretrained_generator: load_generator(&models.pretrained_generator)?,
            finetuned_generator: load_generator(&models.finetuned_generator)?,
        };

        let mut registry = Self::from_parts(parts, config)?;
        registry.device = format!("{:?}", device);
        for info in registry.models() {
            tracing::info!(variant = %info.variant, task = ?info.task, source = %info.source, "Resident model");
        }
        tracing::info!(device = %registry.device, seed = config.seed, "Model registry ready");
        Ok(registry)
    }

    /// Assemble a registry from constructed models
    pub fn from_parts(parts: RegistryParts, config: &AppConfig) -> Result<Self> {
        let models = &config.models;

        for (variant, detector, source) in [
            (Variant::Pretrained, &parts.pretrained_detector, &models.pretrained_detector),
            (Variant::FineTuned, &parts.finetuned_detector, &models.finetuned_detector),
        ] {
            let num_labels = detector.num_labels();
            if num_labels != DETECTOR_LABELS {
                bail!(
                    "{} detector at {} has {} output labels; exactly {} (fake, real) are required",
                    variant,
                    source,
                    num_labels,
                    DETECTOR_LABELS
                );
            }
            config
                .label_map
                .validate(num_labels)
                .with_context(|| format!("{} detector does not match the label map", variant))?;
        }

        Ok(Self {
            pretrained_detector: ModelPair {
                variant: Variant::Pretrained,
                task: Task::Classification,
                source: models.pretrained_detector.clone(),
                model: parts.pretrained_detector,
            },
            finetuned_detector: ModelPair {
                variant: Variant::FineTuned,
                task: Task::Classification,
                source: models.finetuned_detector.clone(),
                model: parts.finetuned_detector,
            },
            pretrained_generator: ModelPair {
                variant: Variant::Pretrained,
                task: Task::Generation,
                source: models.pretrained_generator.clone(),
                model: Mutex::new(parts.pretrained_generator),
            },
            finetuned_generator: ModelPair {
                variant: Variant::FineTuned,
                task: Task::Generation,
                source: models.finetuned_generator.clone(),
                model: Mutex::new(parts.finetuned_generator),
            },
            label_map: config.label_map,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.seed)),
            device: "Cpu".to_string(),
        })
    }

    pub fn detector(&self, variant: Variant) -> &ClassifierPair {
        match variant {
            Variant::Pretrained => &self.pretrained_detector,
            Variant::FineTuned => &self.finetuned_detector,
        }
    }

    pub fn generator(&self, variant: Variant) -> &GeneratorPair {
        match variant {
            Variant::Pretrained => &self.pretrained_generator,
            Variant::FineTuned => &self.finetuned_generator,
        }
    }

    /// Detectors then generators, each pretrained first
    pub fn models(&self) -> Vec<ModelInfo> {
        Variant::BOTH
            .iter()
            .map(|v| self.detector(*v).info())
            .chain(Variant::BOTH.iter().map(|v| self.generator(*v).info()))
            .collect()
    }

    pub fn label_map(&self) -> LabelMap {
        self.label_map
    }

    /// Shared generation RNG, seeded once at construction
    pub fn rng(&self) -> &Mutex<ChaCha8Rng> {
        &self.rng
    }

    pub fn device_name(&self) -> &str {
        &self.device
    }

    /// Release all models
    pub fn shutdown(self) {
        tracing::info!("Shutting down model registry");
        drop(self);
    }
}
