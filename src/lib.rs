// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Fake news lab: pretrained vs fine-tuned, side by side
//!
//! This crate provides:
//! - A registry of four resident models (two detectors, two generators)
//! - Detection and generation comparisons with perplexity scoring
//! - ISOT and WELFake loading, sampling and export
//! - An HTTP front end serving the comparison UI
//!
//! Generation is reproducible for a fixed seed and call sequence.

pub mod classifier;
pub mod config;
pub mod datasets;
pub mod generator;
pub mod pipeline;
pub mod registry;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::{BertSequenceClassifier, SequenceClassifier};
pub use config::{AppConfig, DevicePreference, LabelMap, ModelSource, ModelsConfig};
pub use datasets::{DatasetCatalog, DatasetRecord, DatasetView, Label};
pub use generator::{CausalLanguageModel, Qwen2CausalLm};
pub use pipeline::{
    ClassificationResult, ComparisonPipeline, ComparisonReport, GenerationParams,
    GenerationResult, SideBySide,
};
pub use registry::{ModelRegistry, Variant};
pub use server::{AppState, ServerError};
