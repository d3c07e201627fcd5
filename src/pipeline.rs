// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Side-by-side comparison pipeline
//!
//! Orchestrates:
//! - Detection: both classifiers score the same text
//! - Generation: both language models continue the same prompt
//! - Perplexity: each output scored under the model that produced it
//!
//! Each comparison runs one parameterised single-model operation per
//! [`Variant`], pretrained first.

use crate::config::LabelMap;
use crate::datasets::Label;
use crate::generator;
use crate::registry::{GeneratorPair, ModelRegistry, Variant};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Warning shown instead of running detection on blank input
pub const EMPTY_TEXT_WARNING: &str = "Please enter some news text.";
/// Warning shown instead of running generation on a blank prompt
pub const EMPTY_PROMPT_WARNING: &str = "Please enter a prompt.";

/// Slider bounds offered by the generator UI (inclusive)
pub const TEMPERATURE_RANGE: (f64, f64) = (0.5, 1.5);
pub const MAX_LENGTH_RANGE: (usize, usize) = (50, 250);

/// True for empty or whitespace-only input
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One result per side of the comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideBySide<T> {
    pub pretrained: T,
    pub fine_tuned: T,
}

impl<T> SideBySide<T> {
    /// Run `f` for each variant in comparison order
    pub fn try_from_fn(mut f: impl FnMut(Variant) -> Result<T>) -> Result<Self> {
        let pretrained = f(Variant::Pretrained)?;
        let fine_tuned = f(Variant::FineTuned)?;
        Ok(Self {
            pretrained,
            fine_tuned,
        })
    }

    pub fn get(&self, variant: Variant) -> &T {
        match variant {
            Variant::Pretrained => &self.pretrained,
            Variant::FineTuned => &self.fine_tuned,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variant, &T)> {
        Variant::BOTH.into_iter().map(move |v| (v, self.get(v)))
    }
}

/// Detector output for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub variant: Variant,
    pub label: Label,
    /// Winning class probability as a percentage, two decimals
    pub confidence: f64,
    pub source: String,
}

/// Generator output for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub variant: Variant,
    pub generated_text: String,
    /// NaN (serialised as null) when the text cannot be scored
    pub perplexity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Total token budget, prompt included
    pub max_length: usize,
    pub temperature: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 100,
            temperature: 1.0,
        }
    }
}

impl GenerationParams {
    /// Whether both values sit inside the UI slider ranges
    pub fn within_ui_bounds(&self) -> bool {
        (TEMPERATURE_RANGE.0..=TEMPERATURE_RANGE.1).contains(&self.temperature)
            && (MAX_LENGTH_RANGE.0..=MAX_LENGTH_RANGE.1).contains(&self.max_length)
    }
}

/// Map class scores to a label and percentage confidence.
///
/// Fake wins only on a strictly higher score; ties go to Real.
pub fn interpret_scores(scores: &[f32], label_map: LabelMap) -> Result<(Label, f64)> {
    label_map.validate(scores.len())?;
    let fake = scores[label_map.fake_index];
    let real = scores[label_map.real_index];

    let label = if fake > real { Label::Fake } else { Label::Real };
    let confidence = round2(fake.max(real) as f64 * 100.0);
    Ok((label, confidence))
}

/// Complete record of one comparison, for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport<T> {
    pub input: String,
    pub results: SideBySide<T>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl<T> ComparisonReport<T> {
    pub fn new(input: &str, results: SideBySide<T>) -> Self {
        Self {
            input: input.to_string(),
            results,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Main comparison pipeline
pub struct ComparisonPipeline {
    registry: Arc<ModelRegistry>,
}

impl ComparisonPipeline {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Classify `text` with one detector. Input is not validated here.
    pub fn detect_one(&self, variant: Variant, text: &str) -> Result<ClassificationResult> {
        let pair = self.registry.detector(variant);
        let scores = pair
            .model
            .class_scores(text)
            .with_context(|| format!("{} detection failed", variant))?;
        let (label, confidence) = interpret_scores(&scores, self.registry.label_map())?;

        tracing::debug!(%variant, ?label, confidence, "Detection result");
        Ok(ClassificationResult {
            variant,
            label,
            confidence,
            source: variant.source_tag().to_string(),
        })
    }

    pub fn compare_detection(&self, text: &str) -> Result<SideBySide<ClassificationResult>> {
        SideBySide::try_from_fn(|variant| self.detect_one(variant, text))
    }

    /// Generate with one model, then score the output under that same model
    pub fn generate_one(
        &self,
        variant: Variant,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<GenerationResult> {
        let pair = self.registry.generator(variant);
        let generated_text = {
            let mut model = pair.model.lock();
            let mut rng = self.registry.rng().lock();
            generator::generate(
                model.as_mut(),
                prompt,
                params.max_length,
                params.temperature,
                &mut *rng,
            )
            .with_context(|| format!("{} generation failed", variant))?
        };
        let perplexity = Self::score_perplexity(pair, &generated_text)?;

        tracing::debug!(%variant, chars = generated_text.len(), perplexity, "Generation result");
        Ok(GenerationResult {
            variant,
            generated_text,
            perplexity,
        })
    }

    pub fn compare_generation(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<SideBySide<GenerationResult>> {
        SideBySide::try_from_fn(|variant| self.generate_one(variant, prompt, params))
    }

    /// Perplexity of `text` under `pair`'s model, two decimals; NaN when undefined
    pub fn score_perplexity(pair: &GeneratorPair, text: &str) -> Result<f64> {
        let mut model = pair.model.lock();
        let value = generator::perplexity(model.as_mut(), text)
            .with_context(|| format!("{} perplexity scoring failed", pair.variant))?;
        Ok(round2(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stub_registry;
    use proptest::prelude::*;

    fn pipeline(pre: &[f32], fine: &[f32]) -> ComparisonPipeline {
        ComparisonPipeline::new(Arc::new(stub_registry(pre, fine)))
    }

    #[test]
    fn test_interpret_scores() {
        let map = LabelMap::default();
        assert_eq!(interpret_scores(&[0.8765, 0.1235], map).unwrap(), (Label::Fake, 87.65));
        assert_eq!(interpret_scores(&[0.1, 0.9], map).unwrap(), (Label::Real, 90.0));
    }

    #[test]
    fn test_tie_resolves_to_real() {
        let (label, confidence) = interpret_scores(&[0.5, 0.5], LabelMap::default()).unwrap();
        assert_eq!(label, Label::Real);
        assert_eq!(confidence, 50.0);
    }

    #[test]
    fn test_swapped_label_map() {
        let map = LabelMap { fake_index: 1, real_index: 0 };
        assert_eq!(interpret_scores(&[0.2, 0.8], map).unwrap().0, Label::Fake);
    }

    #[test]
    fn test_scores_shorter_than_map() {
        assert!(interpret_scores(&[1.0], LabelMap::default()).is_err());
    }

    #[test]
    fn test_compare_detection() {
        let pipeline = pipeline(&[0.7, 0.3], &[0.05, 0.95]);
        let results = pipeline.compare_detection("Aliens endorse candidate").unwrap();

        assert_eq!(results.pretrained.label, Label::Fake);
        assert_eq!(results.pretrained.confidence, 70.0);
        assert_eq!(results.pretrained.source, "Pretrained Model");
        assert_eq!(results.fine_tuned.label, Label::Real);
        assert_eq!(results.fine_tuned.confidence, 95.0);
        assert_eq!(results.fine_tuned.source, "Fine-Tuned Model");

        let order: Vec<Variant> = results.iter().map(|(v, _)| v).collect();
        assert_eq!(order, Variant::BOTH.to_vec());
    }

    #[test]
    fn test_compare_generation_end_to_end() {
        let pipeline = pipeline(&[0.5, 0.5], &[0.5, 0.5]);
        let prompt = "A new virus has emerged";
        let params = GenerationParams { max_length: 100, temperature: 1.0 };

        let results = pipeline.compare_generation(prompt, params).unwrap();
        for (_, result) in results.iter() {
            assert!(!result.generated_text.is_empty());
            assert!(result.generated_text.starts_with(prompt));
            assert!(result.generated_text.len() > prompt.len());
            assert!(result.perplexity >= 1.0);
        }
    }

    #[test]
    fn test_generation_stream_advances_between_calls() {
        let pipeline = pipeline(&[0.5, 0.5], &[0.5, 0.5]);
        let params = GenerationParams { max_length: 60, temperature: 1.0 };

        let first = pipeline.generate_one(Variant::Pretrained, "the", params).unwrap();
        let second = pipeline.generate_one(Variant::Pretrained, "the", params).unwrap();
        assert_ne!(first.generated_text, second.generated_text);
    }

    #[test]
    fn test_score_perplexity_nan_for_empty() {
        let registry = stub_registry(&[0.5, 0.5], &[0.5, 0.5]);
        for variant in Variant::BOTH {
            let ppl = ComparisonPipeline::score_perplexity(registry.generator(variant), "").unwrap();
            assert!(ppl.is_nan());
        }
    }

    #[test]
    fn test_score_perplexity_rounded() {
        let registry = stub_registry(&[0.5, 0.5], &[0.5, 0.5]);
        let ppl = ComparisonPipeline::score_perplexity(registry.generator(Variant::Pretrained), "fake news")
            .unwrap();
        assert_eq!(ppl, 27.0);
    }

    #[test]
    fn test_nan_perplexity_serialises_as_null() {
        let result = GenerationResult {
            variant: Variant::FineTuned,
            generated_text: String::new(),
            perplexity: f64::NAN,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"perplexity\":null"));
    }

    #[test]
    fn test_params_bounds() {
        assert!(GenerationParams::default().within_ui_bounds());
        assert!(!GenerationParams { max_length: 300, temperature: 1.0 }.within_ui_bounds());
        assert!(!GenerationParams { max_length: 100, temperature: 0.1 }.within_ui_bounds());
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(""));
        assert!(is_blank(" \n\t"));
        assert!(!is_blank(" x "));
    }

    #[test]
    fn test_report_carries_version() {
        let pipeline = pipeline(&[0.6, 0.4], &[0.4, 0.6]);
        let results = pipeline.compare_detection("headline").unwrap();
        let report = ComparisonReport::new("headline", results);
        assert_eq!(report.version, env!("CARGO_PKG_VERSION"));
        assert!(serde_json::to_string(&report).unwrap().contains("fine_tuned"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_confidence_in_range(p in 0.0f32..=1.0) {
            let (_, confidence) = interpret_scores(&[p, 1.0 - p], LabelMap::default()).unwrap();
            prop_assert!((50.0..=100.0).contains(&confidence));
        }
    }
}
