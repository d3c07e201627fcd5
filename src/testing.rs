// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Deterministic stand-ins for the candle models, used by unit tests

use crate::classifier::SequenceClassifier;
use crate::config::AppConfig;
use crate::generator::CausalLanguageModel;
use crate::registry::{ModelRegistry, RegistryParts};
use anyhow::{bail, Result};
use serde_json::json;
use std::path::Path;

/// Classifier returning fixed scores regardless of input
pub struct StubClassifier {
    scores: Vec<f32>,
}

impl StubClassifier {
    pub fn new(scores: &[f32]) -> Self {
        Self {
            scores: scores.to_vec(),
        }
    }
}

impl SequenceClassifier for StubClassifier {
    fn class_scores(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            bail!("stub classifier received empty text");
        }
        Ok(self.scores.clone())
    }

    fn num_labels(&self) -> usize {
        self.scores.len()
    }
}

/// Byte-level language model over a 256-token vocabulary.
///
/// By default only lowercase letters and space are probable, uniformly.
pub struct StubLanguageModel {
    favoured: Vec<u32>,
    peaked: bool,
    eos: Option<u32>,
    context_length: usize,
    expected_offset: usize,
}

impl StubLanguageModel {
    pub const ALPHABET: &'static [u8] = b"abcdefghijklmnopqrstuvwxyz ";
    const VOCAB: usize = 256;

    pub fn new() -> Self {
        Self {
            favoured: Self::ALPHABET.iter().map(|&b| b as u32).collect(),
            peaked: false,
            eos: None,
            context_length: 1024,
            expected_offset: 0,
        }
    }

    /// Only `token` is probable
    pub fn always_emit(mut self, token: u32) -> Self {
        self.favoured = vec![token];
        self
    }

    /// Favoured tokens get unequal logits
    pub fn peaked(mut self) -> Self {
        self.peaked = true;
        self
    }

    pub fn with_eos(mut self, token: u32) -> Self {
        self.eos = Some(token);
        self
    }
}

impl CausalLanguageModel for StubLanguageModel {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().take(self.context_length).map(u32::from).collect())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = tokens.iter().map(|&t| t as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token(&self) -> Option<u32> {
        self.eos
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn reset(&mut self) {
        self.expected_offset = 0;
    }

    fn next_token_logits(&mut self, tokens: &[u32], offset: usize) -> Result<Vec<f32>> {
        if offset != self.expected_offset {
            bail!("out-of-order feed: expected offset {}, got {}", self.expected_offset, offset);
        }
        self.expected_offset += tokens.len();

        let mut logits = vec![-1.0e9f32; Self::VOCAB];
        for (rank, &token) in self.favoured.iter().enumerate() {
            logits[token as usize] = if self.peaked { -(rank as f32) * 0.25 } else { 0.0 };
        }
        Ok(logits)
    }
}

/// Registry built entirely from stubs
pub fn stub_registry(pretrained_scores: &[f32], finetuned_scores: &[f32]) -> ModelRegistry {
    ModelRegistry::from_parts(
        RegistryParts {
            pretrained_detector: Box::new(StubClassifier::new(pretrained_scores)),
            finetuned_detector: Box::new(StubClassifier::new(finetuned_scores)),
            pretrained_generator: Box::new(StubLanguageModel::new()),
            finetuned_generator: Box::new(StubLanguageModel::new().peaked()),
        },
        &AppConfig::default(),
    )
    .expect("stub registry")
}

/// Write a whitespace-split word-level tokenizer; `[UNK]` is id 0 and
/// `words[i]` is id `i + 1`
pub fn write_word_level_tokenizer(path: &Path, words: &[&str]) -> Result<()> {
    let mut vocab = serde_json::Map::new();
    vocab.insert("[UNK]".to_string(), json!(0));
    for (i, word) in words.iter().enumerate() {
        vocab.insert(word.to_string(), json!(i + 1));
    }
    let tokenizer = json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
    });
    std::fs::write(path, serde_json::to_string(&tokenizer)?)?;
    Ok(())
}
