// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Sequence classification models
//!
//! [`SequenceClassifier`] is the seam the detection comparator runs against.
//! [`BertSequenceClassifier`] is the candle implementation: BERT encoder,
//! CLS pooler with tanh, linear head, softmax.

use crate::registry::ModelFiles;
use anyhow::{Context, Error as E, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tokenizers::{Tokenizer, TruncationParams};

/// Standard deviation used when a classification head has to be created
const HEAD_INIT_STD: f32 = 0.02;

/// A model that scores text against a fixed set of classes
pub trait SequenceClassifier: Send + Sync {
    /// Softmax probabilities, one per output index
    fn class_scores(&self, text: &str) -> Result<Vec<f32>>;

    /// Width of the output layer
    fn num_labels(&self) -> usize;
}

/// BERT-family encoder with a sequence classification head
pub struct BertSequenceClassifier {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    num_labels: usize,
    device: Device,
}

impl BertSequenceClassifier {
    /// Load from resolved model files.
    ///
    /// Checkpoints without pooler or classifier weights (a bare pretrained
    /// encoder) get those layers initialised from `rng`.
    pub fn load<R: Rng + ?Sized>(files: &ModelFiles, device: &Device, rng: &mut R) -> Result<Self> {
        let config_str = std::fs::read_to_string(&files.config)
            .with_context(|| format!("Failed to read {}", files.config.display()))?;
        let config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", files.config.display()))?;
        let raw: serde_json::Value = serde_json::from_str(&config_str)?;
        let num_labels = num_labels_from_config(&raw);
        let max_positions = raw
            .get("max_position_embeddings")
            .and_then(|v| v.as_u64())
            .unwrap_or(512) as usize;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(E::msg)?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_positions,
                ..Default::default()
            }))
            .map_err(E::msg)?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, DType::F32, device)? };

        // Fine-tuned checkpoints nest the encoder under `bert.`
        let (bert, pooler_prefix) = if vb.contains_tensor("bert.embeddings.word_embeddings.weight") {
            (BertModel::load(vb.pp("bert"), &config)?, "bert.pooler.dense")
        } else {
            (BertModel::load(vb.clone(), &config)?, "pooler.dense")
        };

        let hidden = config.hidden_size;
        let pooler = linear_or_init(&vb, pooler_prefix, hidden, hidden, device, rng)?;
        let classifier = linear_or_init(&vb, "classifier", hidden, num_labels, device, rng)?;

        tracing::info!(
            hidden_size = hidden,
            num_labels,
            "Loaded BERT sequence classifier"
        );

        Ok(Self {
            bert,
            pooler,
            classifier,
            tokenizer,
            num_labels,
            device: device.clone(),
        })
    }
}

impl SequenceClassifier for BertSequenceClassifier {
    fn class_scores(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self.tokenizer.encode(text, true).map_err(E::msg)?;
        let token_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = token_ids.zeros_like()?;

        let sequence_output = self
            .bert
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;

        let cls_token = sequence_output.i((.., 0))?;
        let pooled = self.pooler.forward(&cls_token)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?;
        let probabilities = candle_nn::ops::softmax(&logits, D::Minus1)?.squeeze(0)?;

        tracing::debug!(tokens = encoding.get_ids().len(), "Classified text");
        Ok(probabilities.to_vec1::<f32>()?)
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }
}

/// `id2label` size, then `num_labels`, then 2
fn num_labels_from_config(raw: &serde_json::Value) -> usize {
    raw.get("id2label")
        .and_then(|v| v.as_object())
        .map(|m| m.len())
        .or_else(|| raw.get("num_labels").and_then(|v| v.as_u64()).map(|n| n as usize))
        .unwrap_or(2)
}

fn linear_or_init<R: Rng + ?Sized>(
    vb: &VarBuilder,
    prefix: &str,
    in_dim: usize,
    out_dim: usize,
    device: &Device,
    rng: &mut R,
) -> Result<Linear> {
    if vb.contains_tensor(&format!("{}.weight", prefix)) {
        return Ok(candle_nn::linear(in_dim, out_dim, vb.pp(prefix))?);
    }

    tracing::info!(layer = prefix, "No weights in checkpoint, initialising layer");
    let normal = Normal::new(0.0f32, HEAD_INIT_STD)?;
    let weights: Vec<f32> = (0..in_dim * out_dim).map(|_| normal.sample(rng)).collect();
    let weight = Tensor::from_vec(weights, (out_dim, in_dim), device)?;
    let bias = Tensor::zeros(out_dim, DType::F32, device)?;
    Ok(Linear::new(weight, Some(bias)))
}
