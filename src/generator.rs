// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Causal language models: sampling-based continuation and perplexity
//!
//! Decoding and scoring are written once against [`CausalLanguageModel`];
//! [`Qwen2CausalLm`] is the candle-backed implementation.

use crate::registry::ModelFiles;
use anyhow::{anyhow, bail, Context, Error as E, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::qwen2::{Config as Qwen2Config, Model as Qwen2Model};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tokenizers::{Tokenizer, TruncationParams};

/// Candidates kept per sampling step
pub const TOP_K: usize = 50;

/// Autoregressive model with an incremental (KV-cached) forward pass
pub trait CausalLanguageModel: Send {
    /// Token ids for `text`, truncated to [`CausalLanguageModel::context_length`]
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, tokens: &[u32]) -> Result<String>;

    fn eos_token(&self) -> Option<u32>;

    /// Maximum sequence length the model accepts
    fn context_length(&self) -> usize;

    /// Drop any cached state from a previous sequence
    fn reset(&mut self);

    /// Vocabulary logits for the position following `tokens`.
    ///
    /// `offset` is the position of `tokens[0]` in the running sequence; the
    /// caller feeds a sequence front to back without gaps.
    fn next_token_logits(&mut self, tokens: &[u32], offset: usize) -> Result<Vec<f32>>;

    /// `log p(tokens[i + 1] | tokens[..=i])` for every position with a target.
    ///
    /// Leaves no cached state behind.
    fn token_log_probs(&mut self, tokens: &[u32]) -> Result<Vec<f64>> {
        incremental_log_probs(self, tokens)
    }
}

/// Score `tokens` one position at a time through the KV cache
pub fn incremental_log_probs<M: CausalLanguageModel + ?Sized>(
    model: &mut M,
    tokens: &[u32],
) -> Result<Vec<f64>> {
    model.reset();
    let mut log_probs = Vec::with_capacity(tokens.len().saturating_sub(1));
    for (pos, pair) in tokens.windows(2).enumerate() {
        let logits = model.next_token_logits(&pair[..1], pos)?;
        log_probs.push(log_softmax_at(&logits, pair[1] as usize)?);
    }
    model.reset();
    Ok(log_probs)
}

/// Sample a continuation of `prompt` until `max_length` total tokens or EOS.
///
/// The result is the literal prompt followed by the decoded continuation.
pub fn generate<R: Rng + ?Sized>(
    model: &mut dyn CausalLanguageModel,
    prompt: &str,
    max_length: usize,
    temperature: f64,
    rng: &mut R,
) -> Result<String> {
    let prompt_tokens = model.encode(prompt)?;
    let budget = max_length.min(model.context_length());
    if prompt_tokens.is_empty() || prompt_tokens.len() >= budget {
        return Ok(prompt.to_string());
    }

    model.reset();
    let eos = model.eos_token();
    let mut tokens = prompt_tokens.clone();
    let mut logits = model.next_token_logits(&tokens, 0)?;

    while tokens.len() < budget {
        let next = sample_next_token(&logits, temperature, TOP_K, rng)?;
        if Some(next) == eos {
            break;
        }
        tokens.push(next);
        if tokens.len() >= budget {
            break;
        }
        logits = model.next_token_logits(&[next], tokens.len() - 1)?;
    }

    let full = model.decode(&tokens)?;
    let decoded_prompt = model.decode(&prompt_tokens)?;
    let continuation = full.get(decoded_prompt.len()..).unwrap_or("");

    tracing::debug!(
        prompt_tokens = prompt_tokens.len(),
        generated_tokens = tokens.len() - prompt_tokens.len(),
        "Generation complete"
    );

    Ok(format!("{}{}", prompt, continuation))
}

/// exp(mean next-token negative log-likelihood) of `text` under `model`.
///
/// NaN when the text is blank or has fewer than two tokens, since no
/// next-token target exists.
pub fn perplexity(model: &mut dyn CausalLanguageModel, text: &str) -> Result<f64> {
    if text.trim().is_empty() {
        return Ok(f64::NAN);
    }
    let tokens = model.encode(text)?;
    if tokens.len() < 2 {
        return Ok(f64::NAN);
    }

    let log_probs = model.token_log_probs(&tokens)?;
    let mean_nll = -log_probs.iter().sum::<f64>() / log_probs.len() as f64;
    tracing::debug!(tokens = tokens.len(), mean_nll, "Scored perplexity");
    Ok(mean_nll.exp())
}

/// Temperature-scaled top-k multinomial sampling; greedy when `temperature <= 0`
pub fn sample_next_token<R: Rng + ?Sized>(
    logits: &[f32],
    temperature: f64,
    top_k: usize,
    rng: &mut R,
) -> Result<u32> {
    if logits.is_empty() {
        bail!("Cannot sample from empty logits");
    }

    let mut ranked: Vec<usize> = (0..logits.len()).collect();
    ranked.sort_by(|&a, &b| {
        logits[b]
            .partial_cmp(&logits[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if temperature <= 0.0 {
        return Ok(ranked[0] as u32);
    }

    ranked.truncate(top_k.max(1));
    let scaled: Vec<f64> = ranked
        .iter()
        .map(|&i| logits[i] as f64 / temperature)
        .collect();
    let max = scaled.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = scaled.iter().map(|x| (x - max).exp()).collect();

    let dist = WeightedIndex::new(&weights)
        .map_err(|e| anyhow!("Degenerate next-token distribution: {}", e))?;
    Ok(ranked[dist.sample(rng)] as u32)
}

fn log_softmax_at(logits: &[f32], index: usize) -> Result<f64> {
    let target = *logits
        .get(index)
        .with_context(|| format!("Token {} outside vocabulary of {}", index, logits.len()))?
        as f64;
    let max = logits.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = logits.iter().map(|&x| (x as f64 - max).exp()).sum();
    Ok(target - max - sum.ln())
}

/// Qwen2 causal LM loaded through candle
pub struct Qwen2CausalLm {
    model: Qwen2Model,
    lm_head: Linear,
    tokenizer: Tokenizer,
    device: Device,
    eos_token: Option<u32>,
    context_length: usize,
}

impl Qwen2CausalLm {
    pub fn load(files: &ModelFiles, device: &Device) -> Result<Self> {
        let config_str = std::fs::read_to_string(&files.config)
            .with_context(|| format!("Failed to read {}", files.config.display()))?;
        let config: Qwen2Config = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", files.config.display()))?;
        let raw: serde_json::Value = serde_json::from_str(&config_str)?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(E::msg)?;
        let context_length = config.max_position_embeddings;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: context_length,
                ..Default::default()
            }))
            .map_err(E::msg)?;

        let eos_token = eos_from_config(&raw).or_else(|| tokenizer.token_to_id("<|endoftext|>"));

        let dtype = if device.is_cuda() { DType::BF16 } else { DType::F32 };
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, device)? };
        let model = Qwen2Model::new(&config, vb.clone())?;
        // Small checkpoints tie the output projection to the input embeddings
        let lm_head = if vb.contains_tensor("lm_head.weight") {
            candle_nn::linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?
        } else {
            let embeddings = vb
                .pp("model.embed_tokens")
                .get((config.vocab_size, config.hidden_size), "weight")?;
            Linear::new(embeddings, None)
        };

        tracing::info!(
            hidden_size = config.hidden_size,
            num_layers = config.num_hidden_layers,
            vocab_size = config.vocab_size,
            context_length,
            "Loaded Qwen2 causal LM"
        );

        Ok(Self {
            model,
            lm_head,
            tokenizer,
            device: device.clone(),
            eos_token,
            context_length,
        })
    }
}

impl CausalLanguageModel for Qwen2CausalLm {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.tokenizer.encode(text, true).map_err(E::msg)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer.decode(tokens, true).map_err(E::msg)
    }

    fn eos_token(&self) -> Option<u32> {
        self.eos_token
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn reset(&mut self) {
        self.model.clear_kv_cache();
    }

    fn next_token_logits(&mut self, tokens: &[u32], offset: usize) -> Result<Vec<f32>> {
        if tokens.is_empty() {
            bail!("No tokens to feed at offset {}", offset);
        }
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let hidden = self.model.forward(&input, offset, None)?;
        // Only the last position is projected onto the vocabulary
        let last = hidden.narrow(1, tokens.len() - 1, 1)?;
        let logits = self.lm_head.forward(&last)?;
        Ok(logits.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    /// One teacher-forced pass over the whole sequence
    fn token_log_probs(&mut self, tokens: &[u32]) -> Result<Vec<f64>> {
        if tokens.len() < 2 {
            return Ok(Vec::new());
        }
        let targets = tokens.len() - 1;

        self.model.clear_kv_cache();
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let hidden = self.model.forward(&input, 0, None);
        self.model.clear_kv_cache();

        // [1, targets, vocab]
        let logits = self
            .lm_head
            .forward(&hidden?.narrow(1, 0, targets)?)?
            .to_dtype(DType::F32)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        let next = Tensor::new(&tokens[1..], &self.device)?.reshape((1, targets, 1))?;
        let picked = log_probs.gather(&next, D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        Ok(picked.into_iter().map(f64::from).collect())
    }
}

/// `eos_token_id` may be a single id or a list; the first one wins
fn eos_from_config(raw: &serde_json::Value) -> Option<u32> {
    let value = raw.get("eos_token_id")?;
    value
        .as_u64()
        .or_else(|| value.as_array().and_then(|ids| ids.first()).and_then(|v| v.as_u64()))
        .map(|id| id as u32)
}
