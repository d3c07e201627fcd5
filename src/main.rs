// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Fake news lab front end
//!
//! Usage:
//!   fakenews-app --config lab.json
//!   fakenews-app detect "Scientists confirm the moon is hollow"
//!   fakenews-app generate "A new virus has emerged" --max-length 150 --json

use anyhow::Result;
use clap::{Parser, Subcommand};
use fakenews_lab::config::{AppConfig, DevicePreference, ModelSource};
use fakenews_lab::datasets::DatasetCatalog;
use fakenews_lab::pipeline::{
    is_blank, ComparisonPipeline, ComparisonReport, GenerationParams, EMPTY_PROMPT_WARNING,
    EMPTY_TEXT_WARNING,
};
use fakenews_lab::registry::ModelRegistry;
use fakenews_lab::server::{self, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fakenews-app")]
#[command(about = "Compare pretrained and fine-tuned fake news models side by side")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Force CPU even when CUDA is available
    #[arg(long, global = true)]
    cpu: bool,

    /// Seed for the generation RNG
    #[arg(short, long, global = true)]
    seed: Option<u64>,

    /// Pretrained detector source (hub:<repo>[@rev] or a local path)
    #[arg(long, global = true)]
    pretrained_detector: Option<ModelSource>,

    /// Fine-tuned detector source
    #[arg(long, global = true)]
    finetuned_detector: Option<ModelSource>,

    /// Pretrained generator source
    #[arg(long, global = true)]
    pretrained_generator: Option<ModelSource>,

    /// Fine-tuned generator source
    #[arg(long, global = true)]
    finetuned_generator: Option<ModelSource>,

    /// Print machine-readable JSON reports
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the comparison UI over HTTP (default)
    Serve {
        /// Bind address
        #[arg(short, long)]
        address: Option<SocketAddr>,

        /// Directory holding ISOT/ and WELFake.csv
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
    /// Classify one text with both detectors
    Detect {
        text: String,
    },
    /// Continue one prompt with both generators
    Generate {
        prompt: String,

        /// Total token budget, prompt included
        #[arg(long, default_value_t = GenerationParams::default().max_length)]
        max_length: usize,

        #[arg(long, default_value_t = GenerationParams::default().temperature)]
        temperature: f64,
    },
}

impl Args {
    fn app_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };

        if self.cpu {
            config.device = DevicePreference::Cpu;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        let models = &mut config.models;
        for (slot, value) in [
            (&mut models.pretrained_detector, &self.pretrained_detector),
            (&mut models.finetuned_detector, &self.finetuned_detector),
            (&mut models.pretrained_generator, &self.pretrained_generator),
            (&mut models.finetuned_generator, &self.finetuned_generator),
        ] {
            if let Some(source) = value {
                *slot = source.clone();
            }
        }
        if let Some(Command::Serve { address, data_dir }) = &self.command {
            if let Some(address) = address {
                config.address = *address;
            }
            if data_dir.is_some() {
                config.data_dir = data_dir.clone();
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.app_config()?;

    // Reject blank input before paying for model loading
    match &args.command {
        Some(Command::Detect { text }) if is_blank(text) => {
            println!("{}", EMPTY_TEXT_WARNING);
            return Ok(());
        }
        Some(Command::Generate { prompt, .. }) if is_blank(prompt) => {
            println!("{}", EMPTY_PROMPT_WARNING);
            return Ok(());
        }
        _ => {}
    }

    tracing::info!("Fake News Lab");
    tracing::info!("=============");
    tracing::info!("Seed: {}", config.seed);
    tracing::info!("Device preference: {:?}", config.device);

    let registry = Arc::new(ModelRegistry::load(&config)?);
    let pipeline = ComparisonPipeline::new(Arc::clone(&registry));

    let outcome = match args.command {
        None | Some(Command::Serve { .. }) => serve(pipeline, &config),
        Some(Command::Detect { text }) => {
            let outcome = detect(&pipeline, &text, args.json);
            drop(pipeline);
            outcome
        }
        Some(Command::Generate {
            prompt,
            max_length,
            temperature,
        }) => {
            let params = GenerationParams {
                max_length,
                temperature,
            };
            let outcome = generate(&pipeline, &prompt, params, args.json);
            drop(pipeline);
            outcome
        }
    };

    match Arc::try_unwrap(registry) {
        Ok(registry) => registry.shutdown(),
        Err(_) => tracing::warn!("Model registry still shared at exit"),
    }
    outcome
}

fn serve(pipeline: ComparisonPipeline, config: &AppConfig) -> Result<()> {
    let datasets = match &config.data_dir {
        Some(dir) => Some(DatasetCatalog::load(dir)?),
        None => {
            tracing::warn!("No data directory configured; dataset endpoints disabled");
            None
        }
    };

    let state = AppState::new(pipeline, datasets, config.seed);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::serve(state, config.address))?;
    Ok(())
}

fn detect(pipeline: &ComparisonPipeline, text: &str, json: bool) -> Result<()> {
    let results = pipeline.compare_detection(text)?;

    if json {
        let report = ComparisonReport::new(text, results);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(70));
    println!("DETECTION COMPARISON");
    println!("{}", "=".repeat(70));
    println!("{:<20} {:>12} {:>14}", "Model", "Prediction", "Confidence");
    println!("{:-<70}", "");
    for (_, result) in results.iter() {
        println!(
            "{:<20} {:>12} {:>13.2}%",
            result.source,
            result.label.title(),
            result.confidence
        );
    }
    println!("{:-<70}", "");

    Ok(())
}

fn generate(
    pipeline: &ComparisonPipeline,
    prompt: &str,
    params: GenerationParams,
    json: bool,
) -> Result<()> {
    if !params.within_ui_bounds() {
        tracing::warn!(
            max_length = params.max_length,
            temperature = params.temperature,
            "Parameters outside the UI slider ranges"
        );
    }

    let results = pipeline.compare_generation(prompt, params)?;

    if json {
        let report = ComparisonReport::new(prompt, results);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(70));
    println!("GENERATION COMPARISON");
    println!("{}", "=".repeat(70));
    for (variant, result) in results.iter() {
        println!("\n## {} ##", variant);
        println!("{}", result.generated_text);
        if result.perplexity.is_nan() {
            println!("Perplexity: n/a");
        } else {
            println!("Perplexity: {:.2}", result.perplexity);
        }
    }
    println!("{:-<70}", "");

    Ok(())
}
