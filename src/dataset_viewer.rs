// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Standalone dataset viewer
//!
//! Samples records from ISOT / WELFake and optionally writes the two
//! export artifacts.

use anyhow::Result;
use clap::Parser;
use fakenews_lab::datasets::{
    clamp_sample_count, sample_records, DatasetCatalog, DatasetView, SAMPLE_COUNT_DEFAULT,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dataset-viewer")]
#[command(about = "Browse and export the ISOT and WELFake datasets")]
#[command(version)]
struct Args {
    /// Directory holding ISOT/Fake.csv, ISOT/True.csv and WELFake.csv
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// View to sample from
    #[arg(short, long, value_enum, default_value_t = DatasetView::AllCombined)]
    view: DatasetView,

    /// Records to show (clamped to 10..=1000 in steps of 10)
    #[arg(short = 'n', long, default_value_t = SAMPLE_COUNT_DEFAULT)]
    samples: usize,

    /// Random seed
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Write fake_news_combined.txt and detector_training_data.csv here
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Truncate displayed text to this many characters
    #[arg(long, default_value_t = 120)]
    width: usize,
}

fn preview(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let cut: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", cut)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let catalog = DatasetCatalog::load(&args.data_dir)?;
    let summary = catalog.summary();

    println!("\nDatasets: {}", args.data_dir.display());
    println!("  Total records: {}", summary.total_records);
    for (name, count) in &summary.view_counts {
        println!("  {}: {}", name, count);
    }

    println!("\nLabel distribution:");
    let mut labels: Vec<_> = summary.label_distribution.iter().collect();
    labels.sort();
    for (label, count) in labels {
        let share = if summary.total_records == 0 {
            0.0
        } else {
            *count as f64 / summary.total_records as f64 * 100.0
        };
        println!("  {}: {} ({:.1}%)", label, count, share);
    }

    let samples = clamp_sample_count(args.samples);
    if samples != args.samples {
        tracing::warn!("Sample count {} adjusted to {}", args.samples, samples);
    }

    let selected = catalog.view(args.view);
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let shown = sample_records(&selected, samples, &mut rng);

    println!("\n{}", "=".repeat(70));
    println!("{} ({} of {} records)", args.view, shown.len(), selected.len());
    println!("{}", "=".repeat(70));
    println!("{:<6} {:<8} Text", "Label", "Source");
    println!("{:-<70}", "");
    for record in shown {
        println!(
            "{:<6} {:<8} {}",
            record.label.title(),
            record.source,
            preview(&record.text, args.width)
        );
    }
    println!("{:-<70}", "");

    if let Some(ref dir) = args.export {
        for path in catalog.write_exports(dir)? {
            println!("Export saved to: {}", path.display());
        }
    }

    Ok(())
}
