// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset download utility
//!
//! Prepares the data directory the viewer and server expect:
//! - WELFake: fetched from Zenodo into `WELFake.csv`
//! - ISOT: access-restricted, so a manually obtained archive is unpacked
//!   into `ISOT/Fake.csv` and `ISOT/True.csv`

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const WELFAKE_URL: &str = "https://zenodo.org/records/4561253/files/WELFake_Dataset.csv?download=1";
const WELFAKE_FILE: &str = "WELFake.csv";
const ISOT_DIR: &str = "ISOT";
const ISOT_FILES: [&str; 2] = ["Fake.csv", "True.csv"];

#[derive(Parser, Debug)]
#[command(name = "download-datasets")]
#[command(about = "Prepare the ISOT and WELFake data directory")]
#[command(version)]
struct Args {
    /// Output directory
    #[arg(short, long, default_value = "data")]
    output: PathBuf,

    /// ISOT archive downloaded by hand (contains Fake.csv and True.csv)
    #[arg(long)]
    isot_archive: Option<PathBuf>,

    /// Expected SHA-256 of WELFake.csv, hex encoded
    #[arg(long)]
    welfake_sha256: Option<String>,

    /// Force re-download even if files exist
    #[arg(short, long)]
    force: bool,
}

/// Stream `url` into `output_path`, returning the hex SHA-256 of the body
fn download_file(url: &str, output_path: &Path) -> Result<String> {
    tracing::info!("Downloading from: {}", url);

    let mut response = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(600))
        .build()?
        .get(url)
        .send()
        .context("Failed to send request")?;

    if !response.status().is_success() {
        bail!("Download failed with status: {}", response.status());
    }

    let pb = ProgressBar::new(response.content_length().unwrap_or(0));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
            .progress_chars("#>-"),
    );

    // Written to a sibling first so an interrupted download never looks complete
    let partial = output_path.with_extension("part");
    let mut file = File::create(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = response.read(&mut buffer).context("Failed to read response")?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        file.write_all(&buffer[..n])?;
        pb.inc(n as u64);
    }
    file.flush()?;
    std::fs::rename(&partial, output_path)?;

    pb.finish_with_message("Downloaded");
    Ok(hex::encode(hasher.finalize()))
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn check_digest(actual: &str, expected: Option<&str>, name: &str) -> Result<()> {
    match expected {
        Some(expected) if !actual.eq_ignore_ascii_case(expected.trim()) => {
            bail!("Checksum mismatch for {}: expected {}, got {}", name, expected, actual)
        }
        Some(_) => tracing::info!("Checksum verified: {}", actual),
        None => tracing::info!("SHA-256 of {}: {}", name, actual),
    }
    Ok(())
}

fn prepare_welfake(output_dir: &Path, expected_sha256: Option<&str>, force: bool) -> Result<PathBuf> {
    let path = output_dir.join(WELFAKE_FILE);

    if path.exists() && !force {
        tracing::info!("WELFake already present: {}", path.display());
        tracing::info!("Use --force to re-download");
        if expected_sha256.is_some() {
            check_digest(&sha256_file(&path)?, expected_sha256, WELFAKE_FILE)?;
        }
        return Ok(path);
    }

    let digest = download_file(WELFAKE_URL, &path)?;
    check_digest(&digest, expected_sha256, WELFAKE_FILE)?;
    Ok(path)
}

/// Copy `Fake.csv` and `True.csv` out of the archive, wherever they sit in it
fn extract_isot(archive_path: &Path, output_dir: &Path, force: bool) -> Result<Vec<PathBuf>> {
    let isot_dir = output_dir.join(ISOT_DIR);
    let targets: Vec<PathBuf> = ISOT_FILES.iter().map(|name| isot_dir.join(name)).collect();

    if targets.iter().all(|p| p.exists()) && !force {
        tracing::info!("ISOT already extracted: {}", isot_dir.display());
        return Ok(targets);
    }

    tracing::info!("Extracting ISOT archive {}", archive_path.display());
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)?;
    std::fs::create_dir_all(&isot_dir)?;

    let pb = ProgressBar::new(archive.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Extracting: [{wide_bar:.cyan/blue}] {pos}/{len}")?,
    );

    let mut found = [false; ISOT_FILES.len()];
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        pb.inc(1);
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            continue;
        };
        let Some(file_name) = name.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        // macOS archives carry ._Fake.csv resource forks
        if name.components().any(|c| c.as_os_str() == "__MACOSX") {
            continue;
        }

        if let Some(idx) = ISOT_FILES.iter().position(|f| *f == file_name) {
            let mut outfile = File::create(&targets[idx])?;
            std::io::copy(&mut entry, &mut outfile)?;
            found[idx] = true;
        }
    }
    pb.finish_with_message("Extracted");

    for (name, ok) in ISOT_FILES.iter().zip(found) {
        if !ok {
            bail!("{} not found in {}", name, archive_path.display());
        }
    }

    Ok(targets)
}

fn print_isot_instructions(output_dir: &Path) {
    println!("\n{}", "=".repeat(60));
    println!("ISOT Dataset - Manual Download Required");
    println!("{}", "=".repeat(60));
    println!("\nThe ISOT dataset requires manual download:");
    println!("  1. Visit: https://onlineacademiccommunity.uvic.ca/isot/");
    println!("  2. Request access to the dataset");
    println!("  3. Download 'News-dataset.zip'");
    println!("  4. Re-run with --isot-archive <path-to-zip>");
    println!("     (files land in {}/{}/)\n", output_dir.display(), ISOT_DIR);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Dataset Download Utility");
    tracing::info!("========================");

    std::fs::create_dir_all(&args.output)?;

    let mut ready = Vec::new();
    match prepare_welfake(&args.output, args.welfake_sha256.as_deref(), args.force) {
        Ok(path) => ready.push(path),
        Err(e) => {
            tracing::error!("Failed to download WELFake: {:#}", e);
            tracing::info!("Manual download instructions for WELFake:");
            tracing::info!("  1. Visit: {}", WELFAKE_URL);
            tracing::info!("  2. Save as: {}", args.output.join(WELFAKE_FILE).display());
        }
    }

    match &args.isot_archive {
        Some(archive) => ready.extend(extract_isot(archive, &args.output, args.force)?),
        None => print_isot_instructions(&args.output),
    }

    println!("\n{}", "=".repeat(60));
    println!("Dataset Preparation Complete");
    println!("{}", "=".repeat(60));
    println!("\nFiles ready in {}:", args.output.display());
    for path in &ready {
        println!("  - {}", path.display());
    }

    Ok(())
}
