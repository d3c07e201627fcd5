// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset loading, filtering and export for the fake news corpora
//!
//! Two heterogeneous sources are normalised into one record shape:
//! - ISOT: `Fake.csv` and `True.csv`, columns `title`, `text`
//! - WELFake: one file, columns `text`, `label` (0 = real, 1 = fake)
//!
//! Every record's text goes through [`clean_text`] before use.

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

/// Source tag for records read from the ISOT files
pub const ISOT_SOURCE: &str = "ISOT";
/// Source tag for records read from the WELFake file
pub const WELFAKE_SOURCE: &str = "WELFake";

/// File name of the newline-joined fake news export
pub const FAKE_TEXT_EXPORT: &str = "fake_news_combined.txt";
/// File name of the detector training export
pub const DETECTOR_CSV_EXPORT: &str = "detector_training_data.csv";

/// Viewer sample count bounds (inclusive) and default
pub const SAMPLE_COUNT_MIN: usize = 10;
pub const SAMPLE_COUNT_MAX: usize = 1000;
pub const SAMPLE_COUNT_STEP: usize = 10;
pub const SAMPLE_COUNT_DEFAULT: usize = 20;

static NOISE_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"http\S+|@\S+|#\S+").expect("valid noise pattern"));
static WHITESPACE_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Strip URLs, @handles and #hashtags, then collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let stripped = NOISE_RE.replace_all(text, "");
    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Binary news label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Fake,
    Real,
}

impl Label {
    /// Numeric code used by the detector training export (real = 0, fake = 1)
    pub fn to_binary(&self) -> u8 {
        match self {
            Label::Real => 0,
            Label::Fake => 1,
        }
    }

    /// Inverse of [`Label::to_binary`]; any other code is rejected
    pub fn from_binary(value: u8) -> Option<Self> {
        match value {
            0 => Some(Label::Real),
            1 => Some(Label::Fake),
            _ => None,
        }
    }

    /// Capitalised form shown next to detector predictions
    pub fn title(&self) -> &'static str {
        match self {
            Label::Fake => "Fake",
            Label::Real => "Real",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Fake => f.write_str("fake"),
            Label::Real => f.write_str("real"),
        }
    }
}

/// A normalised record from either source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub text: String,
    pub label: Label,
    pub source: String,
}

#[derive(Debug, Deserialize)]
struct IsotRow {
    #[serde(default)]
    title: Option<String>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WelFakeRow {
    text: String,
    label: i64,
}

#[derive(Debug, Serialize)]
struct DetectorRow<'a> {
    text: &'a str,
    label: u8,
}

/// Load one ISOT file, labelling every row with `label`
pub fn load_isot_csv(path: &Path, label: Label) -> Result<Vec<DatasetRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open ISOT file: {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<IsotRow>().enumerate() {
        let row = row.with_context(|| format!("Failed to read record {} in {}", idx, path.display()))?;
        let title = row.title.unwrap_or_default();
        records.push(DatasetRecord {
            text: clean_text(&format!("{}. {}", title, row.text)),
            label,
            source: ISOT_SOURCE.to_string(),
        });
    }

    Ok(records)
}

/// Load the WELFake file, mapping numeric label codes
pub fn load_welfake_csv(path: &Path) -> Result<Vec<DatasetRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open WELFake file: {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<WelFakeRow>().enumerate() {
        let row = row.with_context(|| format!("Failed to read record {} in {}", idx, path.display()))?;
        let label = u8::try_from(row.label)
            .ok()
            .and_then(Label::from_binary)
            .with_context(|| {
                format!("Unknown label code {} in record {} of {}", row.label, idx, path.display())
            })?;
        records.push(DatasetRecord {
            text: clean_text(&row.text),
            label,
            source: WELFAKE_SOURCE.to_string(),
        });
    }

    Ok(records)
}

/// Named views offered by the dataset viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetView {
    AllCombined,
    IsotFake,
    IsotReal,
    #[value(name = "welfake")]
    #[serde(rename = "welfake")]
    WelFake,
    FakeOnlyCombined,
}

impl DatasetView {
    pub const ALL: [DatasetView; 5] = [
        DatasetView::AllCombined,
        DatasetView::IsotFake,
        DatasetView::IsotReal,
        DatasetView::WelFake,
        DatasetView::FakeOnlyCombined,
    ];

    /// Human-readable name as shown in the viewer
    pub fn display_name(&self) -> &'static str {
        match self {
            DatasetView::AllCombined => "All Combined",
            DatasetView::IsotFake => "ISOT - Fake",
            DatasetView::IsotReal => "ISOT - Real",
            DatasetView::WelFake => "WELFake",
            DatasetView::FakeOnlyCombined => "Fake Only Combined",
        }
    }
}

impl fmt::Display for DatasetView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for DatasetView {
    type Err = anyhow::Error;

    /// Accepts either the display name or the kebab-case identifier
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|view| {
                view.display_name().eq_ignore_ascii_case(wanted)
                    || clap::ValueEnum::to_possible_value(view)
                        .is_some_and(|v| v.get_name().eq_ignore_ascii_case(wanted))
            })
            .with_context(|| format!("Unknown dataset view '{}'", s))
    }
}

/// Both corpora, loaded once and kept in memory
#[derive(Debug, Clone, Default)]
pub struct DatasetCatalog {
    pub isot_fake: Vec<DatasetRecord>,
    pub isot_real: Vec<DatasetRecord>,
    pub welfake: Vec<DatasetRecord>,
}

/// Per-view counts for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub total_records: usize,
    pub view_counts: Vec<(String, usize)>,
    pub label_distribution: HashMap<String, usize>,
}

impl DatasetCatalog {
    /// Load `ISOT/Fake.csv`, `ISOT/True.csv` and `WELFake.csv` from `data_dir`
    pub fn load(data_dir: &Path) -> Result<Self> {
        let isot_dir = data_dir.join("ISOT");
        let isot_fake = load_isot_csv(&isot_dir.join("Fake.csv"), Label::Fake)?;
        let isot_real = load_isot_csv(&isot_dir.join("True.csv"), Label::Real)?;
        let welfake = load_welfake_csv(&data_dir.join("WELFake.csv"))?;

        tracing::info!(
            "Datasets loaded from {}: ISOT fake={}, ISOT real={}, WELFake={}",
            data_dir.display(),
            isot_fake.len(),
            isot_real.len(),
            welfake.len()
        );

        Ok(Self {
            isot_fake,
            isot_real,
            welfake,
        })
    }

    /// All records in ISOT fake, ISOT real, WELFake order
    pub fn combined(&self) -> impl Iterator<Item = &DatasetRecord> {
        self.isot_fake.iter().chain(&self.isot_real).chain(&self.welfake)
    }

    pub fn total_records(&self) -> usize {
        self.isot_fake.len() + self.isot_real.len() + self.welfake.len()
    }

    /// Records selected by `view`, in combined order
    pub fn view(&self, view: DatasetView) -> Vec<&DatasetRecord> {
        match view {
            DatasetView::AllCombined => self.combined().collect(),
            DatasetView::IsotFake => self.isot_fake.iter().collect(),
            DatasetView::IsotReal => self.isot_real.iter().collect(),
            DatasetView::WelFake => self.welfake.iter().collect(),
            DatasetView::FakeOnlyCombined => {
                self.combined().filter(|r| r.label == Label::Fake).collect()
            }
        }
    }

    /// Newline-joined text of every fake record across both sources
    pub fn export_fake_text(&self) -> String {
        self.combined()
            .filter(|r| r.label == Label::Fake)
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// CSV with columns `text,label`, label coded real = 0, fake = 1
    pub fn export_detector_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in self.combined() {
            writer.serialize(DetectorRow {
                text: &record.text,
                label: record.label.to_binary(),
            })?;
        }
        let bytes = writer.into_inner().context("Failed to flush detector CSV")?;
        String::from_utf8(bytes).context("Detector CSV is not valid UTF-8")
    }

    /// Write both export artifacts into `output_dir`, returning their paths
    pub fn write_exports(&self, output_dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let text_path = output_dir.join(FAKE_TEXT_EXPORT);
        std::fs::write(&text_path, self.export_fake_text())
            .with_context(|| format!("Failed to write {}", text_path.display()))?;

        let csv_path = output_dir.join(DETECTOR_CSV_EXPORT);
        std::fs::write(&csv_path, self.export_detector_csv()?)
            .with_context(|| format!("Failed to write {}", csv_path.display()))?;

        tracing::info!("Exports written to {}", output_dir.display());
        Ok(vec![text_path, csv_path])
    }

    pub fn summary(&self) -> DatasetSummary {
        let view_counts = DatasetView::ALL
            .iter()
            .map(|v| (v.display_name().to_string(), self.view(*v).len()))
            .collect();

        let mut label_distribution = HashMap::new();
        for record in self.combined() {
            *label_distribution.entry(record.label.to_string()).or_insert(0) += 1;
        }

        DatasetSummary {
            total_records: self.total_records(),
            view_counts,
            label_distribution,
        }
    }
}

/// Uniformly sample up to `n` records without replacement
pub fn sample_records<'a, R: Rng + ?Sized>(
    records: &[&'a DatasetRecord],
    n: usize,
    rng: &mut R,
) -> Vec<&'a DatasetRecord> {
    let amount = n.min(records.len());
    rand::seq::index::sample(rng, records.len(), amount)
        .into_iter()
        .map(|idx| records[idx])
        .collect()
}

/// Clamp a requested sample count to the viewer slider range
pub fn clamp_sample_count(n: usize) -> usize {
    let clamped = n.clamp(SAMPLE_COUNT_MIN, SAMPLE_COUNT_MAX);
    clamped - clamped % SAMPLE_COUNT_STEP
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tempfile::TempDir;

    fn write_fixture_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let isot = dir.path().join("ISOT");
        std::fs::create_dir_all(&isot).unwrap();
        std::fs::write(
            isot.join("Fake.csv"),
            "title,text,subject,date\n\
             Shocking claim,\"Read more at http://x.io now #viral\",News,2017\n\
             ,Untitled   body @someone,News,2017\n",
        )
        .unwrap();
        std::fs::write(
            isot.join("True.csv"),
            "title,text,subject,date\nOfficial report,Ministers met on Tuesday.,politics,2017\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("WELFake.csv"),
            ",title,text,label\n0,t1,Real story here,0\n1,t2,Fake story  here,1\n2,t3,Another fake,1\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_clean_text_strips_noise() {
        assert_eq!(
            clean_text("  Breaking:\thttps://t.co/abc @user said #fake   news \n"),
            "Breaking: said news"
        );
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("   \n\t "), "");
    }

    #[test]
    fn test_label_binary_mapping() {
        assert_eq!(Label::Real.to_binary(), 0);
        assert_eq!(Label::Fake.to_binary(), 1);
        assert_eq!(Label::from_binary(0), Some(Label::Real));
        assert_eq!(Label::from_binary(1), Some(Label::Fake));
        assert_eq!(Label::from_binary(2), None);
    }

    #[test]
    fn test_load_catalog() {
        let dir = write_fixture_dir();
        let catalog = DatasetCatalog::load(dir.path()).unwrap();

        assert_eq!(catalog.isot_fake.len(), 2);
        assert_eq!(catalog.isot_real.len(), 1);
        assert_eq!(catalog.welfake.len(), 3);
        assert_eq!(catalog.total_records(), 6);

        assert_eq!(catalog.isot_fake[0].text, "Shocking claim. Read more at now");
        assert_eq!(catalog.isot_fake[1].text, ". Untitled body");
        assert_eq!(catalog.isot_real[0].label, Label::Real);
        assert_eq!(catalog.isot_real[0].source, ISOT_SOURCE);
        assert_eq!(catalog.welfake[1].text, "Fake story here");
        assert_eq!(catalog.welfake[1].label, Label::Fake);
        assert_eq!(catalog.welfake[0].source, WELFAKE_SOURCE);
    }

    #[test]
    fn test_welfake_rejects_unknown_label() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("WELFake.csv");
        std::fs::write(&path, "text,label\nsomething,7\n").unwrap();

        let err = load_welfake_csv(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown label code 7"));
    }

    #[test]
    fn test_missing_column_propagates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Fake.csv");
        std::fs::write(&path, "headline,body\na,b\n").unwrap();

        assert!(load_isot_csv(&path, Label::Fake).is_err());
    }

    #[test]
    fn test_fake_only_is_subset_of_all() {
        let dir = write_fixture_dir();
        let catalog = DatasetCatalog::load(dir.path()).unwrap();

        let all = catalog.view(DatasetView::AllCombined);
        let fake_only = catalog.view(DatasetView::FakeOnlyCombined);

        assert!(fake_only.len() < all.len());
        assert!(fake_only.iter().all(|r| r.label == Label::Fake));
        assert!(fake_only.iter().all(|r| all.iter().any(|a| std::ptr::eq(*a, *r))));
        assert_eq!(fake_only.len(), 4);
    }

    #[test]
    fn test_view_selection() {
        let dir = write_fixture_dir();
        let catalog = DatasetCatalog::load(dir.path()).unwrap();

        assert_eq!(catalog.view(DatasetView::IsotFake).len(), 2);
        assert_eq!(catalog.view(DatasetView::IsotReal).len(), 1);
        assert_eq!(catalog.view(DatasetView::WelFake).len(), 3);
    }

    #[test]
    fn test_view_parsing() {
        assert_eq!("Fake Only Combined".parse::<DatasetView>().unwrap(), DatasetView::FakeOnlyCombined);
        assert_eq!("isot-real".parse::<DatasetView>().unwrap(), DatasetView::IsotReal);
        assert_eq!("welfake".parse::<DatasetView>().unwrap(), DatasetView::WelFake);
        assert!("everything".parse::<DatasetView>().is_err());
    }

    #[test]
    fn test_sample_bounded_by_available() {
        let dir = write_fixture_dir();
        let catalog = DatasetCatalog::load(dir.path()).unwrap();
        let records = catalog.view(DatasetView::IsotFake);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let sampled = sample_records(&records, 20, &mut rng);
        assert_eq!(sampled.len(), 2);

        let sampled = sample_records(&catalog.view(DatasetView::AllCombined), 3, &mut rng);
        assert_eq!(sampled.len(), 3);
    }

    #[test]
    fn test_clamp_sample_count() {
        assert_eq!(clamp_sample_count(0), 10);
        assert_eq!(clamp_sample_count(20), 20);
        assert_eq!(clamp_sample_count(25), 20);
        assert_eq!(clamp_sample_count(5000), 1000);
    }

    #[test]
    fn test_exports() {
        let dir = write_fixture_dir();
        let catalog = DatasetCatalog::load(dir.path()).unwrap();

        let text = catalog.export_fake_text();
        assert_eq!(text.lines().count(), 4);
        assert!(text.starts_with("Shocking claim."));

        let csv_text = catalog.export_detector_csv().unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(lines.next(), Some("text,label"));
        assert_eq!(csv_text.lines().count(), 7);
        assert!(csv_text.contains("Ministers met on Tuesday.,0"));

        let out = TempDir::new().unwrap();
        let paths = catalog.write_exports(out.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(out.path().join(FAKE_TEXT_EXPORT).exists());
        assert!(out.path().join(DETECTOR_CSV_EXPORT).exists());
    }

    #[test]
    fn test_export_label_round_trip() {
        let dir = write_fixture_dir();
        let catalog = DatasetCatalog::load(dir.path()).unwrap();
        let csv_text = catalog.export_detector_csv().unwrap();

        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let recovered: Vec<Label> = reader
            .records()
            .map(|r| {
                let code: u8 = r.unwrap().get(1).unwrap().parse().unwrap();
                Label::from_binary(code).unwrap()
            })
            .collect();
        let original: Vec<Label> = catalog.combined().map(|r| r.label).collect();

        assert_eq!(recovered, original);
    }

    #[test]
    fn test_summary() {
        let dir = write_fixture_dir();
        let catalog = DatasetCatalog::load(dir.path()).unwrap();
        let summary = catalog.summary();

        assert_eq!(summary.total_records, 6);
        assert_eq!(summary.label_distribution.get("fake"), Some(&4));
        assert_eq!(summary.label_distribution.get("real"), Some(&2));
        assert_eq!(summary.view_counts.len(), 5);
    }

    proptest! {
        #[test]
        fn prop_clean_is_idempotent(text in "[a-zA-Z0-9 @#:/.\t\n]{0,80}") {
            let once = clean_text(&text);
            prop_assert_eq!(clean_text(&once), once);
        }

        #[test]
        fn prop_label_round_trip(fake in any::<bool>()) {
            let label = if fake { Label::Fake } else { Label::Real };
            prop_assert_eq!(Label::from_binary(label.to_binary()), Some(label));
        }
    }
}
