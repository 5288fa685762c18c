//! Rows of the upstream `data.csv` and the pre-conversion exclusion filter.

use std::collections::HashSet;
use std::io::Read;

use metadata_core::MetadataError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One clinical visit row, repeated per image.
///
/// Everything except the image identifier is kept as raw text so that a
/// malformed value degrades to null during conversion instead of failing
/// the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRecord {
    #[serde(default)]
    pub patient_id: Option<String>,
    pub image_id: String,
    #[serde(default)]
    pub admission_offset: Option<String>,
    #[serde(default)]
    pub icu_admission_offset: Option<String>,
    #[serde(default)]
    pub icu_release_offset: Option<String>,
    #[serde(default)]
    pub death_offset: Option<String>,
    #[serde(default)]
    pub lymphocytes_val: Option<String>,
    #[serde(default)]
    pub lymphocytes_offset: Option<String>,
    #[serde(default)]
    pub po2_val: Option<String>,
    #[serde(default)]
    pub po2_offset: Option<String>,
    #[serde(default)]
    pub neutrophils_val: Option<String>,
    #[serde(default)]
    pub neutrophils_offset: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub projection: Option<String>,
}

/// Read source rows from CSV with a header line.
pub fn read_source_csv<R: Read>(reader: R) -> Result<Vec<SourceRecord>, MetadataError> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
        .into_deserialize()
        .collect::<Result<Vec<SourceRecord>, _>>()
        .map_err(|err| MetadataError::Parse(err.to_string()))
}

/// Read source rows from an in-memory CSV string.
pub fn parse_source_str(data: &str) -> Result<Vec<SourceRecord>, MetadataError> {
    read_source_csv(data.as_bytes())
}

/// Drop rows whose image identifier is listed in `excluded`, keeping order.
pub fn exclude_images(records: Vec<SourceRecord>, excluded: &HashSet<String>) -> Vec<SourceRecord> {
    let before = records.len();
    let kept: Vec<SourceRecord> = records
        .into_iter()
        .filter(|record| !excluded.contains(&record.image_id))
        .collect();

    info!(
        excluded = before - kept.len(),
        remaining = kept.len(),
        "applied image exclusion list"
    );
    kept
}
