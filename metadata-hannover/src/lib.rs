//! Hannover `data.csv` rows to canonical metadata records.

use std::cmp::Ordering;
use std::collections::HashMap;

use metadata_core::{CanonicalRecord, ConversionConfig, Finding, MetadataError, Ternary};
use tracing::{debug, info};

mod source;

pub use source::{exclude_images, parse_source_str, read_source_csv, SourceRecord};

/// Parse CSV text and convert it in one step.
pub fn convert_csv_str(
    data: &str,
    starting_patient_id: u64,
    config: &ConversionConfig,
) -> Result<Vec<CanonicalRecord>, MetadataError> {
    let records = parse_source_str(data)?;
    Ok(convert_records(&records, starting_patient_id, config))
}

/// Convert a batch of source rows into canonical records.
///
/// Patient identifiers are numbered from `starting_patient_id + 1` in
/// first-seen order. The conversion never drops a row; values that cannot
/// be parsed become null. Output is sorted by `(patient_id, offset)` with
/// missing offsets last.
pub fn convert_records(
    records: &[SourceRecord],
    starting_patient_id: u64,
    config: &ConversionConfig,
) -> Vec<CanonicalRecord> {
    let patient_ids = assign_patient_ids(records, starting_patient_id);
    let went_icu = aggregate_went_icu(records, &patient_ids);

    let mut converted: Vec<CanonicalRecord> = records
        .iter()
        .zip(&patient_ids)
        .map(|(record, &patient_id)| {
            let went = went_icu.get(&patient_id).copied().unwrap_or(false);
            convert_record(record, patient_id, went, config)
        })
        .collect();

    converted.sort_by(|a, b| {
        a.patient_id
            .cmp(&b.patient_id)
            .then_with(|| compare_offsets(a.offset, b.offset))
    });

    info!(
        records = converted.len(),
        patients = went_icu.len(),
        "converted source records"
    );
    converted
}

fn assign_patient_ids(records: &[SourceRecord], starting_patient_id: u64) -> Vec<u64> {
    let mut codes: HashMap<&str, u64> = HashMap::new();
    let mut next = starting_patient_id;

    records
        .iter()
        .map(|record| match non_empty(record.patient_id.as_deref()) {
            Some(source_id) => *codes.entry(source_id).or_insert_with(|| {
                next += 1;
                next
            }),
            // No source identifier: the row cannot be tied to a co-visit.
            None => {
                next += 1;
                next
            }
        })
        .collect()
}

/// Patient-level "ever admitted to ICU", keyed by canonical patient id.
fn aggregate_went_icu(records: &[SourceRecord], patient_ids: &[u64]) -> HashMap<u64, bool> {
    let mut went_icu = HashMap::new();
    for (record, &patient_id) in records.iter().zip(patient_ids) {
        let admitted = parse_numeric(record.icu_admission_offset.as_deref()).is_some();
        *went_icu.entry(patient_id).or_insert(false) |= admitted;
    }
    went_icu
}

fn convert_record(
    record: &SourceRecord,
    patient_id: u64,
    went_icu: bool,
    config: &ConversionConfig,
) -> CanonicalRecord {
    let admission = parse_offset(record.admission_offset.as_deref());
    let icu_admission = parse_numeric(record.icu_admission_offset.as_deref());
    let icu_release = parse_numeric(record.icu_release_offset.as_deref());
    let death = parse_numeric(record.death_offset.as_deref());

    let in_icu = went_icu
        && matches!(icu_admission, Some(offset) if offset <= 0.0)
        && matches!(icu_release, Some(offset) if offset > 0.0);

    let survival = if death.is_some() {
        Ternary::No
    } else if icu_release.is_some() {
        Ternary::Yes
    } else {
        Ternary::Unknown
    };

    let lymphocyte_count = lab_value(
        record,
        "lymphocytes_val",
        &record.lymphocytes_val,
        &record.lymphocytes_offset,
    );
    let po2_saturation = lab_value(record, "po2_val", &record.po2_val, &record.po2_offset)
        .and_then(as_integral);
    let neutrophil_count = lab_value(
        record,
        "neutrophils_val",
        &record.neutrophils_val,
        &record.neutrophils_offset,
    );

    CanonicalRecord {
        patient_id,
        sex: non_empty(record.sex.as_deref()).map(str::to_uppercase),
        view: non_empty(record.projection.as_deref()).map(|projection| {
            let view = projection.to_uppercase();
            config.view_aliases.get(&view).cloned().unwrap_or(view)
        }),
        offset: admission.and_then(i64::checked_neg),
        lymphocyte_count,
        po2_saturation,
        neutrophil_count,
        in_icu: Ternary::from(in_icu),
        went_icu: Ternary::from(went_icu),
        survival,
        finding: Finding::from_admission_offset(admission, &config.finding),
        filename: format!("{}{}", record.image_id, config.image_extension),
        provenance: config.provenance.clone(),
    }
}

fn lab_value(
    record: &SourceRecord,
    field: &str,
    value: &Option<String>,
    offset: &Option<String>,
) -> Option<f64> {
    let raw = where_offset_zero(value.as_deref(), offset.as_deref())?;
    let parsed = parse_numeric(Some(raw));
    if parsed.is_none() {
        debug!(
            image_id = %record.image_id,
            field,
            value = raw,
            "lab value at admission is not numeric"
        );
    }
    parsed
}

/// Keep `value` only when its own offset is exactly zero.
pub fn where_offset_zero<'a>(value: Option<&'a str>, offset: Option<&str>) -> Option<&'a str> {
    match parse_numeric(offset) {
        Some(offset) if offset == 0.0 => value,
        _ => None,
    }
}

/// Finite number or null; infinities and NaN count as missing.
pub fn parse_numeric(value: Option<&str>) -> Option<f64> {
    non_empty(value)?
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

/// Day offsets must be whole numbers.
pub fn parse_offset(value: Option<&str>) -> Option<i64> {
    parse_numeric(value).and_then(as_integral)
}

fn as_integral(value: f64) -> Option<i64> {
    if value.fract() != 0.0 || value < i64::MIN as f64 || value >= i64::MAX as f64 {
        return None;
    }
    Some(value as i64)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

fn compare_offsets(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
