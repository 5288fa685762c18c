//! Gộp bảng chuẩn mới vào bảng metadata hiện có.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::table::{ensure_unique, MetadataTable};
use crate::{CanonicalRecord, MetadataError, CANONICAL_COLUMNS};

/// Thống kê một lần gộp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeReport {
    pub generated_at: DateTime<Utc>,
    pub base_records: usize,
    pub incoming_records: usize,
    pub merged_records: usize,
    /// Số bản ghi trùng khoá đã được ghi đè.
    pub updated_records: usize,
    pub new_records: usize,
    pub new_patients: usize,
    /// patientid lớn nhất của bảng gốc; mã mới luôn lớn hơn giá trị này.
    pub max_base_patient_id: u64,
}

/// Kết quả gộp: bảng đầy đủ cùng thống kê.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub table: MetadataTable,
    pub report: MergeReport,
}

/// Lấy các chữ số trong chuỗi và ghép thành số ("19a" -> 19).
pub fn parse_patient_number(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// patientid lớn nhất của bảng; mọi dòng đều phải đọc được thành số.
pub fn max_patient_id(table: &MetadataTable) -> Result<u64, MetadataError> {
    if table.is_empty() {
        return Err(MetadataError::NoPatientIds);
    }

    let mut max = 0;
    for record in table.records() {
        let raw = record.patient_id().unwrap_or_default();
        let number =
            parse_patient_number(raw).ok_or_else(|| MetadataError::UnparseablePatientId {
                key: record.key().unwrap_or_default().to_string(),
                value: raw.to_string(),
            })?;
        max = max.max(number);
    }
    Ok(max)
}

/// Gộp `incoming` vào `base` theo khoá filename.
///
/// Bản ghi trùng khoá được thay toàn bộ nhưng giữ patientid của bảng gốc,
/// bản ghi mới được nối vào cuối với patientid lớn hơn mọi mã hiện có.
/// Thứ tự: các dòng của `base` giữ nguyên vị trí, sau đó là dòng mới theo
/// thứ tự xuất hiện trong `incoming`.
pub fn merge_records(
    base: &MetadataTable,
    incoming: &[CanonicalRecord],
) -> Result<MergeOutcome, MetadataError> {
    base.ensure_unique_keys()?;
    ensure_unique("incoming", incoming.iter().map(CanonicalRecord::key))?;
    let max_base = max_patient_id(base)?;

    let positions: HashMap<&str, usize> = base
        .keys()
        .enumerate()
        .map(|(index, key)| (key, index))
        .collect();

    let mut existing = Vec::new();
    let mut fresh = Vec::new();
    for record in incoming {
        match positions.get(record.key()) {
            Some(&index) => existing.push((index, record)),
            None => fresh.push(record),
        }
    }

    // Hạng dày (0-based) theo mã tạm thời tăng dần, chỉ trên bản ghi mới.
    let ranks: HashMap<u64, u64> = fresh
        .iter()
        .map(|record| record.patient_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .zip(0u64..)
        .collect();

    let mut merged = base.clone();
    for column in CANONICAL_COLUMNS {
        merged.ensure_column(column);
    }

    for &(index, record) in &existing {
        let patient_id = base.records()[index].patient_id().unwrap_or_default();
        debug!(key = record.key(), patient_id, "replacing existing record");
        merged.replace(index, record.to_metadata_record(patient_id));
    }

    for record in &fresh {
        let rank = ranks.get(&record.patient_id).copied().unwrap_or_default();
        let patient_id = max_base
            .checked_add(rank)
            .and_then(|id| id.checked_add(1))
            .ok_or(MetadataError::PatientIdOverflow(max_base))?;
        merged.push_unchecked(record.to_metadata_record(&patient_id.to_string()));
    }

    let report = MergeReport {
        generated_at: Utc::now(),
        base_records: base.len(),
        incoming_records: incoming.len(),
        merged_records: merged.len(),
        updated_records: existing.len(),
        new_records: fresh.len(),
        new_patients: ranks.len(),
        max_base_patient_id: max_base,
    };

    info!(
        table = merged.name(),
        base = report.base_records,
        incoming = report.incoming_records,
        updated = report.updated_records,
        new = report.new_records,
        new_patients = report.new_patients,
        merged = report.merged_records,
        "merged metadata tables"
    );

    Ok(MergeOutcome {
        table: merged,
        report,
    })
}
