//! Logic lõi cho bảng metadata chuẩn hoá của bộ dữ liệu ảnh X-quang.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod merge;
pub mod table;

pub use merge::{max_patient_id, merge_records, parse_patient_number, MergeOutcome, MergeReport};
pub use table::{MetadataRecord, MetadataTable};

/// Thứ tự cột của bảng chuẩn hoá khi xuất ra.
pub const CANONICAL_COLUMNS: [&str; 19] = [
    "patientid",
    "sex",
    "view",
    "offset",
    "lymphocyte_count",
    "pO2_saturation",
    "neutrophil_count",
    "in_icu",
    "went_icu",
    "survival",
    "url",
    "license",
    "location",
    "doi",
    "finding",
    "filename",
    "folder",
    "modality",
    "date",
];

pub const PATIENT_ID_COLUMN: &str = "patientid";
pub const FILENAME_COLUMN: &str = "filename";

/// Cấu hình chuyển đổi từ bảng nguồn sang bảng chuẩn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversionConfig {
    pub provenance: Provenance,
    /// Đuôi file ảnh nối vào mã ảnh.
    pub image_extension: String,
    pub finding: FindingThresholds,
    /// Đổi tên mã tư thế chụp (sau khi viết hoa).
    pub view_aliases: BTreeMap<String, String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            provenance: Provenance::default(),
            image_extension: ".jpg".to_string(),
            finding: FindingThresholds::default(),
            view_aliases: BTreeMap::from([("AP".to_string(), "AP Supine".to_string())]),
        }
    }
}

/// Ngưỡng (ngày, theo offset gốc) để suy ra `finding`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FindingThresholds {
    pub no_finding_after_days: i64,
    pub unknown_after_days: i64,
}

impl Default for FindingThresholds {
    fn default() -> Self {
        Self {
            no_finding_after_days: 14,
            unknown_after_days: 7,
        }
    }
}

/// Nguồn gốc dữ liệu, cố định cho mọi bản ghi của một bộ nguồn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Provenance {
    pub url: String,
    pub license: String,
    pub location: String,
    pub doi: String,
    pub modality: String,
    pub date: i32,
    pub folder: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            url: "https://github.com/ml-workgroup/covid-19-image-repository".to_string(),
            license: "CC BY 3.0".to_string(),
            location: "Hannover Medical School, Hannover, Germany".to_string(),
            doi: "10.6084/m9.figshare.12275009".to_string(),
            modality: "X-ray".to_string(),
            date: 2020,
            folder: "images".to_string(),
        }
    }
}

/// Giá trị ba trạng thái: "Y", "N" hoặc không rõ.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Ternary {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Ternary {
    pub fn as_str(self) -> Option<&'static str> {
        match self {
            Ternary::Yes => Some("Y"),
            Ternary::No => Some("N"),
            Ternary::Unknown => None,
        }
    }
}

impl From<Option<bool>> for Ternary {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Ternary::Yes,
            Some(false) => Ternary::No,
            None => Ternary::Unknown,
        }
    }
}

impl From<bool> for Ternary {
    fn from(value: bool) -> Self {
        Ternary::from(Some(value))
    }
}

impl From<Ternary> for Option<bool> {
    fn from(value: Ternary) -> Self {
        match value {
            Ternary::Yes => Some(true),
            Ternary::No => Some(false),
            Ternary::Unknown => None,
        }
    }
}

/// Kết luận chẩn đoán suy ra từ offset nhập viện.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Finding {
    #[serde(rename = "COVID-19")]
    Covid19,
    #[serde(rename = "Unknown")]
    Unknown,
    #[serde(rename = "No Finding")]
    NoFinding,
}

impl Finding {
    /// Áp ngưỡng lên offset nhập viện gốc (chưa đổi dấu).
    ///
    /// Offset thiếu không vượt ngưỡng nào nên rơi vào `Covid19`.
    pub fn from_admission_offset(offset: Option<i64>, thresholds: &FindingThresholds) -> Self {
        let exceeds = |limit: i64| offset.is_some_and(|offset| offset > limit);
        if exceeds(thresholds.no_finding_after_days) {
            Finding::NoFinding
        } else if exceeds(thresholds.unknown_after_days) {
            Finding::Unknown
        } else {
            Finding::Covid19
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Finding::Covid19 => "COVID-19",
            Finding::Unknown => "Unknown",
            Finding::NoFinding => "No Finding",
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Một bản ghi ảnh theo lược đồ chuẩn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRecord {
    pub patient_id: u64,
    pub sex: Option<String>,
    pub view: Option<String>,
    /// Số ngày tính từ lúc nhập viện (0 = nhập viện).
    pub offset: Option<i64>,
    pub lymphocyte_count: Option<f64>,
    pub po2_saturation: Option<i64>,
    pub neutrophil_count: Option<f64>,
    pub in_icu: Ternary,
    pub went_icu: Ternary,
    pub survival: Ternary,
    pub finding: Finding,
    pub filename: String,
    pub provenance: Provenance,
}

impl CanonicalRecord {
    /// Khoá nhận diện bản ghi giữa các bảng.
    pub fn key(&self) -> &str {
        filename_stem(&self.filename)
    }

    /// Chuyển sang dòng dạng văn bản, dùng `patient_id` đã được đối chiếu.
    pub fn to_metadata_record(&self, patient_id: &str) -> MetadataRecord {
        let provenance = &self.provenance;
        let cells: [(&str, Option<String>); 19] = [
            (PATIENT_ID_COLUMN, Some(patient_id.to_string())),
            ("sex", self.sex.clone()),
            ("view", self.view.clone()),
            ("offset", self.offset.map(|v| v.to_string())),
            ("lymphocyte_count", self.lymphocyte_count.map(|v| v.to_string())),
            ("pO2_saturation", self.po2_saturation.map(|v| v.to_string())),
            ("neutrophil_count", self.neutrophil_count.map(|v| v.to_string())),
            ("in_icu", self.in_icu.as_str().map(str::to_string)),
            ("went_icu", self.went_icu.as_str().map(str::to_string)),
            ("survival", self.survival.as_str().map(str::to_string)),
            ("url", Some(provenance.url.clone())),
            ("license", Some(provenance.license.clone())),
            ("location", Some(provenance.location.clone())),
            ("doi", Some(provenance.doi.clone())),
            ("finding", Some(self.finding.as_str().to_string())),
            (FILENAME_COLUMN, Some(self.filename.clone())),
            ("folder", Some(provenance.folder.clone())),
            ("modality", Some(provenance.modality.clone())),
            ("date", Some(provenance.date.to_string())),
        ];

        let mut record = MetadataRecord::default();
        for (column, value) in cells {
            if let Some(value) = value {
                record.set(column, value);
            }
        }
        record
    }
}

/// Bỏ phần mở rộng cuối cùng của tên file (giống `splitext`).
pub fn filename_stem(name: &str) -> &str {
    let base_start = name.rfind(['/', '\\']).map_or(0, |idx| idx + 1);
    match name.rfind('.') {
        Some(dot) if dot > base_start && name[base_start..dot].chars().any(|c| c != '.') => {
            &name[..dot]
        }
        _ => name,
    }
}

/// Lỗi chung khi đối chiếu metadata.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Bảng {table} thiếu cột bắt buộc `{column}`")]
    MissingColumn { table: String, column: String },
    #[error("Dòng {row} của bảng {table} không có filename")]
    MissingFilename { table: String, row: usize },
    #[error("Khoá `{key}` bị trùng trong bảng {table}")]
    DuplicateKey { table: String, key: String },
    #[error("Không đọc được patientid `{value}` của bản ghi `{key}`")]
    UnparseablePatientId { key: String, value: String },
    #[error("Bảng gốc không có patientid dạng số nào")]
    NoPatientIds,
    #[error("patientid mới vượt quá giới hạn (mã lớn nhất hiện có: {0})")]
    PatientIdOverflow(u64),
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
}
