//! Bảng metadata dạng văn bản, giữ nguyên thứ tự cột và dòng.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{filename_stem, MetadataError, FILENAME_COLUMN, PATIENT_ID_COLUMN};

/// Một dòng metadata. Ô rỗng được coi là thiếu giá trị.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    values: BTreeMap<String, String>,
}

impl MetadataRecord {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut record = Self::default();
        for (column, value) in pairs {
            record.set(column, value);
        }
        record
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Ghi giá trị; chuỗi rỗng xoá ô.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        if value.is_empty() {
            self.values.remove(&column);
        } else {
            self.values.insert(column, value);
        }
    }

    pub fn patient_id(&self) -> Option<&str> {
        self.get(PATIENT_ID_COLUMN)
    }

    pub fn filename(&self) -> Option<&str> {
        self.get(FILENAME_COLUMN)
    }

    pub fn key(&self) -> Option<&str> {
        self.filename().map(filename_stem)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Bảng metadata có thứ tự cột cố định.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataTable {
    name: String,
    columns: Vec<String>,
    records: Vec<MetadataRecord>,
}

impl MetadataTable {
    /// Tạo bảng rỗng; bắt buộc có cột `patientid` và `filename`.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Result<Self, MetadataError> {
        let name = name.into();
        for required in [PATIENT_ID_COLUMN, FILENAME_COLUMN] {
            if !columns.iter().any(|column| column == required) {
                return Err(MetadataError::MissingColumn {
                    table: name,
                    column: required.to_string(),
                });
            }
        }

        Ok(Self {
            name,
            columns,
            records: Vec::new(),
        })
    }

    /// Thêm dòng; dòng không có filename bị từ chối.
    pub fn push(&mut self, record: MetadataRecord) -> Result<(), MetadataError> {
        if record.filename().is_none() {
            return Err(MetadataError::MissingFilename {
                table: self.name.clone(),
                row: self.records.len(),
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Thêm cột vào cuối nếu chưa có.
    pub fn ensure_column(&mut self, column: &str) {
        if !self.columns.iter().any(|existing| existing == column) {
            self.columns.push(column.to_string());
        }
    }

    /// Khoá (filename bỏ đuôi) theo đúng thứ tự dòng.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .map(|record| record.key().unwrap_or_default())
    }

    /// Kiểm tra khoá không trùng trước khi gộp.
    pub fn ensure_unique_keys(&self) -> Result<(), MetadataError> {
        ensure_unique(&self.name, self.keys())
    }

    pub(crate) fn replace(&mut self, index: usize, record: MetadataRecord) {
        self.records[index] = record;
    }

    pub(crate) fn push_unchecked(&mut self, record: MetadataRecord) {
        self.records.push(record);
    }
}

pub(crate) fn ensure_unique<'a>(
    table: &str,
    keys: impl IntoIterator<Item = &'a str>,
) -> Result<(), MetadataError> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(MetadataError::DuplicateKey {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}
