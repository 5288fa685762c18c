//! Đọc/ghi file CSV và cấu hình cho CLI.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use metadata_core::{ConversionConfig, MetadataRecord, MetadataTable};

/// Đọc `metadata.csv`, mọi cột giữ nguyên dạng văn bản.
pub fn read_metadata_csv(path: &Path) -> Result<MetadataTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Không mở được file {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Không đọc được header của {}", path.display()))?
        .clone();
    let columns: Vec<String> = headers.iter().map(str::to_string).collect();
    let mut table = MetadataTable::new("metadata", columns)?;

    for (row, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("Dòng {row} của {} không hợp lệ", path.display()))?;
        table.push(MetadataRecord::from_pairs(headers.iter().zip(record.iter())))?;
    }

    Ok(table)
}

/// Ghi bảng theo thứ tự cột của bảng; giá trị thiếu thành ô rỗng.
pub fn write_metadata_csv(path: &Path, table: &MetadataTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Không tạo được file {}", path.display()))?;

    writer.write_record(table.columns())?;
    for record in table.records() {
        writer.write_record(
            table
                .columns()
                .iter()
                .map(|column| record.get(column).unwrap_or_default()),
        )?;
    }
    writer
        .flush()
        .with_context(|| format!("Không ghi được file {}", path.display()))?;
    Ok(())
}

/// Danh sách mã ảnh loại trừ: cột đầu tiên của file CSV (có header).
pub fn read_exclusions(path: &Path) -> Result<HashSet<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Không mở được file {}", path.display()))?;

    let mut excluded = HashSet::new();
    for result in reader.records() {
        let record = result.with_context(|| format!("File {} không hợp lệ", path.display()))?;
        if let Some(image_id) = record.get(0).filter(|id| !id.is_empty()) {
            excluded.insert(image_id.to_string());
        }
    }
    Ok(excluded)
}

/// Cấu hình chuyển đổi từ file TOML, hoặc mặc định nếu không có.
pub fn load_config(path: Option<&Path>) -> Result<ConversionConfig> {
    let Some(path) = path else {
        return Ok(ConversionConfig::default());
    };

    let content = fs::read_to_string(path)
        .with_context(|| format!("Không đọc được file cấu hình {}", path.display()))?;
    let config: ConversionConfig = toml::from_str(&content)
        .with_context(|| format!("File cấu hình {} không hợp lệ", path.display()))?;
    Ok(config)
}
