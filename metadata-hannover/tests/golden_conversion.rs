use std::fs;

use metadata_core::ConversionConfig;
use metadata_hannover::convert_csv_str;
use serde_json::Value;

fn fixture_path(name: &str) -> String {
    format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn sample_batch_matches_golden() {
    let data = fs::read_to_string(fixture_path("hannover_sample.csv"))
        .expect("Failed to read sample data.csv");

    let records =
        convert_csv_str(&data, 0, &ConversionConfig::default()).expect("Conversion failed");
    let actual = serde_json::to_value(&records).expect("Failed to serialize records");

    let expected = fs::read_to_string(fixture_path("hannover_sample_converted.json"))
        .expect("Failed to read golden records");
    let expected: Value = serde_json::from_str(&expected).expect("Golden is not valid JSON");

    assert_eq!(actual, expected);
}
