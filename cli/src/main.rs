use std::fs::{self, File};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use metadata_core::{merge_records, MergeReport};
use metadata_hannover::{convert_records, exclude_images, read_source_csv};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod table_io;

#[derive(Parser, Debug)]
#[command(
    name = "metadata-cli",
    about = "Gộp metadata của bộ ảnh Hannover vào metadata.csv hiện có."
)]
struct Args {
    /// Thư mục chứa `data.csv` của bộ Hannover.
    hannover_repo: PathBuf,
    /// Thư mục chứa `metadata.csv` cần cập nhật.
    mila_repo: PathBuf,
    /// File CSV liệt kê mã ảnh cần loại trừ (cột đầu tiên).
    exclude_path: PathBuf,
    /// Ghi kết quả ra file khác thay vì ghi đè `metadata.csv`.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// File TOML cấu hình chuyển đổi.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Ghi thống kê gộp ra file JSON.
    #[arg(long)]
    report: Option<PathBuf>,
    /// Mã tạm thời bắt đầu đánh số từ giá trị này + 1.
    #[arg(long, default_value_t = 0)]
    starting_patient_id: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let report = run(&args)?;

    println!(
        "Generated at: {}\nUpdated records: {}\nNew records: {}\nMerged records: {}",
        report.generated_at, report.updated_records, report.new_records, report.merged_records
    );

    Ok(())
}

fn run(args: &Args) -> anyhow::Result<MergeReport> {
    let config = table_io::load_config(args.config.as_deref())?;
    let excluded = table_io::read_exclusions(&args.exclude_path)?;

    let source_path = args.hannover_repo.join("data.csv");
    let source = File::open(&source_path)
        .with_context(|| format!("Không đọc được file {:?}", source_path))?;
    let records = read_source_csv(source)
        .with_context(|| format!("Không đọc được dữ liệu nguồn {:?}", source_path))?;
    info!(rows = records.len(), "loaded source data");
    let records = exclude_images(records, &excluded);

    let metadata_path = args.mila_repo.join("metadata.csv");
    let base = table_io::read_metadata_csv(&metadata_path)?;
    info!(
        rows = base.len(),
        columns = base.columns().len(),
        "loaded base metadata"
    );

    let converted = convert_records(&records, args.starting_patient_id, &config);
    let outcome = merge_records(&base, &converted)
        .with_context(|| format!("Không gộp được vào {:?}", metadata_path))?;

    let output = args.output.clone().unwrap_or(metadata_path);
    table_io::write_metadata_csv(&output, &outcome.table)?;
    info!(rows = outcome.table.len(), path = %output.display(), "wrote merged metadata");

    if let Some(report_path) = &args.report {
        let json = serde_json::to_string_pretty(&outcome.report)?;
        fs::write(report_path, json)
            .with_context(|| format!("Không ghi được báo cáo {:?}", report_path))?;
    }

    Ok(outcome.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DATA_CSV: &str = "\
patient_id,image_id,admission_offset,icu_admission_offset,icu_release_offset,death_offset,sex,projection
p1,img1,-2,,,,m,ap
p1,img2,0,-1,2,,m,pa
p2,img3,20,,,,f,ap
p3,skipme,0,,,,f,ap
";

    const METADATA_CSV: &str = "\
patientid,offset,sex,finding,filename,notes
4,,F,Pneumonia,old.png,keep me
9b,1,M,COVID-19,img2.jpg,stale
";

    fn setup(tmp: &TempDir) -> Args {
        let hannover = tmp.path().join("hannover");
        let mila = tmp.path().join("mila");
        fs::create_dir_all(&hannover).unwrap();
        fs::create_dir_all(&mila).unwrap();
        fs::write(hannover.join("data.csv"), DATA_CSV).unwrap();
        fs::write(mila.join("metadata.csv"), METADATA_CSV).unwrap();
        let exclude = tmp.path().join("exclude.csv");
        fs::write(&exclude, "image_id\nskipme\n").unwrap();

        Args {
            hannover_repo: hannover,
            mila_repo: mila,
            exclude_path: exclude,
            output: None,
            config: None,
            report: Some(tmp.path().join("report.json")),
            starting_patient_id: 0,
        }
    }

    #[test]
    fn merges_hannover_rows_into_metadata_in_place() {
        let tmp = TempDir::new().unwrap();
        let args = setup(&tmp);

        let report = run(&args).unwrap();
        assert_eq!(report.base_records, 2);
        assert_eq!(report.incoming_records, 3);
        assert_eq!(report.updated_records, 1);
        assert_eq!(report.new_records, 2);
        assert_eq!(report.max_base_patient_id, 9);

        let merged = table_io::read_metadata_csv(&args.mila_repo.join("metadata.csv")).unwrap();
        let rows: Vec<(Option<&str>, Option<&str>)> = merged
            .records()
            .iter()
            .map(|record| (record.patient_id(), record.filename()))
            .collect();
        assert_eq!(
            rows,
            vec![
                (Some("4"), Some("old.png")),
                (Some("9b"), Some("img2.jpg")),
                (Some("10"), Some("img1.jpg")),
                (Some("11"), Some("img3.jpg")),
            ]
        );

        let replaced = &merged.records()[1];
        assert_eq!(replaced.get("notes"), None);
        assert_eq!(replaced.get("in_icu"), Some("Y"));
        assert_eq!(merged.records()[0].get("notes"), Some("keep me"));

        let report_json = fs::read_to_string(tmp.path().join("report.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&report_json).unwrap();
        assert_eq!(value["new_patients"], 2);
    }

    #[test]
    fn second_run_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let args = setup(&tmp);
        let metadata = args.mila_repo.join("metadata.csv");

        run(&args).unwrap();
        let first = fs::read_to_string(&metadata).unwrap();
        let report = run(&args).unwrap();
        let second = fs::read_to_string(&metadata).unwrap();

        assert_eq!(first, second);
        assert_eq!(report.new_records, 0);
    }

    #[test]
    fn unparseable_base_identifier_aborts_without_writing() {
        let tmp = TempDir::new().unwrap();
        let mut args = setup(&tmp);
        fs::write(
            args.mila_repo.join("metadata.csv"),
            "patientid,filename\nunknown,a.png\n",
        )
        .unwrap();
        let output = tmp.path().join("merged.csv");
        args.output = Some(output.clone());

        assert!(run(&args).is_err());
        assert!(!output.exists());
    }
}
