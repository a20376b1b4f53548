// src/storage/mod.rs
use crate::merge::{project_target, MergedTable, TARGET_COLUMNS};
use crate::records::{RecordKey, RecordSet, Signals};
use crate::utils::error::StorageError;
use crate::vocab::GeoClass;
use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const RESP_DETECTIONS_FILE: &str = "respiratory_detections.csv";
pub const POSITIVE_TESTS_FILE: &str = "positive_tests.csv";
pub const RAW_OUTPUT_FILE: &str = "raw.csv";
pub const TARGET_OUTPUT_FILE: &str = "data_report.csv";

/// Summary written beside each season's output files.
#[derive(Serialize)]
struct SeasonMetadata {
    season_start: i32,
    season_end: i32,
    row_count: usize,
    signal_columns: Vec<String>,
    extraction_timestamp: String,
}

/// Lays out season outputs under the base directory: finished seasons under
/// an archive, the live season under `target-data`, and the live season's
/// append-only record snapshots under `auxiliary-data`.
pub struct StorageManager {
    base_dir: PathBuf,
}

impl StorageManager {
    /// Creates a new StorageManager with the specified base directory
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_path = base_dir.as_ref().to_path_buf();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(StorageError::IoError)?;
        }

        Ok(Self {
            base_dir: base_path,
        })
    }

    fn season_dir(&self, start_year: i32, end_year: i32, live: bool) -> PathBuf {
        let season = format!("season_{start_year}_{end_year}");
        if live {
            self.base_dir.join("target-data").join(season)
        } else {
            self.base_dir
                .join("auxiliary-data")
                .join("target-data-archive")
                .join(season)
        }
    }

    fn snapshot_dir(&self, start_year: i32, end_year: i32) -> PathBuf {
        self.base_dir
            .join("auxiliary-data")
            .join(format!("season_{start_year}_{end_year}_raw_files"))
    }

    /// True when a season's final output is already on disk, used to skip
    /// re-harvesting the historical archive.
    pub fn season_output_exists(&self, start_year: i32, end_year: i32, live: bool) -> bool {
        self.season_dir(start_year, end_year, live)
            .join(TARGET_OUTPUT_FILE)
            .exists()
    }

    /// Writes a season's merged table: the full wide `raw.csv` and the
    /// narrow `data_report.csv` projection. Returns the season directory.
    pub fn write_season_outputs(
        &self,
        start_year: i32,
        end_year: i32,
        live: bool,
        merged: &MergedTable,
    ) -> Result<PathBuf, StorageError> {
        let target_dir = self.season_dir(start_year, end_year, live);
        if !target_dir.exists() {
            fs::create_dir_all(&target_dir).map_err(StorageError::IoError)?;
        }

        let raw_path = target_dir.join(RAW_OUTPUT_FILE);
        write_merged_wide(&raw_path, merged)?;
        tracing::info!("Saved {} rows to {}", merged.len(), raw_path.display());

        let target_path = target_dir.join(TARGET_OUTPUT_FILE);
        write_merged_target(&target_path, merged)?;
        tracing::info!("Saved target data to {}", target_path.display());

        self.save_season_metadata(&target_dir, start_year, end_year, merged)?;

        Ok(target_dir)
    }

    /// Saves metadata about the season output in JSON format
    fn save_season_metadata(
        &self,
        target_dir: &Path,
        start_year: i32,
        end_year: i32,
        merged: &MergedTable,
    ) -> Result<PathBuf, StorageError> {
        let file_path = target_dir.join("season_meta.json");

        let metadata = SeasonMetadata {
            season_start: start_year,
            season_end: end_year,
            row_count: merged.len(),
            signal_columns: merged.columns(),
            extraction_timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let metadata_str = serde_json::to_string_pretty(&metadata)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        fs::write(&file_path, metadata_str).map_err(StorageError::IoError)?;

        tracing::debug!("Saved metadata to {}", file_path.display());
        Ok(file_path)
    }

    /// Folds new live-season records into an on-disk snapshot and returns
    /// the full accumulated set. The fold only happens when none of the new
    /// index keys are already present, so re-running within the same
    /// reporting week leaves the snapshot untouched.
    pub fn append_snapshot(
        &self,
        start_year: i32,
        end_year: i32,
        file_name: &str,
        records: &RecordSet,
    ) -> Result<RecordSet, StorageError> {
        let dir = self.snapshot_dir(start_year, end_year);
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(StorageError::IoError)?;
        }
        let path = dir.join(file_name);

        if !path.exists() {
            write_record_set(&path, records)?;
            return Ok(records.clone());
        }

        let mut accumulated = load_record_set(&path)?;
        if accumulated.extend_if_new(records.clone()) {
            write_record_set(&path, &accumulated)?;
            tracing::info!("Appended {} rows to {}", records.len(), path.display());
        } else {
            tracing::info!(
                "Snapshot {} already holds the current week, skipping append",
                path.display()
            );
        }
        Ok(accumulated)
    }
}

/// Writes a record set with its full five-column index plus the sorted
/// union of signal columns. Missing cells are written empty.
pub fn write_record_set(path: &Path, records: &RecordSet) -> Result<(), StorageError> {
    let mut writer = csv::Writer::from_path(path)?;
    let signal_columns: Vec<String> = records.columns().into_iter().collect();

    let mut header = vec![
        "epiweek".to_string(),
        "time_value".to_string(),
        "issue".to_string(),
        "geo_type".to_string(),
        "geo_value".to_string(),
    ];
    header.extend(signal_columns.iter().cloned());
    writer.write_record(&header)?;

    for (key, signals) in records.rows() {
        let mut row = vec![
            key.epiweek.to_string(),
            key.time_value.to_string(),
            key.issue.to_string(),
            key.geo_type.to_string(),
            key.geo_value.clone(),
        ];
        for column in &signal_columns {
            row.push(format_cell(signals.get(column).copied()));
        }
        writer.write_record(&row)?;
    }
    writer.flush().map_err(StorageError::IoError)?;
    Ok(())
}

/// Reads back a record set written by `write_record_set`.
pub fn load_record_set(path: &Path) -> Result<RecordSet, StorageError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.len() < 5 {
        return Err(StorageError::SerializationError(format!(
            "record snapshot {} has a truncated header",
            path.display()
        )));
    }

    let bad_field = |name: &str, value: &str| {
        StorageError::SerializationError(format!(
            "bad {name} '{value}' in {}",
            path.display()
        ))
    };

    let mut set = RecordSet::new();
    for record in reader.records() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or_default();

        let key = RecordKey {
            epiweek: field(0)
                .parse()
                .map_err(|_| bad_field("epiweek", field(0)))?,
            time_value: NaiveDate::parse_from_str(field(1), "%Y-%m-%d")
                .map_err(|_| bad_field("time_value", field(1)))?,
            issue: NaiveDate::parse_from_str(field(2), "%Y-%m-%d")
                .map_err(|_| bad_field("issue", field(2)))?,
            geo_type: GeoClass::parse(field(3)).ok_or_else(|| bad_field("geo_type", field(3)))?,
            geo_value: field(4).to_string(),
        };

        let mut signals = Signals::new();
        for (idx, column) in headers.iter().enumerate().skip(5) {
            let value = field(idx).trim();
            if value.is_empty() {
                continue;
            }
            signals.insert(
                column.clone(),
                value.parse().map_err(|_| bad_field(column, value))?,
            );
        }
        set.insert_row(key, signals);
    }
    Ok(set)
}

fn write_merged_wide(path: &Path, merged: &MergedTable) -> Result<(), StorageError> {
    let mut writer = csv::Writer::from_path(path)?;
    let signal_columns = merged.columns();

    let mut header = vec![
        "time_value".to_string(),
        "geo_type".to_string(),
        "geo_value".to_string(),
    ];
    header.extend(signal_columns.iter().cloned());
    writer.write_record(&header)?;

    for (key, signals) in merged.rows() {
        let mut row = vec![
            key.time_value.to_string(),
            key.geo_type.to_string(),
            key.geo_value.clone(),
        ];
        for column in &signal_columns {
            row.push(format_cell(signals.get(column).copied()));
        }
        writer.write_record(&row)?;
    }
    writer.flush().map_err(StorageError::IoError)?;
    Ok(())
}

fn write_merged_target(path: &Path, merged: &MergedTable) -> Result<(), StorageError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec![
        "time_value".to_string(),
        "geo_type".to_string(),
        "geo_value".to_string(),
    ];
    header.extend(TARGET_COLUMNS.iter().map(|c| c.to_string()));
    writer.write_record(&header)?;

    for (key, values) in project_target(merged) {
        let mut row = vec![
            key.time_value.to_string(),
            key.geo_type.to_string(),
            key.geo_value.clone(),
        ];
        for value in values {
            row.push(format_cell(value));
        }
        writer.write_record(&row)?;
    }
    writer.flush().map_err(StorageError::IoError)?;
    Ok(())
}

fn format_cell(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => String::new(),
    }
}
