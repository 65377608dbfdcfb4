//! Calibration Result Storage
//!
//! Layout of a persisted calibration result:
//!
//! ```text
//! <root>/calibration_result_<timestamp>/
//!     metadata.json
//!     <model>_data_distribution.csv
//!     <model>_data_distribution.ndjson
//! ```
//!
//! Each file is written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written file. The three files are not written as
//! a unit: a failure part way through leaves the earlier files behind.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::distribution::{DataDistribution, LabelBucket};
use crate::error::{CalibrationError, CalibrationResult};
use crate::metadata::CalibrationMetadata;
use crate::observation::{ClassId, Observation};

pub const METADATA_FILE: &str = "metadata.json";
const RESULT_DIR_PREFIX: &str = "calibration_result_";

/// Paths of the artifacts written for one calibration result
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedCalibration {
    pub directory: PathBuf,
    pub metadata_path: PathBuf,
    pub dump_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub metadata: CalibrationMetadata,
    /// Number of rows written to the tabular dump
    pub rows_written: usize,
}

/// Per-observation fields stored in a snapshot line; the label is the line key
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotObservation {
    ground_truth_class_id: ClassId,
    ground_truth_label: String,
    predicted_class_id: ClassId,
    confidence: f64,
    is_detected: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotLine {
    predicted_label: String,
    observations: Vec<SnapshotObservation>,
}

impl From<&LabelBucket> for SnapshotLine {
    fn from(bucket: &LabelBucket) -> Self {
        SnapshotLine {
            predicted_label: bucket.predicted_label.clone(),
            observations: bucket
                .observations
                .iter()
                .map(|o| SnapshotObservation {
                    ground_truth_class_id: o.ground_truth_class_id,
                    ground_truth_label: o.ground_truth_label.clone(),
                    predicted_class_id: o.predicted_class_id,
                    confidence: o.confidence,
                    is_detected: o.is_detected,
                })
                .collect(),
        }
    }
}

impl From<SnapshotLine> for LabelBucket {
    fn from(line: SnapshotLine) -> Self {
        let predicted_label = line.predicted_label;
        let observations = line
            .observations
            .into_iter()
            .map(|o| Observation {
                ground_truth_class_id: o.ground_truth_class_id,
                ground_truth_label: o.ground_truth_label,
                predicted_class_id: o.predicted_class_id,
                predicted_label: predicted_label.clone(),
                confidence: o.confidence,
                is_detected: o.is_detected,
            })
            .collect();
        LabelBucket {
            predicted_label,
            observations,
        }
    }
}

/// Directory name for a result persisted at `timestamp`
pub fn result_dir_name(timestamp: &DateTime<Utc>) -> String {
    format!(
        "{}{}",
        RESULT_DIR_PREFIX,
        timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    )
}

pub fn dump_file_name(cv_model: &str) -> String {
    format!("{}_data_distribution.csv", cv_model)
}

pub fn snapshot_file_name(cv_model: &str) -> String {
    format!("{}_data_distribution.ndjson", cv_model)
}

/// Create the result directory under `root` and write all three artifacts.
///
/// Fails if the result directory already exists, which happens when two
/// results share a timestamp.
pub fn write_calibration_result(
    root: &Path,
    metadata: CalibrationMetadata,
    distribution: &DataDistribution,
) -> CalibrationResult<PersistedCalibration> {
    fs::create_dir_all(root)?;
    let directory = root.join(result_dir_name(&metadata.timestamp));
    fs::create_dir(&directory)?;

    let metadata_path = directory.join(METADATA_FILE);
    write_atomically(&metadata_path, |w| {
        serde_json::to_writer_pretty(&mut *w, &metadata)?;
        Ok(())
    })?;

    let dump_path = directory.join(dump_file_name(&metadata.cv_model));
    let rows_written = write_dump(&dump_path, distribution)?;

    let snapshot_path = directory.join(snapshot_file_name(&metadata.cv_model));
    write_snapshot(&snapshot_path, distribution)?;

    tracing::info!(
        "Persisted {} observations across {} labels to {}",
        rows_written,
        distribution.label_count(),
        directory.display()
    );

    Ok(PersistedCalibration {
        directory,
        metadata_path,
        dump_path,
        snapshot_path,
        metadata,
        rows_written,
    })
}

/// Write the tabular dump, returning the number of data rows
pub fn write_dump(path: &Path, distribution: &DataDistribution) -> CalibrationResult<usize> {
    let rows = distribution.rows();
    write_atomically(path, |w| {
        let mut writer = csv::Writer::from_writer(w);
        for row in &rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    })?;
    Ok(rows.len())
}

/// Write one JSON line per label bucket
pub fn write_snapshot(path: &Path, distribution: &DataDistribution) -> CalibrationResult<()> {
    write_atomically(path, |w| {
        for bucket in distribution.buckets() {
            serde_json::to_writer(&mut *w, &SnapshotLine::from(bucket))?;
            w.write_all(b"\n")?;
        }
        Ok(())
    })
}

/// Reconstruct the distribution exactly as it was persisted
pub fn load_distribution(snapshot_path: &Path) -> CalibrationResult<DataDistribution> {
    let reader = BufReader::new(File::open(snapshot_path)?);
    let mut buckets = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: SnapshotLine = serde_json::from_str(&line)?;
        buckets.push(LabelBucket::from(parsed));
    }

    DataDistribution::from_buckets(buckets)
}

pub fn load_metadata(result_dir: &Path) -> CalibrationResult<CalibrationMetadata> {
    let file = File::open(result_dir.join(METADATA_FILE))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Find the dump and snapshot files of a result directory from its metadata
pub fn artifact_paths(result_dir: &Path) -> CalibrationResult<(PathBuf, PathBuf)> {
    let metadata = load_metadata(result_dir)?;
    let dump = result_dir.join(dump_file_name(&metadata.cv_model));
    let snapshot = result_dir.join(snapshot_file_name(&metadata.cv_model));
    for path in [&dump, &snapshot] {
        if !path.is_file() {
            return Err(CalibrationError::InvalidData(format!(
                "missing artifact {}",
                path.display()
            )));
        }
    }
    Ok((dump, snapshot))
}

fn write_atomically<F>(path: &Path, write: F) -> CalibrationResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> CalibrationResult<()>,
{
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CalibrationError::InvalidData(format!("bad path {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut writer = BufWriter::new(File::create(&tmp_path)?);
    write(&mut writer)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    fs::rename(&tmp_path, path)?;
    Ok(())
}
