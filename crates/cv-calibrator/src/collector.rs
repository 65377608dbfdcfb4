//! Distribution Collector
//!
//! Accumulates detector observations during a calibration pass and hands
//! them off to storage once the pass is complete.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::distribution::DataDistribution;
use crate::error::{CalibrationError, CalibrationResult};
use crate::metadata::{CalibrationMetadata, CalibrationMethod};
use crate::observation::{ClassId, Observation};
use crate::storage::{self, PersistedCalibration};

/// Collects observations for a single detector over one calibration pass.
///
/// Not meant to be shared between threads: use one collector per worker and
/// [`merge`](Self::merge) them before persisting.
#[derive(Debug, Clone)]
pub struct DistributionCollector {
    cv_model_name: String,
    method: CalibrationMethod,
    distribution: DataDistribution,
}

impl DistributionCollector {
    pub fn new(cv_model_name: impl Into<String>, method: CalibrationMethod) -> Self {
        Self {
            cv_model_name: cv_model_name.into(),
            method,
            distribution: DataDistribution::new(),
        }
    }

    /// Record one detector output under its predicted label.
    ///
    /// Values are stored as given. A confidence outside [0, 1] is logged but
    /// still recorded.
    pub fn record(
        &mut self,
        ground_truth_class_id: ClassId,
        ground_truth_label: &str,
        predicted_class_id: ClassId,
        predicted_label: &str,
        confidence: f64,
        is_detected: bool,
    ) {
        if !(0.0..=1.0).contains(&confidence) {
            tracing::warn!(
                label = predicted_label,
                confidence,
                "confidence outside [0, 1]"
            );
        }

        self.distribution.push(Observation {
            ground_truth_class_id,
            ground_truth_label: ground_truth_label.to_string(),
            predicted_class_id,
            predicted_label: predicted_label.to_string(),
            confidence,
            is_detected,
        });
    }

    /// Fold another worker's observations into this collector.
    ///
    /// Both collectors must describe the same detector and method.
    pub fn merge(&mut self, other: DistributionCollector) -> CalibrationResult<()> {
        if other.cv_model_name != self.cv_model_name || other.method != self.method {
            return Err(CalibrationError::InvalidData(format!(
                "cannot merge {} ({}) into {} ({})",
                other.cv_model_name, other.method, self.cv_model_name, self.method
            )));
        }
        self.distribution.merge(other.distribution);
        Ok(())
    }

    pub fn distribution(&self) -> &DataDistribution {
        &self.distribution
    }

    pub fn cv_model_name(&self) -> &str {
        &self.cv_model_name
    }

    pub fn method(&self) -> CalibrationMethod {
        self.method
    }

    pub fn is_empty(&self) -> bool {
        self.distribution.is_empty()
    }

    /// Persist the collected distribution under `destination_root`, stamped
    /// with the current UTC time. Consumes the collector.
    pub fn persist(self, destination_root: impl AsRef<Path>) -> CalibrationResult<PersistedCalibration> {
        self.persist_at(destination_root, Utc::now())
    }

    /// Same as [`persist`](Self::persist) with an explicit timestamp
    pub fn persist_at(
        self,
        destination_root: impl AsRef<Path>,
        timestamp: DateTime<Utc>,
    ) -> CalibrationResult<PersistedCalibration> {
        let metadata = CalibrationMetadata::new(
            timestamp,
            &self.cv_model_name,
            self.method,
            &self.distribution,
        )?;

        storage::write_calibration_result(destination_root.as_ref(), metadata, &self.distribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn collector() -> DistributionCollector {
        DistributionCollector::new("YOLOv8x-worldv2", CalibrationMethod::ConformalPrediction)
    }

    #[test]
    fn test_record_creates_label_on_first_use() {
        let mut c = collector();
        assert!(c.is_empty());

        c.record(ClassId(0), "person", ClassId(0), "person", 0.88, true);
        c.record(ClassId(0), "person", ClassId(2), "car", 0.05, false);
        c.record(ClassId(2), "car", ClassId(2), "car", 0.77, true);

        let d = c.distribution();
        assert_eq!(d.label_count(), 2);
        assert_eq!(d.get("person").unwrap().len(), 1);
        assert_eq!(d.get("car").unwrap().len(), 2);
    }

    #[test]
    fn test_record_keeps_out_of_range_confidence() {
        let mut c = collector();
        c.record(ClassId(0), "person", ClassId(0), "person", 1.5, true);
        assert_eq!(c.distribution().get("person").unwrap()[0].confidence, 1.5);
    }

    #[test]
    fn test_persist_writes_every_recorded_row() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = collector();
        for i in 0..10 {
            let label = if i % 2 == 0 { "person" } else { "car" };
            c.record(ClassId(0), "person", ClassId(i % 2), label, i as f64 / 10.0, i % 2 == 0);
        }
        let before = c.distribution().clone();

        let persisted = c.persist(tmp.path()).unwrap();

        assert_eq!(persisted.rows_written, 10);
        assert_eq!(persisted.metadata.total_number_of_images, 5);
        assert_eq!(persisted.metadata.cv_model, "YOLOv8x-worldv2");

        let dump = fs::read_to_string(&persisted.dump_path).unwrap();
        assert_eq!(dump.lines().count(), 11);

        let restored = storage::load_distribution(&persisted.snapshot_path).unwrap();
        assert_eq!(restored, before);
    }

    #[test]
    fn test_persist_empty_collector_fails_before_touching_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("results");

        let result = collector().persist(&root);

        assert!(matches!(result, Err(CalibrationError::EmptyDistribution)));
        assert!(!root.exists());
    }

    #[test]
    fn test_merge_combines_workers() {
        let mut a = collector();
        a.record(ClassId(0), "person", ClassId(0), "person", 0.9, true);
        let mut b = collector();
        b.record(ClassId(2), "car", ClassId(0), "person", 0.4, true);
        b.record(ClassId(2), "car", ClassId(2), "car", 0.6, true);

        a.merge(b).unwrap();

        assert_eq!(a.distribution().total_observations(), 3);
        assert_eq!(a.distribution().get("person").unwrap().len(), 2);
    }

    #[test]
    fn test_merge_rejects_other_detector() {
        let mut a = collector();
        a.record(ClassId(0), "person", ClassId(0), "person", 0.9, true);
        let mut b = DistributionCollector::new("YOLOv9e", CalibrationMethod::ConformalPrediction);
        b.record(ClassId(2), "car", ClassId(2), "car", 0.6, true);

        let result = a.merge(b);

        assert!(matches!(result, Err(CalibrationError::InvalidData(_))));
        assert_eq!(a.distribution().total_observations(), 1);
        assert_eq!(a.cv_model_name(), "YOLOv8x-worldv2");
    }
}
