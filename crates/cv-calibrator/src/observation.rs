//! Detector Observations
//!
//! One record per detector output seen during a calibration pass, plus the
//! flat row shape used by the tabular dump.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Class identifier as reported by the detector's label lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub i64);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ClassId {
    fn from(id: i64) -> Self {
        ClassId(id)
    }
}

impl FromStr for ClassId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ClassId)
    }
}

/// A single detector output recorded during calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Class id of the image's true label
    pub ground_truth_class_id: ClassId,
    /// The image's true label
    pub ground_truth_label: String,
    /// Class id of the label the detector reported
    pub predicted_class_id: ClassId,
    /// Label the detector reported
    pub predicted_label: String,
    /// Raw detector confidence (expected in [0, 1])
    pub confidence: f64,
    /// Whether the reported label matches the label being queried
    pub is_detected: bool,
}

impl Observation {
    /// True when the detector's class matches the ground truth
    pub fn is_correct(&self) -> bool {
        self.predicted_class_id == self.ground_truth_class_id
    }

    pub fn to_row(&self) -> ObservationRow {
        ObservationRow {
            predicted_label: self.predicted_label.clone(),
            predicted_class_id: self.predicted_class_id,
            ground_truth_label: self.ground_truth_label.clone(),
            ground_truth_class_id: self.ground_truth_class_id,
            confidence: self.confidence,
            is_detected: self.is_detected,
        }
    }
}

/// Row of the tabular dump. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub predicted_label: String,
    pub predicted_class_id: ClassId,
    pub ground_truth_label: String,
    pub ground_truth_class_id: ClassId,
    pub confidence: f64,
    pub is_detected: bool,
}

impl From<ObservationRow> for Observation {
    fn from(row: ObservationRow) -> Self {
        Observation {
            ground_truth_class_id: row.ground_truth_class_id,
            ground_truth_label: row.ground_truth_label,
            predicted_class_id: row.predicted_class_id,
            predicted_label: row.predicted_label,
            confidence: row.confidence,
            is_detected: row.is_detected,
        }
    }
}
