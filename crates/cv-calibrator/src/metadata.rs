//! Calibration run metadata written next to every persisted distribution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::distribution::DataDistribution;
use crate::error::{CalibrationError, CalibrationResult};

/// Method used for calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Split conformal prediction over non-conformity scores
    ConformalPrediction,
}

impl CalibrationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationMethod::ConformalPrediction => "conformal_prediction",
        }
    }
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalibrationMethod {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conformal_prediction" => Ok(CalibrationMethod::ConformalPrediction),
            other => Err(CalibrationError::InvalidData(format!(
                "unsupported calibration method '{}'",
                other
            ))),
        }
    }
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMetadata {
    /// When the result was persisted (ISO 8601, UTC)
    pub timestamp: DateTime<Utc>,
    /// Name of the calibrated detector
    pub cv_model: String,
    pub calibration_method: CalibrationMethod,
    /// Approximate image count; informational only, see [`approximate_image_count`]
    pub total_number_of_images: u64,
}

impl CalibrationMetadata {
    pub fn new(
        timestamp: DateTime<Utc>,
        cv_model: &str,
        calibration_method: CalibrationMethod,
        distribution: &DataDistribution,
    ) -> CalibrationResult<Self> {
        Ok(Self {
            timestamp,
            cv_model: cv_model.to_string(),
            calibration_method,
            total_number_of_images: approximate_image_count(distribution)?,
        })
    }
}

/// Total observations divided by the number of distinct predicted labels.
///
/// Every image is queried once per candidate label during a pass, so this
/// recovers the image count only when each query yields a distinct label.
/// Treat the value as an estimate.
pub fn approximate_image_count(distribution: &DataDistribution) -> CalibrationResult<u64> {
    let labels = distribution.label_count();
    if labels == 0 {
        return Err(CalibrationError::EmptyDistribution);
    }
    Ok((distribution.total_observations() / labels) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{ClassId, Observation};

    fn obs(label: &str) -> Observation {
        Observation {
            ground_truth_class_id: ClassId(0),
            ground_truth_label: "person".to_string(),
            predicted_class_id: ClassId(0),
            predicted_label: label.to_string(),
            confidence: 0.9,
            is_detected: true,
        }
    }

    #[test]
    fn test_method_round_trips_through_str() {
        let method: CalibrationMethod = "Conformal_Prediction".parse().unwrap();
        assert_eq!(method, CalibrationMethod::ConformalPrediction);
        assert_eq!(method.to_string(), "conformal_prediction");
        assert!("temperature_scaling".parse::<CalibrationMethod>().is_err());
    }

    #[test]
    fn test_method_serializes_snake_case() {
        let json = serde_json::to_string(&CalibrationMethod::ConformalPrediction).unwrap();
        assert_eq!(json, "\"conformal_prediction\"");
    }

    #[test]
    fn test_image_count_is_observations_per_label() {
        let mut distribution = DataDistribution::new();
        for _ in 0..6 {
            distribution.push(obs("person"));
        }
        for _ in 0..3 {
            distribution.push(obs("car"));
        }

        // 9 observations over 2 labels
        assert_eq!(approximate_image_count(&distribution).unwrap(), 4);
    }

    #[test]
    fn test_image_count_fails_on_empty_distribution() {
        let distribution = DataDistribution::new();
        assert!(matches!(
            approximate_image_count(&distribution),
            Err(CalibrationError::EmptyDistribution)
        ));
    }
}
