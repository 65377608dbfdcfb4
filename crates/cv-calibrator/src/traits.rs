use serde::{Deserialize, Serialize};

use crate::error::CalibrationResult;
use crate::observation::ClassId;

/// Best detection the detector returned for an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: String,
    pub confidence: f64,
}

impl DetectedObject {
    /// Placeholder recorded when the detector finds nothing for `label`
    pub fn missing(label: &str) -> Self {
        Self {
            name: label.to_string(),
            confidence: 0.0,
        }
    }
}

/// Object detector being calibrated
pub trait ObjectDetector {
    type Image;

    /// Detect objects in `image`, optionally restricted to `classes`.
    /// Returns `None` when nothing is found.
    fn detect(
        &self,
        image: &Self::Image,
        classes: Option<&[String]>,
    ) -> CalibrationResult<Option<DetectedObject>>;

    fn class_id_from_name(&self, name: &str) -> CalibrationResult<ClassId>;
}

/// Source of labelled calibration images
pub trait DatasetLoader {
    type Image;

    fn images_by_label(&self, label: &str) -> CalibrationResult<Vec<Self::Image>>;
}
