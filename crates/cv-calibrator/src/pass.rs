//! Calibration Pass
//!
//! Sweeps a labelled dataset through a detector and records every output
//! into a [`DistributionCollector`].

use serde::{Deserialize, Serialize};

use crate::collector::DistributionCollector;
use crate::error::CalibrationResult;
use crate::traits::{DatasetLoader, DetectedObject, ObjectDetector};

/// Counts from one calibration pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub labels: usize,
    pub images: usize,
    pub observations: usize,
    /// Queries where the detector found nothing and a zero confidence was recorded
    pub missed_detections: usize,
}

/// Run every image of every label in `labels` through `detector`.
///
/// Each image is queried once per candidate label with the detector
/// restricted to that label. When the detector finds nothing, a
/// zero-confidence detection of the queried label is recorded instead.
/// An observation counts as detected when the reported name equals the
/// queried label.
pub fn run_calibration_pass<D, L>(
    detector: &D,
    loader: &L,
    labels: &[String],
    collector: &mut DistributionCollector,
) -> CalibrationResult<PassSummary>
where
    D: ObjectDetector,
    L: DatasetLoader<Image = D::Image>,
{
    let mut summary = PassSummary {
        labels: labels.len(),
        ..Default::default()
    };

    for ground_truth_label in labels {
        let images = loader.images_by_label(ground_truth_label)?;
        let ground_truth_class_id = detector.class_id_from_name(ground_truth_label)?;
        tracing::info!(
            "Calibrating on {} images labelled '{}'",
            images.len(),
            ground_truth_label
        );

        for image in &images {
            for query_label in labels {
                let query = std::slice::from_ref(query_label);
                let detected = match detector.detect(image, Some(query))? {
                    Some(detected) => detected,
                    None => {
                        summary.missed_detections += 1;
                        DetectedObject::missing(query_label)
                    }
                };

                let predicted_class_id = detector.class_id_from_name(&detected.name)?;
                collector.record(
                    ground_truth_class_id,
                    ground_truth_label,
                    predicted_class_id,
                    &detected.name,
                    detected.confidence,
                    *query_label == detected.name,
                );
                summary.observations += 1;
            }
        }

        summary.images += images.len();
    }

    tracing::info!(
        "Calibration pass complete: {} images, {} observations, {} misses",
        summary.images,
        summary.observations,
        summary.missed_detections
    );

    Ok(summary)
}
