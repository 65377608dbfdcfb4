//! Conformal Prediction
//!
//! Split conformal calibration of raw detector confidences. A held-out sample
//! of recorded observations is turned into non-conformity scores:
//!
//! - correct prediction: `1 - confidence` (confident and right conforms)
//! - wrong prediction: `confidence` (confident and wrong does not)
//!
//! A query confidence `c` is then calibrated against the fraction of scores
//! strictly below `c`. At or above [`GUARANTEE_THRESHOLD`] that fraction is
//! reported as the existence guarantee; below it, one minus the fraction is
//! reported as the non-existence guarantee.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, CalibrationResult};
use crate::observation::ClassId;

/// Query confidence at which the guarantee switches from non-existence to existence
pub const GUARANTEE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_SAMPLE_SIZE: usize = 2000;
pub const DEFAULT_SEED: u64 = 1;

const CONFIDENCE_COLUMN: &str = "confidence";
const PREDICTED_COLUMN: &str = "predicted_class_id";
const GROUND_TRUTH_COLUMN: &str = "ground_truth_class_id";

/// Which guarantee a calibrated confidence expresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuaranteeKind {
    /// Probability the prediction is reliable
    Existence,
    /// Probability the prediction is unreliable
    NonExistence,
}

impl GuaranteeKind {
    pub fn for_confidence(query_confidence: f64) -> Self {
        if query_confidence >= GUARANTEE_THRESHOLD {
            GuaranteeKind::Existence
        } else {
            GuaranteeKind::NonExistence
        }
    }
}

/// Calibration sample drawn from a tabular dump. The three vectors are aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSample {
    pub confidences: Vec<f64>,
    pub predicted_ids: Vec<ClassId>,
    pub ground_truth_ids: Vec<ClassId>,
}

impl CalibrationSample {
    pub fn len(&self) -> usize {
        self.confidences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confidences.is_empty()
    }

    pub fn non_conformity_scores(&self) -> CalibrationResult<Vec<f64>> {
        non_conformity_scores(&self.confidences, &self.predicted_ids, &self.ground_truth_ids)
    }
}

/// Draw `sample_size` rows uniformly without replacement from the dump at `path`.
///
/// The same seed over the same file always yields the same sample.
pub fn draw_sample(
    path: impl AsRef<Path>,
    sample_size: usize,
    seed: u64,
) -> CalibrationResult<CalibrationSample> {
    let path = path.as_ref();
    tracing::debug!("Drawing calibration sample from {}", path.display());
    draw_sample_from_reader(File::open(path)?, sample_size, seed)
}

/// [`draw_sample`] over any CSV source with a header row
pub fn draw_sample_from_reader<R: Read>(
    source: R,
    sample_size: usize,
    seed: u64,
) -> CalibrationResult<CalibrationSample> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(source);

    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| CalibrationError::MissingColumn(name.to_string()))
    };
    let confidence_idx = column(CONFIDENCE_COLUMN)?;
    let predicted_idx = column(PREDICTED_COLUMN)?;
    let ground_truth_idx = column(GROUND_TRUTH_COLUMN)?;

    let mut rows: Vec<(f64, ClassId, ClassId)> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize, name: &str| {
            record.get(idx).ok_or_else(|| {
                CalibrationError::InvalidData(format!("row {}: no value for {}", line + 1, name))
            })
        };

        let confidence = field(confidence_idx, CONFIDENCE_COLUMN)?
            .trim()
            .parse::<f64>()
            .map_err(|e| {
                CalibrationError::InvalidData(format!("row {}: bad confidence: {}", line + 1, e))
            })?;
        let predicted = field(predicted_idx, PREDICTED_COLUMN)?
            .parse::<ClassId>()
            .map_err(|e| {
                CalibrationError::InvalidData(format!("row {}: bad predicted id: {}", line + 1, e))
            })?;
        let ground_truth = field(ground_truth_idx, GROUND_TRUTH_COLUMN)?
            .parse::<ClassId>()
            .map_err(|e| {
                CalibrationError::InvalidData(format!(
                    "row {}: bad ground truth id: {}",
                    line + 1,
                    e
                ))
            })?;

        rows.push((confidence, predicted, ground_truth));
    }

    if sample_size > rows.len() {
        return Err(CalibrationError::InsufficientSamples {
            requested: sample_size,
            available: rows.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let picks = rand::seq::index::sample(&mut rng, rows.len(), sample_size);

    let mut sample = CalibrationSample {
        confidences: Vec::with_capacity(sample_size),
        predicted_ids: Vec::with_capacity(sample_size),
        ground_truth_ids: Vec::with_capacity(sample_size),
    };
    for idx in picks.iter() {
        let (confidence, predicted, ground_truth) = rows[idx];
        sample.confidences.push(confidence);
        sample.predicted_ids.push(predicted);
        sample.ground_truth_ids.push(ground_truth);
    }

    tracing::info!(
        "Drew {} of {} rows for calibration (seed {})",
        sample_size,
        rows.len(),
        seed
    );

    Ok(sample)
}

/// Non-conformity score of every sample, in input order
pub fn non_conformity_scores<Id: PartialEq>(
    confidences: &[f64],
    predicted_ids: &[Id],
    ground_truth_ids: &[Id],
) -> CalibrationResult<Vec<f64>> {
    if confidences.len() != predicted_ids.len() || confidences.len() != ground_truth_ids.len() {
        return Err(CalibrationError::LengthMismatch {
            confidences: confidences.len(),
            predicted: predicted_ids.len(),
            ground_truth: ground_truth_ids.len(),
        });
    }

    Ok(confidences
        .iter()
        .zip(predicted_ids.iter().zip(ground_truth_ids))
        .map(|(&confidence, (predicted, ground_truth))| {
            if predicted == ground_truth {
                1.0 - confidence
            } else {
                confidence
            }
        })
        .collect())
}

/// Empirical guarantee for `query_confidence` against the calibration scores.
///
/// The result jumps at [`GUARANTEE_THRESHOLD`] where the guarantee kind flips.
/// Scores are taken as given: a NaN score never counts as below the query.
/// [`ConformalEstimator`] rejects non-finite scores up front.
pub fn estimate_guarantee(
    query_confidence: f64,
    non_conformity_scores: &[f64],
) -> CalibrationResult<f64> {
    if non_conformity_scores.is_empty() {
        return Err(CalibrationError::EmptyScores);
    }
    if query_confidence.is_nan() {
        return Err(CalibrationError::InvalidData(
            "query confidence is NaN".to_string(),
        ));
    }

    let below = non_conformity_scores
        .iter()
        .filter(|&&score| score < query_confidence)
        .count();
    let fraction = below as f64 / non_conformity_scores.len() as f64;

    Ok(match GuaranteeKind::for_confidence(query_confidence) {
        GuaranteeKind::Existence => fraction,
        GuaranteeKind::NonExistence => 1.0 - fraction,
    })
}

/// Calibrated confidence for a raw detector confidence
pub fn calibrate(query_confidence: f64, non_conformity_scores: &[f64]) -> CalibrationResult<f64> {
    estimate_guarantee(query_confidence, non_conformity_scores)
}

/// A raw confidence together with its calibrated value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedConfidence {
    pub raw_confidence: f64,
    pub calibrated_confidence: f64,
    pub guarantee: GuaranteeKind,
}

/// Calibrator over a fixed, non-empty set of non-conformity scores
#[derive(Debug, Clone)]
pub struct ConformalEstimator {
    scores: Vec<f64>,
}

impl ConformalEstimator {
    pub fn from_scores(scores: Vec<f64>) -> CalibrationResult<Self> {
        if scores.is_empty() {
            return Err(CalibrationError::EmptyScores);
        }
        if let Some(idx) = scores.iter().position(|s| !s.is_finite()) {
            return Err(CalibrationError::InvalidData(format!(
                "non-finite non-conformity score {} at index {}",
                scores[idx], idx
            )));
        }
        Ok(Self { scores })
    }

    pub fn from_sample(sample: &CalibrationSample) -> CalibrationResult<Self> {
        Self::from_scores(sample.non_conformity_scores()?)
    }

    /// Sample a persisted dump and score it in one step
    pub fn from_dump(
        path: impl AsRef<Path>,
        sample_size: usize,
        seed: u64,
    ) -> CalibrationResult<Self> {
        let sample = draw_sample(path, sample_size, seed)?;
        Self::from_sample(&sample)
    }

    pub fn calibrate(&self, raw_confidence: f64) -> CalibrationResult<CalibratedConfidence> {
        Ok(CalibratedConfidence {
            raw_confidence,
            calibrated_confidence: estimate_guarantee(raw_confidence, &self.scores)?,
            guarantee: GuaranteeKind::for_confidence(raw_confidence),
        })
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn sample_size(&self) -> usize {
        self.scores.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE_SCORES: [f64; 4] = [0.2, 0.8, 0.3, 0.9];

    fn dump(rows: usize) -> String {
        let mut csv = String::from(
            "predicted_label,predicted_class_id,ground_truth_label,ground_truth_class_id,confidence,is_detected\n",
        );
        for i in 0..rows {
            let predicted = i % 3;
            csv.push_str(&format!(
                "label{},{},person,0,{},{}\n",
                predicted,
                predicted,
                (i % 100) as f64 / 100.0,
                predicted == 0
            ));
        }
        csv
    }

    #[test]
    fn test_scores_follow_correctness() {
        let scores = non_conformity_scores(
            &[0.9, 0.9, 0.25],
            &[ClassId(1), ClassId(2), ClassId(3)],
            &[ClassId(1), ClassId(1), ClassId(3)],
        )
        .unwrap();

        assert!((scores[0] - 0.1).abs() < 1e-12);
        assert_eq!(scores[1], 0.9);
        assert_eq!(scores[2], 0.75);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let confidences: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        let predicted: Vec<u32> = (0..=100).map(|i| i % 4).collect();
        let truth: Vec<u32> = (0..=100).map(|i| i % 3).collect();

        let scores = non_conformity_scores(&confidences, &predicted, &truth).unwrap();

        assert_eq!(scores.len(), confidences.len());
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_scores_reject_misaligned_inputs() {
        let result = non_conformity_scores(&[0.5, 0.6], &[1, 2], &[1]);
        assert!(matches!(result, Err(CalibrationError::LengthMismatch { .. })));
    }

    #[test]
    fn test_existence_guarantee_example() {
        assert_eq!(estimate_guarantee(0.7, &EXAMPLE_SCORES).unwrap(), 0.75);
    }

    #[test]
    fn test_non_existence_guarantee_example() {
        assert_eq!(estimate_guarantee(0.1, &EXAMPLE_SCORES).unwrap(), 1.0);
    }

    #[test]
    fn test_guarantee_jumps_at_threshold() {
        let scores = [0.1, 0.2, 0.3, 0.4, 0.6, 0.7, 0.8, 0.9];

        // Just below: 4 of 8 scores under the query, reported as 1 - 0.5
        let below = estimate_guarantee(0.4999, &scores).unwrap();
        // At the threshold: the same 4 of 8, reported directly
        let at = estimate_guarantee(0.5, &scores).unwrap();
        assert_eq!(below, 0.5);
        assert_eq!(at, 0.5);

        // Skewed scores make the branch switch visible as a discontinuity
        let skewed = [0.05, 0.1, 0.15, 0.2];
        let below = estimate_guarantee(0.4999, &skewed).unwrap();
        let above = estimate_guarantee(0.5001, &skewed).unwrap();
        assert_eq!(below, 0.0);
        assert_eq!(above, 1.0);
    }

    #[test]
    fn test_guarantee_stays_in_unit_interval() {
        for i in 0..=20 {
            let q = i as f64 / 20.0;
            let g = estimate_guarantee(q, &EXAMPLE_SCORES).unwrap();
            assert!((0.0..=1.0).contains(&g), "guarantee {} for query {}", g, q);
        }
    }

    #[test]
    fn test_empty_scores_fail() {
        assert!(matches!(
            estimate_guarantee(0.7, &[]),
            Err(CalibrationError::EmptyScores)
        ));
        assert!(matches!(calibrate(0.2, &[]), Err(CalibrationError::EmptyScores)));
        assert!(ConformalEstimator::from_scores(Vec::new()).is_err());
    }

    #[test]
    fn test_nan_query_fails() {
        assert!(estimate_guarantee(f64::NAN, &EXAMPLE_SCORES).is_err());
    }

    #[test]
    fn test_estimator_rejects_non_finite_scores() {
        for bad in [f64::NAN, f64::INFINITY] {
            let result = ConformalEstimator::from_scores(vec![0.2, bad, 0.3]);
            assert!(matches!(result, Err(CalibrationError::InvalidData(_))));
        }
    }

    #[test]
    fn test_calibrate_matches_estimate() {
        for q in [0.05, 0.3, 0.5, 0.85] {
            assert_eq!(
                calibrate(q, &EXAMPLE_SCORES).unwrap(),
                estimate_guarantee(q, &EXAMPLE_SCORES).unwrap()
            );
        }
    }

    #[test]
    fn test_estimator_reports_guarantee_kind() {
        let estimator = ConformalEstimator::from_scores(EXAMPLE_SCORES.to_vec()).unwrap();

        let high = estimator.calibrate(0.7).unwrap();
        assert_eq!(high.guarantee, GuaranteeKind::Existence);
        assert_eq!(high.calibrated_confidence, 0.75);

        let low = estimator.calibrate(0.1).unwrap();
        assert_eq!(low.guarantee, GuaranteeKind::NonExistence);
        assert_eq!(low.calibrated_confidence, 1.0);
        assert_eq!(low.raw_confidence, 0.1);
    }

    #[test]
    fn test_draw_sample_is_deterministic() {
        let source = dump(500);

        let first = draw_sample_from_reader(source.as_bytes(), 200, 1).unwrap();
        let second = draw_sample_from_reader(source.as_bytes(), 200, 1).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 200);
        assert_eq!(first.predicted_ids.len(), 200);
        assert_eq!(first.ground_truth_ids.len(), 200);
    }

    #[test]
    fn test_draw_sample_seed_changes_sample() {
        let source = dump(500);

        let a = draw_sample_from_reader(source.as_bytes(), 100, 1).unwrap();
        let b = draw_sample_from_reader(source.as_bytes(), 100, 2).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_draw_sample_full_population() {
        let source = dump(10);
        let sample = draw_sample_from_reader(source.as_bytes(), 10, 7).unwrap();

        let mut confidences = sample.confidences.clone();
        confidences.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let expected: Vec<f64> = (0..10).map(|i| i as f64 / 100.0).collect();
        assert_eq!(confidences, expected);
    }

    #[test]
    fn test_draw_sample_too_large() {
        let source = dump(5);
        let result = draw_sample_from_reader(source.as_bytes(), 6, 1);
        assert!(matches!(
            result,
            Err(CalibrationError::InsufficientSamples {
                requested: 6,
                available: 5
            })
        ));
    }

    #[test]
    fn test_draw_sample_missing_column() {
        let source = "predicted_class_id,ground_truth_class_id\n1,1\n";
        let result = draw_sample_from_reader(source.as_bytes(), 1, 1);
        assert!(matches!(result, Err(CalibrationError::MissingColumn(c)) if c == "confidence"));
    }

    #[test]
    fn test_draw_sample_rejects_bad_confidence() {
        let source = "confidence,predicted_class_id,ground_truth_class_id\nhigh,1,1\n";
        let result = draw_sample_from_reader(source.as_bytes(), 1, 1);
        assert!(matches!(result, Err(CalibrationError::InvalidData(_))));
    }
}
