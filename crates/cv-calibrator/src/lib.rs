//! CV Calibrator
//!
//! Calibrates raw object-detector confidences with split conformal prediction.
//! A calibration pass records detector outputs on labelled images; the
//! persisted distribution is later sampled into non-conformity scores that
//! turn a raw confidence into an empirical existence or non-existence
//! guarantee.

pub mod collector;
pub mod conformal;
pub mod distribution;
pub mod error;
pub mod metadata;
pub mod observation;
pub mod pass;
pub mod storage;
pub mod traits;

pub use collector::DistributionCollector;
pub use conformal::{
    calibrate, draw_sample, estimate_guarantee, non_conformity_scores, CalibratedConfidence,
    CalibrationSample, ConformalEstimator, GuaranteeKind, DEFAULT_SAMPLE_SIZE, DEFAULT_SEED,
    GUARANTEE_THRESHOLD,
};
pub use distribution::{DataDistribution, LabelBucket};
pub use error::{CalibrationError, CalibrationResult};
pub use metadata::{CalibrationMetadata, CalibrationMethod};
pub use observation::{ClassId, Observation, ObservationRow};
pub use pass::{run_calibration_pass, PassSummary};
pub use storage::{load_distribution, load_metadata, PersistedCalibration};
pub use traits::{DatasetLoader, DetectedObject, ObjectDetector};
