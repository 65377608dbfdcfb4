use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Insufficient samples: requested {requested}, only {available} available")]
    InsufficientSamples { requested: usize, available: usize },

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Length mismatch: {confidences} confidences, {predicted} predictions, {ground_truth} ground truths")]
    LengthMismatch {
        confidences: usize,
        predicted: usize,
        ground_truth: usize,
    },

    #[error("Non-conformity score set is empty")]
    EmptyScores,

    #[error("Distribution is empty, nothing to persist")]
    EmptyDistribution,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;
