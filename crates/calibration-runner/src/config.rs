use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cv_calibrator::{CalibrationMetadata, CalibrationMethod, DEFAULT_SAMPLE_SIZE, DEFAULT_SEED};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RunnerConfig {
    pub cv_model_name: String,
    pub calibration_method: CalibrationMethod,
    pub output_dir: PathBuf,
    pub sample_size: usize,
    pub seed: u64,
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            cv_model_name: env::var("CV_MODEL_NAME").unwrap_or_else(|_| "YOLOv9e".to_string()),
            calibration_method: env::var("CALIBRATION_METHOD")
                .unwrap_or_else(|_| "conformal_prediction".to_string())
                .parse::<CalibrationMethod>()
                .context("CALIBRATION_METHOD")?,
            output_dir: env::var("CALIBRATION_OUTPUT_DIR")
                .unwrap_or_else(|_| "./calibration_results".to_string())
                .into(),
            sample_size: env::var("CALIBRATION_SAMPLE_SIZE")
                .unwrap_or_else(|_| DEFAULT_SAMPLE_SIZE.to_string())
                .parse::<usize>()
                .context("CALIBRATION_SAMPLE_SIZE must be a positive integer")?,
            seed: env::var("CALIBRATION_SEED")
                .unwrap_or_else(|_| DEFAULT_SEED.to_string())
                .parse::<u64>()
                .context("CALIBRATION_SEED must be an unsigned integer")?,
        };

        if config.sample_size == 0 {
            anyhow::bail!("CALIBRATION_SAMPLE_SIZE must be greater than zero");
        }

        Ok(config)
    }
}

impl RunnerConfig {
    /// Ways a persisted result differs from the configured detector and method
    pub fn mismatches(&self, metadata: &CalibrationMetadata) -> Vec<String> {
        let mut found = Vec::new();
        if metadata.cv_model != self.cv_model_name {
            found.push(format!(
                "cv_model is '{}', configured '{}'",
                metadata.cv_model, self.cv_model_name
            ));
        }
        if metadata.calibration_method != self.calibration_method {
            found.push(format!(
                "calibration_method is '{}', configured '{}'",
                metadata.calibration_method, self.calibration_method
            ));
        }
        found
    }
}
