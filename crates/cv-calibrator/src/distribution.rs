//! Data Distribution
//!
//! Observations grouped by predicted label. Labels keep the order in which
//! they were first seen and each label's observations keep insertion order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, CalibrationResult};
use crate::observation::{Observation, ObservationRow};

/// All observations sharing one predicted label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelBucket {
    pub predicted_label: String,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataDistribution {
    buckets: Vec<LabelBucket>,
    index: HashMap<String, usize>,
}

impl DataDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a distribution from buckets in persisted order.
    ///
    /// Rejects duplicate labels and observations filed under a label other
    /// than their own predicted label.
    pub fn from_buckets(buckets: Vec<LabelBucket>) -> CalibrationResult<Self> {
        let mut distribution = Self::new();

        for bucket in buckets {
            if distribution.index.contains_key(&bucket.predicted_label) {
                return Err(CalibrationError::InvalidData(format!(
                    "label '{}' appears more than once",
                    bucket.predicted_label
                )));
            }
            if let Some(stray) = bucket
                .observations
                .iter()
                .find(|o| o.predicted_label != bucket.predicted_label)
            {
                return Err(CalibrationError::InvalidData(format!(
                    "observation labelled '{}' filed under '{}'",
                    stray.predicted_label, bucket.predicted_label
                )));
            }

            distribution
                .index
                .insert(bucket.predicted_label.clone(), distribution.buckets.len());
            distribution.buckets.push(bucket);
        }

        Ok(distribution)
    }

    /// Append an observation under its predicted label
    pub fn push(&mut self, observation: Observation) {
        match self.index.get(&observation.predicted_label) {
            Some(&idx) => self.buckets[idx].observations.push(observation),
            None => {
                tracing::debug!(label = %observation.predicted_label, "new predicted label");
                self.index
                    .insert(observation.predicted_label.clone(), self.buckets.len());
                self.buckets.push(LabelBucket {
                    predicted_label: observation.predicted_label.clone(),
                    observations: vec![observation],
                });
            }
        }
    }

    /// Append every observation of `other`, preserving its label order
    pub fn merge(&mut self, other: DataDistribution) {
        for bucket in other.buckets {
            for observation in bucket.observations {
                self.push(observation);
            }
        }
    }

    pub fn get(&self, predicted_label: &str) -> Option<&[Observation]> {
        self.index
            .get(predicted_label)
            .map(|&idx| self.buckets[idx].observations.as_slice())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.predicted_label.as_str())
    }

    pub fn buckets(&self) -> &[LabelBucket] {
        &self.buckets
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.buckets.iter().flat_map(|b| b.observations.iter())
    }

    /// Flatten into tabular rows, grouped by label in insertion order
    pub fn rows(&self) -> Vec<ObservationRow> {
        self.observations().map(Observation::to_row).collect()
    }

    pub fn label_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn total_observations(&self) -> usize {
        self.buckets.iter().map(|b| b.observations.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
