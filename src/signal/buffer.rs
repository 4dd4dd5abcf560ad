use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::signal::Trial;
use crate::types::TrialKey;

/// One row of the acquisition table: a single sample tagged with its trial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub subject: String,
    pub movement_code: i64,
    pub value: f64,
}

/// Accumulates sample rows and groups them into trials.
///
/// Rows of different trials may be interleaved; within a trial the acquisition
/// order is kept. Trials come out in the order their first row was seen.
pub struct TrialAssembler {
    sample_rate_hz: f64,
    order: Vec<TrialKey>,
    per_trial: HashMap<TrialKey, Vec<f64>>,
}

impl TrialAssembler {
    pub fn new(sample_rate_hz: f64) -> Result<Self, PipelineError> {
        if !(sample_rate_hz > 0.0) {
            return Err(PipelineError::InvalidConfig {
                field: "sample_rate_hz",
                reason: format!("{sample_rate_hz} must be greater than zero"),
            });
        }
        Ok(Self {
            sample_rate_hz,
            order: Vec::new(),
            per_trial: HashMap::new(),
        })
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn push(&mut self, row: SampleRow) {
        let key = TrialKey::new(row.subject, row.movement_code);
        match self.per_trial.get_mut(&key) {
            Some(samples) => samples.push(row.value),
            None => {
                self.order.push(key.clone());
                self.per_trial.insert(key, vec![row.value]);
            }
        }
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = SampleRow>) {
        for row in rows {
            self.push(row);
        }
    }

    pub fn trial_count(&self) -> usize {
        self.order.len()
    }

    pub fn samples_for(&self, key: &TrialKey) -> Option<&[f64]> {
        self.per_trial.get(key).map(Vec::as_slice)
    }

    pub fn into_trials(mut self) -> Vec<Trial> {
        let sample_rate_hz = self.sample_rate_hz;
        self.order
            .into_iter()
            .filter_map(|key| {
                let samples = self.per_trial.remove(&key)?;
                Some(Trial::new(key.subject, key.movement_code, samples, sample_rate_hz))
            })
            .collect()
    }
}
