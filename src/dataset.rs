// src/dataset.rs
use std::collections::{BTreeSet, HashMap};

use ndarray::Array2;
use rayon::prelude::*;
use serde::Serialize;

use crate::config::FeatureConfig;
use crate::error::{PipelineError, TrialError};
use crate::features::{FeatureExtractor, FeatureSchema, FeatureVector};
use crate::signal::FilteredSignal;
use crate::types::{Movement, SubjectKey, TrialKey};

/// Labelled feature table, one row per (subject, movement) group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dataset {
    schema: FeatureSchema,
    rows: Vec<FeatureVector>,
}

impl Dataset {
    /// Every row must match the schema width and both classes must be present.
    pub fn new(schema: FeatureSchema, rows: Vec<FeatureVector>) -> Result<Self, PipelineError> {
        for row in &rows {
            if row.values.len() != schema.len() {
                return Err(PipelineError::LengthMismatch {
                    expected: schema.len(),
                    actual: row.values.len(),
                });
            }
        }
        let dataset = Self { schema, rows };
        let found = dataset.classes();
        if found.len() < Movement::ORDER.len() {
            return Err(PipelineError::InsufficientClasses { found });
        }
        Ok(dataset)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct classes present, in [`Movement::ORDER`].
    pub fn classes(&self) -> Vec<Movement> {
        let present: BTreeSet<Movement> = self.rows.iter().map(|r| r.movement).collect();
        present.into_iter().collect()
    }

    pub fn subjects(&self) -> BTreeSet<SubjectKey> {
        self.rows.iter().map(|r| r.subject.clone()).collect()
    }

    pub fn labels(&self) -> Vec<Movement> {
        self.rows.iter().map(|r| r.movement).collect()
    }

    /// Rows x features, in schema column order.
    pub fn feature_matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.rows.len(), self.schema.len()), |(i, j)| {
            self.rows[i].values[j]
        })
    }

    /// Feature names followed by the subject, movement code and class columns.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = self.schema.names().to_vec();
        columns.extend(["subject", "movement_code", "class"].map(String::from));
        columns
    }

    /// Row cells as text, in [`Dataset::columns`] order.
    pub fn table_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                let mut cells: Vec<String> = row.values.iter().map(f64::to_string).collect();
                cells.push(row.subject.to_string());
                cells.push(row.movement.code().to_string());
                cells.push(row.movement.label().to_string());
                cells
            })
            .collect()
    }
}

/// What the builder left out and why.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildReport {
    pub excluded: Vec<TrialError>,
    /// Trials whose movement code is neither flexion nor extension.
    pub ignored: Vec<TrialKey>,
}

pub struct DatasetBuilder {
    extractor: FeatureExtractor,
}

impl DatasetBuilder {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(config),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        self.extractor.schema()
    }

    /// Group filtered signals by normalized subject and movement, then extract
    /// one feature vector per group.
    ///
    /// Signals of one group are concatenated in input order. Rows come out
    /// flexion first, then extension, subjects in first-seen order.
    pub fn build(
        &self,
        signals: &[FilteredSignal],
    ) -> Result<(Dataset, BuildReport), PipelineError> {
        if signals.is_empty() {
            return Err(PipelineError::EmptyInput("filtered signal set"));
        }
        let mut report = BuildReport::default();
        let mut order: Vec<(SubjectKey, Movement)> = Vec::new();
        let mut grouped: HashMap<(SubjectKey, Movement), Vec<f64>> = HashMap::new();
        for signal in signals {
            let Some(movement) = Movement::from_code(signal.key.movement_code) else {
                log::debug!("ignoring {}", signal.key);
                report.ignored.push(signal.key.clone());
                continue;
            };
            let group = (SubjectKey::normalize(&signal.key.subject), movement);
            grouped
                .entry(group.clone())
                .or_insert_with(|| {
                    order.push(group);
                    Vec::new()
                })
                .extend_from_slice(&signal.samples);
        }
        order.sort_by_key(|(_, movement)| movement.index());

        let groups: Vec<((SubjectKey, Movement), Vec<f64>)> = order
            .into_iter()
            .filter_map(|key| grouped.remove(&key).map(|samples| (key, samples)))
            .collect();
        let results: Vec<Result<FeatureVector, TrialError>> = groups
            .par_iter()
            .map(|((subject, movement), samples)| {
                self.extractor
                    .extract(samples)
                    .map(|values| FeatureVector {
                        subject: subject.clone(),
                        movement: *movement,
                        values,
                    })
                    .map_err(|e| TrialError::FeatureExtractionFailure {
                        key: TrialKey::new(subject.to_string(), movement.code()),
                        reason: e.to_string(),
                    })
            })
            .collect();

        let mut rows = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(row) => rows.push(row),
                Err(err) => {
                    log::warn!("group excluded: {err}");
                    report.excluded.push(err);
                }
            }
        }
        log::info!(
            "dataset built: {} rows, {} excluded groups, {} ignored trials",
            rows.len(),
            report.excluded.len(),
            report.ignored.len()
        );
        let dataset = Dataset::new(self.extractor.schema().clone(), rows)?;
        Ok((dataset, report))
    }
}
