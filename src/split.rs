// src/split.rs
use std::collections::BTreeSet;

use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;

use crate::dataset::Dataset;
use crate::error::PipelineError;
use crate::types::{Movement, SubjectKey};

/// How rows are assigned to the test partition.
#[derive(Clone, Debug, PartialEq)]
pub enum SplitPolicy {
    /// Stratified random sample of `ceil(test_fraction * n)` rows.
    Automatic { test_fraction: f64, seed: u64 },
    /// Every row of these subjects goes to test, the rest to train.
    Manual { test_subjects: BTreeSet<SubjectKey> },
}

#[derive(Clone, Debug, Error, PartialEq, Serialize)]
pub enum SplitWarning {
    #[error("test partition holds fewer than two classes ({classes:?}); class-wise metrics are degenerate")]
    DegenerateTestPartition { classes: Vec<Movement> },
}

/// One side of a split, co-indexed arrays of features, labels and subjects.
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    /// Row indices into the source dataset, ascending.
    pub indices: Vec<usize>,
    pub features: Array2<f64>,
    pub labels: Vec<Movement>,
    pub subjects: Vec<SubjectKey>,
}

impl Partition {
    fn from_indices(dataset: &Dataset, matrix: &Array2<f64>, indices: Vec<usize>) -> Self {
        let rows = dataset.rows();
        Self {
            features: matrix.select(Axis(0), &indices),
            labels: indices.iter().map(|&i| rows[i].movement).collect(),
            subjects: indices.iter().map(|&i| rows[i].subject.clone()).collect(),
            indices,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn classes(&self) -> Vec<Movement> {
        let present: BTreeSet<Movement> = self.labels.iter().copied().collect();
        present.into_iter().collect()
    }

    pub fn class_count(&self, movement: Movement) -> usize {
        self.labels.iter().filter(|&&m| m == movement).count()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Split {
    pub policy: SplitPolicy,
    /// Column names of both feature matrices.
    pub feature_names: Vec<String>,
    pub train: Partition,
    pub test: Partition,
    pub warnings: Vec<SplitWarning>,
}

impl Split {
    pub fn new(dataset: &Dataset, policy: &SplitPolicy) -> Result<Self, PipelineError> {
        if dataset.is_empty() {
            return Err(PipelineError::EmptyInput("dataset"));
        }
        let test_indices = match policy {
            SplitPolicy::Automatic {
                test_fraction,
                seed,
            } => stratified_test_indices(dataset, *test_fraction, *seed)?,
            SplitPolicy::Manual { test_subjects } => manual_test_indices(dataset, test_subjects)?,
        };
        let in_test: BTreeSet<usize> = test_indices.iter().copied().collect();
        let train_indices: Vec<usize> = (0..dataset.len()).filter(|i| !in_test.contains(i)).collect();
        if train_indices.is_empty() || in_test.is_empty() {
            return Err(PipelineError::InvalidSplit(format!(
                "{} train and {} test rows; both partitions need data",
                train_indices.len(),
                in_test.len()
            )));
        }

        let matrix = dataset.feature_matrix();
        let train = Partition::from_indices(dataset, &matrix, train_indices);
        let test = Partition::from_indices(dataset, &matrix, in_test.into_iter().collect());

        let mut warnings = Vec::new();
        let test_classes = test.classes();
        if test_classes.len() < Movement::ORDER.len() {
            let warning = SplitWarning::DegenerateTestPartition {
                classes: test_classes,
            };
            log::warn!("{warning}");
            warnings.push(warning);
        }
        log::info!("split: {} train rows, {} test rows", train.len(), test.len());
        Ok(Self {
            policy: policy.clone(),
            feature_names: dataset.schema().names().to_vec(),
            train,
            test,
            warnings,
        })
    }
}

fn stratified_test_indices(
    dataset: &Dataset,
    test_fraction: f64,
    seed: u64,
) -> Result<Vec<usize>, PipelineError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PipelineError::InvalidSplit(format!(
            "test fraction {test_fraction} is outside (0, 1)"
        )));
    }
    let n = dataset.len();
    let labels = dataset.labels();
    let per_class: Vec<(Movement, Vec<usize>)> = dataset
        .classes()
        .into_iter()
        .map(|m| (m, (0..n).filter(|&i| labels[i] == m).collect()))
        .collect();
    if let Some((m, members)) = per_class.iter().find(|(_, members)| members.len() < 2) {
        return Err(PipelineError::InvalidSplit(format!(
            "class {m} has {} member(s); stratification needs at least 2",
            members.len()
        )));
    }
    let n_test = (test_fraction * n as f64).ceil() as usize;
    if n_test < per_class.len() || n - n_test < per_class.len() {
        return Err(PipelineError::InvalidSplit(format!(
            "{n_test} test rows out of {n} cannot hold every class on both sides"
        )));
    }

    // Largest-remainder allocation of the test rows across classes.
    let quotas: Vec<f64> = per_class
        .iter()
        .map(|(_, members)| n_test as f64 * members.len() as f64 / n as f64)
        .collect();
    let mut counts: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
    let mut by_remainder: Vec<usize> = (0..quotas.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = quotas[a] - quotas[a].floor();
        let rb = quotas[b] - quotas[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    let leftover = n_test - counts.iter().sum::<usize>();
    for &class in by_remainder.iter().take(leftover) {
        counts[class] += 1;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut test = Vec::with_capacity(n_test);
    for ((_, members), count) in per_class.iter().zip(counts) {
        let mut shuffled = members.clone();
        shuffled.shuffle(&mut rng);
        test.extend(shuffled.into_iter().take(count));
    }
    test.sort_unstable();
    Ok(test)
}

fn manual_test_indices(
    dataset: &Dataset,
    test_subjects: &BTreeSet<SubjectKey>,
) -> Result<Vec<usize>, PipelineError> {
    let known = dataset.subjects();
    let unknown: Vec<SubjectKey> = test_subjects.difference(&known).cloned().collect();
    if !unknown.is_empty() {
        return Err(PipelineError::UnknownSubjectsInManualSplit { subjects: unknown });
    }
    Ok(dataset
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| test_subjects.contains(&row.subject))
        .map(|(i, _)| i)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureSchema, FeatureVector};

    fn dataset(flexion: usize, extension: usize) -> Dataset {
        let rows = (0..flexion + extension)
            .map(|i| FeatureVector {
                subject: SubjectKey::Id((i % 10 + 1) as u64),
                movement: if i < flexion {
                    Movement::Flexion
                } else {
                    Movement::Extension
                },
                values: vec![i as f64; 18],
            })
            .collect();
        Dataset::new(FeatureSchema::new(4), rows).unwrap()
    }

    fn automatic(seed: u64) -> SplitPolicy {
        SplitPolicy::Automatic {
            test_fraction: 0.3,
            seed,
        }
    }

    #[test]
    fn automatic_split_preserves_class_ratio() {
        let data = dataset(60, 40);
        let split = Split::new(&data, &automatic(42)).unwrap();
        assert_eq!(split.test.len(), 30);
        assert_eq!(split.train.len() + split.test.len(), data.len());
        assert_eq!(split.test.class_count(Movement::Flexion), 18);
        assert_eq!(split.test.class_count(Movement::Extension), 12);
        assert!(split.warnings.is_empty());
        assert_eq!(split.feature_names.len(), 18);
    }

    #[test]
    fn partitions_are_disjoint_and_cover_the_dataset() {
        let data = dataset(23, 14);
        let split = Split::new(&data, &automatic(7)).unwrap();
        let train: BTreeSet<usize> = split.train.indices.iter().copied().collect();
        let test: BTreeSet<usize> = split.test.indices.iter().copied().collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.union(&test).count(), data.len());
        // Feature rows follow the indices.
        for (row, &i) in split.test.indices.iter().enumerate() {
            assert_eq!(split.test.features[[row, 0]], i as f64);
        }
    }

    #[test]
    fn same_seed_same_split() {
        let data = dataset(30, 30);
        let a = Split::new(&data, &automatic(42)).unwrap();
        let b = Split::new(&data, &automatic(42)).unwrap();
        let c = Split::new(&data, &automatic(43)).unwrap();
        assert_eq!(a.test.indices, b.test.indices);
        assert_ne!(a.test.indices, c.test.indices);
    }

    #[test]
    fn singleton_class_cannot_be_stratified() {
        let data = dataset(10, 1);
        assert!(matches!(
            Split::new(&data, &automatic(42)),
            Err(PipelineError::InvalidSplit(_))
        ));
    }

    #[test]
    fn unknown_manual_subjects_are_named() {
        let data = dataset(10, 10);
        let policy = SplitPolicy::Manual {
            test_subjects: [SubjectKey::Id(99), SubjectKey::Id(3)].into_iter().collect(),
        };
        match Split::new(&data, &policy) {
            Err(PipelineError::UnknownSubjectsInManualSplit { subjects }) => {
                assert_eq!(subjects, vec![SubjectKey::Id(99)])
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn manual_split_holds_out_whole_subjects() {
        let data = dataset(10, 10);
        let policy = SplitPolicy::Manual {
            test_subjects: [SubjectKey::Id(2), SubjectKey::Id(5)].into_iter().collect(),
        };
        let split = Split::new(&data, &policy).unwrap();
        assert_eq!(split.test.len(), 4);
        assert!(split
            .test
            .subjects
            .iter()
            .all(|s| *s == SubjectKey::Id(2) || *s == SubjectKey::Id(5)));
        assert!(!split.train.subjects.contains(&SubjectKey::Id(2)));
        assert!(split.warnings.is_empty());
    }

    #[test]
    fn single_class_test_partition_warns() {
        // Subject 10 only appears in the flexion rows (i = 9).
        let data = dataset(10, 8);
        let policy = SplitPolicy::Manual {
            test_subjects: [SubjectKey::Id(10)].into_iter().collect(),
        };
        let split = Split::new(&data, &policy).unwrap();
        assert_eq!(
            split.warnings,
            vec![SplitWarning::DegenerateTestPartition {
                classes: vec![Movement::Flexion]
            }]
        );
    }
}
