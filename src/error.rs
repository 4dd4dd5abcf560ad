use serde::Serialize;
use thiserror::Error;

use crate::ml::ModelFamily;
use crate::types::{Movement, SubjectKey, TrialKey};

/// Fatal errors: each aborts only the top-level operation that raised it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown subjects in manual split: {}", join(subjects))]
    UnknownSubjectsInManualSplit { subjects: Vec<SubjectKey> },
    #[error("unrecognized class label {label:?}; expected a Flexion or Extension variant")]
    UnrecognizedClassLabel { label: String },
    #[error("every model family failed: {}", describe_failures(failures))]
    AllFamiliesFailed { failures: Vec<FamilyFailure> },
    #[error("dataset needs both classes, found [{}]", join(found))]
    InsufficientClasses { found: Vec<Movement> },
    #[error("invalid split: {0}")]
    InvalidSplit(String),
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("{0} is empty")]
    EmptyInput(&'static str),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-trial failures; the trial is excluded and the batch continues.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TrialError {
    #[error("{key}: signal too short ({len} samples, need at least {min})")]
    TrialTooShort { key: TrialKey, len: usize, min: usize },
    #[error("{key}: sample rate mismatch: expected {expected} Hz, got {actual} Hz")]
    SampleRateMismatch {
        key: TrialKey,
        expected: f64,
        actual: f64,
    },
    #[error("{key}: filtering failed: {reason}")]
    FilterNumericalFailure { key: TrialKey, reason: String },
    #[error("{key}: feature extraction failed: {reason}")]
    FeatureExtractionFailure { key: TrialKey, reason: String },
}

impl TrialError {
    pub fn key(&self) -> &TrialKey {
        match self {
            TrialError::TrialTooShort { key, .. }
            | TrialError::SampleRateMismatch { key, .. }
            | TrialError::FilterNumericalFailure { key, .. }
            | TrialError::FeatureExtractionFailure { key, .. } => key,
        }
    }
}

/// A model family whose grid search could not complete.
#[derive(Clone, Debug, Error, PartialEq, Serialize)]
#[error("{family} training failed: {reason}")]
pub struct FamilyFailure {
    pub family: ModelFamily,
    pub reason: String,
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_failures(failures: &[FamilyFailure]) -> String {
    if failures.is_empty() {
        return "no families configured".into();
    }
    join(failures)
}
