// src/lib.rs
//! EMG flexion/extension classification.
//!
//! Trials are band-pass and notch filtered ([`signal`]), reduced to a fixed
//! 18-value feature vector per subject and movement ([`features`],
//! [`dataset`]), split into train and test ([`split`]), and fed to three
//! classifier families whose best grid-search configurations compete on a
//! blended cross-validation and held-out score ([`ml`]). [`context`] threads
//! the stages together; [`metrics`] and [`report`] describe the outcome.
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod features;
pub mod metrics;
pub mod ml;
pub mod report;
pub mod signal;
pub mod split;
pub mod types;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use dataset::{BuildReport, Dataset, DatasetBuilder};
pub use error::{FamilyFailure, PipelineError, TrialError};
pub use features::{FeatureExtractor, FeatureSchema, FeatureVector};
pub use metrics::{evaluate, evaluate_labels, ConfusionMatrix, Evaluation};
pub use ml::{ModelFamily, SelectionResult, Selector};
pub use report::{render_text, SelectionSummary};
pub use split::{Split, SplitPolicy, SplitWarning};
pub use types::{normalize_label, Movement, SubjectKey, TrialKey};
