// src/ml/mod.rs
// 模型侧：标准化、三类分类器、网格搜索与模型选择
pub mod mlp;
pub mod scaler;
pub mod search;
pub mod selector;
pub mod svm;
pub mod tree;

use std::fmt;

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Movement;

pub use scaler::StandardScaler;
pub use search::{grid_search, stratified_folds, SearchOutcome};
pub use selector::{pick_winner, FamilyResult, SelectionResult, Selector};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("training set holds a single class ({0})")]
    SingleClass(Movement),
    #[error("expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid hyperparameters: {0}")]
    InvalidParams(String),
    #[error("training diverged: {0}")]
    Diverged(String),
}

/// Classifier families, in the order they are trained and ranked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    DecisionTree,
    Svm,
    NeuralNetwork,
}

impl ModelFamily {
    pub const ORDER: [ModelFamily; 3] = [
        ModelFamily::DecisionTree,
        ModelFamily::Svm,
        ModelFamily::NeuralNetwork,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModelFamily::DecisionTree => "Decision Tree",
            ModelFamily::Svm => "SVM",
            ModelFamily::NeuralNetwork => "Neural Network",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything that maps one standardized feature row to a movement.
pub trait Classifier {
    fn n_features(&self) -> usize;

    fn predict_one(&self, row: ArrayView1<f64>) -> Movement;

    fn predict(&self, x: ArrayView2<f64>) -> Vec<Movement> {
        x.rows().into_iter().map(|row| self.predict_one(row)).collect()
    }
}

/// One point of a family's hyperparameter grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Hyperparams {
    Tree(tree::TreeParams),
    Svm(svm::SvmParams),
    Mlp(mlp::MlpParams),
}

impl Hyperparams {
    pub fn family(&self) -> ModelFamily {
        match self {
            Hyperparams::Tree(_) => ModelFamily::DecisionTree,
            Hyperparams::Svm(_) => ModelFamily::Svm,
            Hyperparams::Mlp(_) => ModelFamily::NeuralNetwork,
        }
    }

    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        y: &[Movement],
        seed: u64,
    ) -> Result<FittedModel, ModelError> {
        Ok(match self {
            Hyperparams::Tree(p) => FittedModel::Tree(tree::DecisionTree::fit(x, y, p, seed)?),
            Hyperparams::Svm(p) => FittedModel::Svm(svm::SvmClassifier::fit(x, y, p)?),
            Hyperparams::Mlp(p) => FittedModel::Mlp(mlp::MlpClassifier::fit(x, y, p, seed)?),
        })
    }
}

impl fmt::Display for Hyperparams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hyperparams::Tree(p) => fmt::Display::fmt(p, f),
            Hyperparams::Svm(p) => fmt::Display::fmt(p, f),
            Hyperparams::Mlp(p) => fmt::Display::fmt(p, f),
        }
    }
}

#[derive(Clone, Debug)]
pub enum FittedModel {
    Tree(tree::DecisionTree),
    Svm(svm::SvmClassifier),
    Mlp(mlp::MlpClassifier),
}

impl FittedModel {
    pub fn family(&self) -> ModelFamily {
        match self {
            FittedModel::Tree(_) => ModelFamily::DecisionTree,
            FittedModel::Svm(_) => ModelFamily::Svm,
            FittedModel::Mlp(_) => ModelFamily::NeuralNetwork,
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            FittedModel::Tree(m) => m,
            FittedModel::Svm(m) => m,
            FittedModel::Mlp(m) => m,
        }
    }
}

impl Classifier for FittedModel {
    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn predict_one(&self, row: ArrayView1<f64>) -> Movement {
        self.inner().predict_one(row)
    }
}

/// Samples per class, indexed like [`Movement::ORDER`].
pub(crate) fn class_counts(y: &[Movement]) -> [usize; 2] {
    let mut counts = [0; 2];
    for m in y {
        counts[m.index()] += 1;
    }
    counts
}

pub(crate) fn check_training_set(x: ArrayView2<f64>, y: &[Movement]) -> Result<(), ModelError> {
    if y.is_empty() || x.ncols() == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(ModelError::DimensionMismatch {
            expected: x.nrows(),
            actual: y.len(),
        });
    }
    let counts = class_counts(y);
    if let Some(only) = Movement::ORDER.into_iter().find(|m| counts[m.index()] == y.len()) {
        return Err(ModelError::SingleClass(only));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::InvalidParams("training features must be finite".into()));
    }
    Ok(())
}

/// Fraction of positions where both label slices agree.
pub fn accuracy(truth: &[Movement], predicted: &[Movement]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = truth.iter().zip(predicted).filter(|(a, b)| a == b).count();
    hits as f64 / truth.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn family_names_and_order() {
        let names: Vec<String> = ModelFamily::ORDER.iter().map(|f| f.to_string()).collect();
        assert_eq!(names, vec!["Decision Tree", "SVM", "Neural Network"]);
    }

    #[test]
    fn single_class_training_set_is_rejected() {
        let x = array![[0.0], [1.0]];
        let y = [Movement::Extension, Movement::Extension];
        assert_eq!(
            check_training_set(x.view(), &y),
            Err(ModelError::SingleClass(Movement::Extension))
        );
    }

    #[test]
    fn fitted_models_dispatch_by_family() {
        let x = array![[-2.0], [-1.0], [1.0], [2.0]];
        let y = [
            Movement::Flexion,
            Movement::Flexion,
            Movement::Extension,
            Movement::Extension,
        ];
        let params = Hyperparams::Tree(tree::TreeParams::default());
        let model = params.fit(x.view(), &y, 0).unwrap();
        assert_eq!(model.family(), ModelFamily::DecisionTree);
        assert_eq!(model.n_features(), 1);
        assert_eq!(accuracy(&y, &model.predict(x.view())), 1.0);
    }
}
