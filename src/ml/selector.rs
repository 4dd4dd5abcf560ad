// src/ml/selector.rs
// 模型选择：每个模型族做网格搜索，最佳参数在完整训练集上重训，再在测试集上打分
use ndarray::Array2;
use serde::Serialize;

use super::search::{grid_search, stratified_folds};
use super::{accuracy, Classifier, FittedModel, Hyperparams, ModelFamily, StandardScaler};
use crate::config::TrainerConfig;
use crate::error::{FamilyFailure, PipelineError};
use crate::split::Split;
use crate::types::Movement;

/// Weight of the cross-validation mean in the ranking score; the held-out
/// accuracy takes the rest.
pub const CV_WEIGHT: f64 = 0.5;

/// A family that trained successfully.
#[derive(Clone, Debug)]
pub struct FamilyResult {
    pub family: ModelFamily,
    pub best_params: Hyperparams,
    pub cv_mean: f64,
    pub cv_std: f64,
    pub test_accuracy: f64,
    pub predictions: Vec<Movement>,
    pub candidates_evaluated: usize,
    pub model: FittedModel,
}

impl FamilyResult {
    /// `0.5 * cv_mean + 0.5 * test_accuracy`
    pub fn score(&self) -> f64 {
        CV_WEIGHT * self.cv_mean + (1.0 - CV_WEIGHT) * self.test_accuracy
    }
}

#[derive(Clone, Debug)]
pub struct SelectionResult {
    /// Successful families in enumeration order.
    pub results: Vec<FamilyResult>,
    pub failures: Vec<FamilyFailure>,
    pub winner: ModelFamily,
    /// Fitted on the train partition; apply it to any new rows before `predict`.
    pub scaler: StandardScaler,
    /// Test partition labels the predictions are scored against.
    pub test_labels: Vec<Movement>,
}

impl SelectionResult {
    pub fn winner_result(&self) -> Option<&FamilyResult> {
        self.results.iter().find(|r| r.family == self.winner)
    }

    pub fn result(&self, family: ModelFamily) -> Option<&FamilyResult> {
        self.results.iter().find(|r| r.family == family)
    }
}

/// Highest blended score; ties stay with the earlier family.
pub fn pick_winner(results: &[FamilyResult]) -> Option<ModelFamily> {
    let mut best: Option<&FamilyResult> = None;
    for result in results {
        if best.map_or(true, |b| result.score() > b.score()) {
            best = Some(result);
        }
    }
    best.map(|r| r.family)
}

/// Per-family score shape used for JSON summaries.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FamilyScore {
    pub family: ModelFamily,
    pub best_params: Hyperparams,
    pub cv_mean: f64,
    pub cv_std: f64,
    pub test_accuracy: f64,
    pub score: f64,
}

impl From<&FamilyResult> for FamilyScore {
    fn from(r: &FamilyResult) -> Self {
        Self {
            family: r.family,
            best_params: r.best_params.clone(),
            cv_mean: r.cv_mean,
            cv_std: r.cv_std,
            test_accuracy: r.test_accuracy,
            score: r.score(),
        }
    }
}

pub struct Selector {
    config: TrainerConfig,
}

impl Selector {
    pub fn new(config: &TrainerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn run(&self, split: &Split) -> Result<SelectionResult, PipelineError> {
        let (scaler, x_train) = StandardScaler::fit_transform(split.train.features.view())
            .map_err(|e| PipelineError::InvalidSplit(format!("train partition: {e}")))?;
        let x_test = scaler
            .transform(split.test.features.view())
            .map_err(|e| PipelineError::InvalidSplit(format!("test partition: {e}")))?;
        let y_train = &split.train.labels;
        let y_test = &split.test.labels;

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (family, candidates) in self.config.families() {
            match self.train_family(family, &candidates, &x_train, y_train, &x_test, y_test) {
                Ok(result) => {
                    log::info!(
                        "{family}: cv {:.4} ± {:.4}, test {:.4}, best {}",
                        result.cv_mean,
                        result.cv_std,
                        result.test_accuracy,
                        result.best_params
                    );
                    results.push(result);
                }
                Err(failure) => {
                    log::warn!("{failure}");
                    failures.push(failure);
                }
            }
        }

        let winner = match pick_winner(&results) {
            Some(family) => family,
            None => return Err(PipelineError::AllFamiliesFailed { failures }),
        };
        log::info!("winner: {winner}");
        Ok(SelectionResult {
            results,
            failures,
            winner,
            scaler,
            test_labels: y_test.clone(),
        })
    }

    fn train_family(
        &self,
        family: ModelFamily,
        candidates: &[Hyperparams],
        x_train: &Array2<f64>,
        y_train: &[Movement],
        x_test: &Array2<f64>,
        y_test: &[Movement],
    ) -> Result<FamilyResult, FamilyFailure> {
        let fail = |reason: String| FamilyFailure { family, reason };
        let seed = self.config.random_seed;
        let folds = stratified_folds(y_train, self.config.cv_folds).map_err(|e| fail(e.to_string()))?;
        let outcome = grid_search(family, candidates, x_train.view(), y_train, &folds, seed)?;

        let model = outcome
            .best_params
            .fit(x_train.view(), y_train, seed)
            .map_err(|e| fail(format!("refit of {}: {e}", outcome.best_params)))?;
        let predictions = model.predict(x_test.view());
        Ok(FamilyResult {
            family,
            test_accuracy: accuracy(y_test, &predictions),
            best_params: outcome.best_params,
            cv_mean: outcome.cv_mean,
            cv_std: outcome.cv_std,
            predictions,
            candidates_evaluated: outcome.candidates_evaluated,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SvmGrid, TreeGrid};
    use crate::dataset::Dataset;
    use crate::features::{FeatureSchema, FeatureVector};
    use crate::ml::svm::Kernel;
    use crate::ml::tree::TreeParams;
    use crate::split::SplitPolicy;
    use crate::types::SubjectKey;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn result(family: ModelFamily, cv_mean: f64, test_accuracy: f64) -> FamilyResult {
        let x = ndarray::array![[0.0], [1.0]];
        let y = [Movement::Flexion, Movement::Extension];
        FamilyResult {
            family,
            best_params: Hyperparams::Tree(TreeParams::default()),
            cv_mean,
            cv_std: 0.0,
            test_accuracy,
            predictions: Vec::new(),
            candidates_evaluated: 1,
            model: Hyperparams::Tree(TreeParams::default())
                .fit(x.view(), &y, 0)
                .unwrap(),
        }
    }

    #[test]
    fn winner_maximizes_the_blended_score() {
        let results = vec![
            result(ModelFamily::DecisionTree, 0.9, 0.6),
            result(ModelFamily::Svm, 0.7, 0.9),
            result(ModelFamily::NeuralNetwork, 0.8, 0.7),
        ];
        assert!((results[1].score() - 0.8).abs() < 1e-12);
        assert_eq!(pick_winner(&results), Some(ModelFamily::Svm));
    }

    #[test]
    fn ties_go_to_the_earlier_family() {
        let results = vec![
            result(ModelFamily::DecisionTree, 0.75, 0.75),
            result(ModelFamily::Svm, 0.5, 1.0),
        ];
        assert_eq!(pick_winner(&results), Some(ModelFamily::DecisionTree));
        assert_eq!(pick_winner(&[]), None);
    }

    fn blob_split() -> Split {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let rows = (0..40)
            .map(|i| {
                let movement = if i % 2 == 0 {
                    Movement::Flexion
                } else {
                    Movement::Extension
                };
                let centre = if movement == Movement::Flexion { -2.0 } else { 2.0 };
                FeatureVector {
                    subject: SubjectKey::Id((i % 8 + 1) as u64),
                    movement,
                    values: (0..18).map(|_| centre + rng.gen_range(-0.5..0.5)).collect(),
                }
            })
            .collect();
        let dataset = Dataset::new(FeatureSchema::new(4), rows).unwrap();
        Split::new(
            &dataset,
            &SplitPolicy::Automatic {
                test_fraction: 0.25,
                seed: 42,
            },
        )
        .unwrap()
    }

    #[test]
    fn selector_trains_each_configured_family() {
        let config = TrainerConfig {
            cv_folds: 3,
            random_seed: 42,
            decision_tree: Some(TreeGrid {
                max_depth: vec![Some(2), Some(3)],
                min_samples_split: vec![2],
                min_samples_leaf: vec![1],
                ..TreeGrid::default()
            }),
            svm: Some(SvmGrid {
                c: vec![1.0],
                kernel: vec![Kernel::Linear],
                ..SvmGrid::default()
            }),
            neural_network: None,
        };
        let split = blob_split();
        let selection = Selector::new(&config).run(&split).unwrap();
        assert_eq!(selection.results.len(), 2);
        assert!(selection.failures.is_empty());
        for r in &selection.results {
            assert_eq!(r.predictions.len(), split.test.len());
            assert!(r.test_accuracy > 0.9, "{} scored {}", r.family, r.test_accuracy);
        }
        assert_eq!(selection.results[0].candidates_evaluated, 8);
        assert_eq!(selection.winner, pick_winner(&selection.results).unwrap());
        assert_eq!(selection.scaler.n_features(), 18);
    }

    #[test]
    fn failed_family_is_reported_and_skipped() {
        let config = TrainerConfig {
            cv_folds: 3,
            random_seed: 42,
            decision_tree: Some(TreeGrid {
                max_depth: vec![Some(2)],
                min_samples_split: vec![2],
                min_samples_leaf: vec![1],
                ..TreeGrid::default()
            }),
            svm: Some(SvmGrid {
                c: vec![-1.0],
                ..SvmGrid::default()
            }),
            neural_network: None,
        };
        let selection = Selector::new(&config).run(&blob_split()).unwrap();
        assert_eq!(selection.winner, ModelFamily::DecisionTree);
        assert_eq!(selection.failures.len(), 1);
        assert_eq!(selection.failures[0].family, ModelFamily::Svm);
    }

    #[test]
    fn every_family_failing_is_fatal() {
        let config = TrainerConfig {
            cv_folds: 3,
            random_seed: 42,
            decision_tree: None,
            svm: Some(SvmGrid {
                c: vec![0.0],
                ..SvmGrid::default()
            }),
            neural_network: None,
        };
        match Selector::new(&config).run(&blob_split()) {
            Err(PipelineError::AllFamiliesFailed { failures }) => assert_eq!(failures.len(), 1),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
