// src/ml/search.rs
// 网格搜索：分层 k 折交叉验证，按平均准确率挑选每个模型族的最佳超参数
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;

use super::{accuracy, class_counts, Classifier, Hyperparams, ModelError, ModelFamily};
use crate::error::FamilyFailure;
use crate::types::Movement;

/// Row indices of one cross-validation round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Stratified k-fold without shuffling.
///
/// Rows are dealt to folds the way a class-sorted round robin would deal
/// them: fold `i` receives positions `i, i + k, i + 2k, ...` of the labels
/// sorted by class, and each class fills its share with its own rows in
/// order. A class with fewer than `k` rows only reaches the first folds; that
/// is allowed (with a warning) as long as some class has at least `k` rows.
pub fn stratified_folds(labels: &[Movement], k: usize) -> Result<Vec<Fold>, ModelError> {
    if k < 2 {
        return Err(ModelError::InvalidParams(format!(
            "cross-validation needs at least 2 folds, got {k}"
        )));
    }
    let counts = class_counts(labels);
    let present: Vec<Movement> = Movement::ORDER
        .into_iter()
        .filter(|m| counts[m.index()] > 0)
        .collect();
    if present.iter().all(|m| counts[m.index()] < k) {
        return Err(ModelError::InvalidParams(format!(
            "{k} folds need at least one class with {k} training rows, got {:?}",
            counts
        )));
    }
    for m in &present {
        if counts[m.index()] < k {
            log::warn!(
                "class {m} has {} training rows, fewer than {k} folds",
                counts[m.index()]
            );
        }
    }

    let mut allocation = vec![[0usize; 2]; k];
    let mut position = 0;
    for class in Movement::ORDER {
        for _ in 0..counts[class.index()] {
            allocation[position % k][class.index()] += 1;
            position += 1;
        }
    }

    let mut fold_of = vec![0usize; labels.len()];
    for class in present {
        let mut members = (0..labels.len()).filter(|&i| labels[i] == class);
        for (fold, share) in allocation.iter().enumerate() {
            for row in members.by_ref().take(share[class.index()]) {
                fold_of[row] = fold;
            }
        }
    }
    Ok((0..k)
        .map(|fold| {
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&i| fold_of[i] == fold);
            Fold { train, validation }
        })
        .collect())
}

/// Cross-validated accuracy of one candidate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CandidateScore {
    pub params: Hyperparams,
    pub fold_accuracies: Vec<f64>,
    pub mean: f64,
    pub std: f64,
}

/// Best candidate of a family's grid.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub family: ModelFamily,
    pub best_params: Hyperparams,
    pub cv_mean: f64,
    pub cv_std: f64,
    pub candidates_evaluated: usize,
    /// Candidates skipped because a fold could not be fit.
    pub candidates_failed: usize,
}

fn score_candidate(
    params: &Hyperparams,
    x: ArrayView2<f64>,
    y: &[Movement],
    folds: &[Fold],
    seed: u64,
) -> Result<CandidateScore, ModelError> {
    let mut fold_accuracies = Vec::with_capacity(folds.len());
    for fold in folds {
        let x_train = x.select(Axis(0), &fold.train);
        let y_train: Vec<Movement> = fold.train.iter().map(|&i| y[i]).collect();
        let model = params.fit(x_train.view(), &y_train, seed)?;

        let x_val = x.select(Axis(0), &fold.validation);
        let y_val: Vec<Movement> = fold.validation.iter().map(|&i| y[i]).collect();
        fold_accuracies.push(accuracy(&y_val, &model.predict(x_val.view())));
    }
    let n = fold_accuracies.len().max(1) as f64;
    let mean = fold_accuracies.iter().sum::<f64>() / n;
    let std = (fold_accuracies.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n).sqrt();
    Ok(CandidateScore {
        params: params.clone(),
        fold_accuracies,
        mean,
        std,
    })
}

/// Scores every candidate on the same folds and keeps the highest mean
/// accuracy; the earliest candidate wins ties. A candidate with a fold that
/// cannot be fit is skipped; the family fails only when every candidate does.
pub fn grid_search(
    family: ModelFamily,
    candidates: &[Hyperparams],
    x: ArrayView2<f64>,
    y: &[Movement],
    folds: &[Fold],
    seed: u64,
) -> Result<SearchOutcome, FamilyFailure> {
    let fail = |reason: String| FamilyFailure { family, reason };
    if candidates.is_empty() {
        return Err(fail("empty hyperparameter grid".into()));
    }
    if folds.is_empty() {
        return Err(fail("no cross-validation folds".into()));
    }

    let scores: Vec<Result<CandidateScore, ModelError>> = candidates
        .par_iter()
        .map(|params| score_candidate(params, x, y, folds, seed))
        .collect();

    let mut best: Option<CandidateScore> = None;
    let mut failed = Vec::new();
    for (i, score) in scores.into_iter().enumerate() {
        let score = match score {
            Ok(score) => score,
            Err(e) => {
                let reason = format!("candidate {i} ({}): {e}", candidates[i]);
                log::warn!("{family}: skipping {reason}");
                failed.push(reason);
                continue;
            }
        };
        log::debug!(
            "{family}: {} -> cv {:.4} ± {:.4}",
            score.params,
            score.mean,
            score.std
        );
        if best.as_ref().map_or(true, |b| score.mean > b.mean) {
            best = Some(score);
        }
    }
    let best = best.ok_or_else(|| fail(format!("every candidate failed: {}", failed.join("; "))))?;
    Ok(SearchOutcome {
        family,
        best_params: best.params,
        cv_mean: best.mean,
        cv_std: best.std,
        candidates_evaluated: candidates.len(),
        candidates_failed: failed.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::svm::{Kernel, SvmParams};
    use crate::ml::tree::TreeParams;
    use ndarray::Array2;
    use std::collections::BTreeSet;

    fn labels(flexion: usize, extension: usize) -> Vec<Movement> {
        let mut y = vec![Movement::Flexion; flexion];
        y.extend(vec![Movement::Extension; extension]);
        y
    }

    // Two separable clusters along column 0; column 1 is constant.
    fn clusters(n: usize) -> (Array2<f64>, Vec<Movement>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                if i < n / 2 { -1.0 - i as f64 * 0.01 } else { 1.0 + i as f64 * 0.01 }
            } else {
                0.5
            }
        });
        (x, labels(n / 2, n / 2))
    }

    #[test]
    fn folds_are_disjoint_and_cover_every_row() {
        let y = labels(13, 9);
        let folds = stratified_folds(&y, 5).unwrap();
        assert_eq!(folds.len(), 5);
        let mut seen = BTreeSet::new();
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.validation.len(), y.len());
            for &i in &fold.validation {
                assert!(seen.insert(i), "row {i} validated twice");
                assert!(!fold.train.contains(&i));
            }
        }
        assert_eq!(seen.len(), y.len());
    }

    #[test]
    fn folds_keep_class_proportions() {
        let y = labels(13, 9);
        let folds = stratified_folds(&y, 5).unwrap();
        let flexion: Vec<usize> = folds
            .iter()
            .map(|f| f.validation.iter().filter(|&&i| y[i] == Movement::Flexion).count())
            .collect();
        assert_eq!(flexion, vec![3, 3, 3, 2, 2]);
        // No shuffling: the first fold starts at the first row of each class.
        assert_eq!(folds[0].validation, vec![0, 1, 2, 13, 14]);
    }

    #[test]
    fn too_few_rows_for_the_fold_count() {
        assert!(stratified_folds(&labels(3, 4), 5).is_err());
        assert!(stratified_folds(&labels(3, 3), 1).is_err());
    }

    #[test]
    fn short_class_is_dealt_over_the_first_folds() {
        let y = labels(4, 6);
        let folds = stratified_folds(&y, 5).unwrap();
        let flexion: Vec<usize> = folds
            .iter()
            .map(|f| f.validation.iter().filter(|&&i| y[i] == Movement::Flexion).count())
            .collect();
        assert_eq!(flexion, vec![1, 1, 1, 1, 0]);
        assert_eq!(folds[4].validation, vec![8, 9]);
        for fold in &folds {
            assert!(!fold.validation.is_empty());
            let train: Vec<Movement> = fold.train.iter().map(|&i| y[i]).collect();
            assert!(train.contains(&Movement::Flexion) && train.contains(&Movement::Extension));
        }
    }

    #[test]
    fn search_prefers_the_better_candidate() {
        let (x, y) = clusters(20);
        let folds = stratified_folds(&y, 5).unwrap();
        let candidates = vec![
            Hyperparams::Tree(TreeParams {
                max_depth: Some(1),
                ..TreeParams::default()
            }),
            Hyperparams::Svm(SvmParams {
                kernel: Kernel::Linear,
                ..SvmParams::default()
            }),
        ];
        let outcome =
            grid_search(ModelFamily::DecisionTree, &candidates, x.view(), &y, &folds, 42).unwrap();
        // Both reach 1.0; the first candidate keeps the tie.
        assert_eq!(outcome.cv_mean, 1.0);
        assert_eq!(outcome.cv_std, 0.0);
        assert_eq!(outcome.best_params, candidates[0]);
        assert_eq!(outcome.candidates_evaluated, 2);
    }

    #[test]
    fn failing_candidate_is_skipped() {
        let (x, y) = clusters(20);
        let folds = stratified_folds(&y, 5).unwrap();
        let good = Hyperparams::Svm(SvmParams {
            c: 1.0,
            kernel: Kernel::Linear,
            ..SvmParams::default()
        });
        let bad = Hyperparams::Svm(SvmParams {
            c: 0.0,
            ..SvmParams::default()
        });
        let outcome = grid_search(
            ModelFamily::Svm,
            &[bad, good.clone()],
            x.view(),
            &y,
            &folds,
            0,
        )
        .unwrap();
        assert_eq!(outcome.best_params, good);
        assert_eq!(outcome.cv_mean, 1.0);
        assert_eq!(outcome.candidates_evaluated, 2);
        assert_eq!(outcome.candidates_failed, 1);
    }

    #[test]
    fn family_fails_only_when_every_candidate_does() {
        let (x, y) = clusters(10);
        let folds = stratified_folds(&y, 5).unwrap();
        let candidates: Vec<Hyperparams> = [0.0, -1.0]
            .into_iter()
            .map(|c| {
                Hyperparams::Svm(SvmParams {
                    c,
                    ..SvmParams::default()
                })
            })
            .collect();
        let err = grid_search(ModelFamily::Svm, &candidates, x.view(), &y, &folds, 0).unwrap_err();
        assert_eq!(err.family, ModelFamily::Svm);
        assert!(err.reason.contains("candidate 0"));
        assert!(err.reason.contains("candidate 1"));
    }
}
