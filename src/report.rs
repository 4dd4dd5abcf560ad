// src/report.rs
// 结果报告：纯文本与 JSON 两种输出
use std::fmt;

use serde::Serialize;

use crate::error::{FamilyFailure, PipelineError};
use crate::metrics::Evaluation;
use crate::ml::selector::FamilyScore;
use crate::ml::{ModelFamily, SelectionResult};

const RULE: &str = "==================================================";

/// Plain-text results report for the winning family and every other one.
pub fn render_text(selection: &SelectionResult, evaluation: &Evaluation) -> String {
    TextReport {
        selection,
        evaluation,
    }
    .to_string()
}

struct TextReport<'a> {
    selection: &'a SelectionResult,
    evaluation: &'a Evaluation,
}

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let TextReport {
            selection,
            evaluation,
        } = *self;
        writeln!(out, "MODEL RESULTS REPORT")?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "Best model: {}", selection.winner)?;
        if let Some(best) = selection.winner_result() {
            writeln!(out, "Test accuracy: {:.4}", best.test_accuracy)?;
            writeln!(out, "Cross-validation: {:.4}", best.cv_mean)?;
            writeln!(out, "Selection score: {:.4}", best.score())?;
        }
        writeln!(out)?;
        writeln!(out, "Precision (weighted): {:.4}", evaluation.precision)?;
        writeln!(out, "Recall (weighted): {:.4}", evaluation.recall)?;
        writeln!(out, "F1-score (weighted): {:.4}", evaluation.f1)?;
        writeln!(out)?;
        writeln!(out, "Confusion matrix")?;
        writeln!(out, "{}", evaluation.confusion)?;
        writeln!(out)?;
        for tally in &evaluation.per_class {
            writeln!(
                out,
                "{:<10} correct {:>4}  incorrect {:>4}",
                tally.movement.label(),
                tally.correct,
                tally.incorrect
            )?;
        }
        writeln!(out)?;
        writeln!(out, "ALL MODELS")?;
        writeln!(out, "{RULE}")?;
        for r in &selection.results {
            writeln!(out, "{}:", r.family)?;
            writeln!(out, "  Test accuracy: {:.4}", r.test_accuracy)?;
            writeln!(out, "  CV: {:.4} ± {:.4}", r.cv_mean, r.cv_std)?;
            writeln!(out, "  Best parameters: {}", r.best_params)?;
        }
        if !selection.failures.is_empty() {
            writeln!(out)?;
            writeln!(out, "EXCLUDED MODELS")?;
            writeln!(out, "{RULE}")?;
            for failure in &selection.failures {
                writeln!(out, "{}: {}", failure.family, failure.reason)?;
            }
        }
        Ok(())
    }
}

/// JSON-friendly mirror of the text report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectionSummary {
    pub winner: ModelFamily,
    pub winner_score: f64,
    pub evaluation: Evaluation,
    pub families: Vec<FamilyScore>,
    pub failures: Vec<FamilyFailure>,
}

impl SelectionSummary {
    pub fn new(selection: &SelectionResult, evaluation: &Evaluation) -> Self {
        Self {
            winner: selection.winner,
            winner_score: selection.winner_result().map_or(0.0, |r| r.score()),
            evaluation: evaluation.clone(),
            families: selection.results.iter().map(FamilyScore::from).collect(),
            failures: selection.failures.clone(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::evaluate;
    use crate::ml::selector::FamilyResult;
    use crate::ml::tree::TreeParams;
    use crate::ml::{Hyperparams, StandardScaler};
    use crate::types::Movement::{Extension as E, Flexion as F};
    use ndarray::array;

    fn selection() -> SelectionResult {
        let x = array![[0.0], [1.0]];
        let params = Hyperparams::Tree(TreeParams::default());
        let model = params.fit(x.view(), &[F, E], 0).unwrap();
        SelectionResult {
            results: vec![FamilyResult {
                family: ModelFamily::DecisionTree,
                best_params: params,
                cv_mean: 0.9,
                cv_std: 0.05,
                test_accuracy: 0.75,
                predictions: vec![F, E, E, E],
                candidates_evaluated: 1,
                model,
            }],
            failures: vec![FamilyFailure {
                family: ModelFamily::Svm,
                reason: "C = 0 must be positive".into(),
            }],
            winner: ModelFamily::DecisionTree,
            scaler: StandardScaler::fit(x.view()).unwrap(),
            test_labels: vec![F, F, E, E],
        }
    }

    #[test]
    fn text_report_lists_winner_metrics_and_exclusions() {
        let selection = selection();
        let eval = evaluate(&selection.test_labels, &selection.results[0].predictions).unwrap();
        let text = render_text(&selection, &eval);
        assert!(text.contains("Best model: Decision Tree"));
        assert!(text.contains("Test accuracy: 0.7500"));
        assert!(text.contains("Selection score: 0.8250"));
        assert!(text.contains("F1-score (weighted): 0.7333"));
        assert!(text.contains("CV: 0.9000 ± 0.0500"));
        assert!(text.contains("SVM: C = 0 must be positive"));
    }

    #[test]
    fn text_report_without_exclusions_ends_with_the_model_list() {
        let mut selection = selection();
        selection.failures.clear();
        let eval = evaluate(&selection.test_labels, &selection.results[0].predictions).unwrap();
        let text = render_text(&selection, &eval);
        assert!(!text.contains("EXCLUDED MODELS"));
        assert!(text.starts_with("MODEL RESULTS REPORT\n"));
        assert!(text.ends_with('\n'));
        let last = text.lines().last().unwrap();
        assert!(last.starts_with("  Best parameters: criterion=Gini"), "{last}");
    }

    #[test]
    fn summary_serializes_to_json() {
        let selection = selection();
        let eval = evaluate(&selection.test_labels, &selection.results[0].predictions).unwrap();
        let json = SelectionSummary::new(&selection, &eval).to_json_pretty().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["winner"], "DecisionTree");
        assert_eq!(value["evaluation"]["confusion"]["counts"][0][1], 1);
        assert_eq!(value["families"][0]["best_params"]["family"], "tree");
        assert_eq!(value["failures"][0]["family"], "Svm");
    }
}
