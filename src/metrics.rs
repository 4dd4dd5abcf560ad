// src/metrics.rs
use std::fmt;

use serde::Serialize;

use crate::error::PipelineError;
use crate::types::{normalize_label, Movement};

/// 2×2 counts; rows are the actual class, columns the predicted class, both
/// in [`Movement::ORDER`] (Flexion, Extension).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_labels(truth: &[Movement], predicted: &[Movement]) -> Self {
        let mut counts = [[0; 2]; 2];
        for (t, p) in truth.iter().zip(predicted) {
            counts[t.index()][p.index()] += 1;
        }
        Self { counts }
    }

    pub fn get(&self, actual: Movement, predicted: Movement) -> usize {
        self.counts[actual.index()][predicted.index()]
    }

    /// Rows whose actual class is `class`.
    pub fn support(&self, class: Movement) -> usize {
        self.counts[class.index()].iter().sum()
    }

    /// Rows predicted as `class`.
    pub fn predicted(&self, class: Movement) -> usize {
        self.counts.iter().map(|row| row[class.index()]).sum()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>12}", "actual \\ pred")?;
        for m in Movement::ORDER {
            write!(f, " {:>10}", m.label())?;
        }
        for actual in Movement::ORDER {
            write!(f, "\n{:>12}", actual.label())?;
            for predicted in Movement::ORDER {
                write!(f, " {:>10}", self.get(actual, predicted))?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ClassTally {
    pub movement: Movement,
    pub correct: usize,
    pub incorrect: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Evaluation {
    pub accuracy: f64,
    /// Support-weighted over both classes; a class with no predictions
    /// contributes zero precision.
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub confusion: ConfusionMatrix,
    pub per_class: Vec<ClassTally>,
}

impl Evaluation {
    pub fn tally(&self, movement: Movement) -> Option<&ClassTally> {
        self.per_class.iter().find(|t| t.movement == movement)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn evaluate(truth: &[Movement], predicted: &[Movement]) -> Result<Evaluation, PipelineError> {
    if truth.len() != predicted.len() {
        return Err(PipelineError::LengthMismatch {
            expected: truth.len(),
            actual: predicted.len(),
        });
    }
    if truth.is_empty() {
        return Err(PipelineError::EmptyInput("label set"));
    }
    let confusion = ConfusionMatrix::from_labels(truth, predicted);
    let total = confusion.total();

    let mut precision = 0.0;
    let mut recall = 0.0;
    let mut f1 = 0.0;
    let mut per_class = Vec::with_capacity(Movement::ORDER.len());
    for class in Movement::ORDER {
        let tp = confusion.get(class, class);
        let support = confusion.support(class);
        let p = ratio(tp, confusion.predicted(class));
        let r = ratio(tp, support);
        let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
        let weight = ratio(support, total);
        precision += weight * p;
        recall += weight * r;
        f1 += weight * f;
        per_class.push(ClassTally {
            movement: class,
            correct: tp,
            incorrect: support - tp,
        });
    }

    let correct: usize = Movement::ORDER.iter().map(|&m| confusion.get(m, m)).sum();
    Ok(Evaluation {
        accuracy: ratio(correct, total),
        precision,
        recall,
        f1,
        confusion,
        per_class,
    })
}

/// [`evaluate`] over free-form labels. Every label is normalized first; the
/// first unrecognized one aborts with [`PipelineError::UnrecognizedClassLabel`].
pub fn evaluate_labels<S: AsRef<str>>(
    truth: &[S],
    predicted: &[S],
) -> Result<Evaluation, PipelineError> {
    let parse = |labels: &[S]| -> Result<Vec<Movement>, PipelineError> {
        labels.iter().map(|l| normalize_label(l.as_ref())).collect()
    };
    evaluate(&parse(truth)?, &parse(predicted)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Movement::{Extension as E, Flexion as F};

    #[test]
    fn reference_case() {
        let eval = evaluate(&[F, F, E, E], &[F, E, E, E]).unwrap();
        assert!((eval.accuracy - 0.75).abs() < 1e-12);
        assert_eq!(eval.confusion.counts, [[1, 1], [0, 2]]);
        assert!((eval.precision - 5.0 / 6.0).abs() < 1e-9);
        assert!((eval.recall - 0.75).abs() < 1e-9);
        assert!((eval.f1 - 11.0 / 15.0).abs() < 1e-9);
        let flexion = eval.tally(F).unwrap();
        assert_eq!((flexion.correct, flexion.incorrect), (1, 1));
        let extension = eval.tally(E).unwrap();
        assert_eq!((extension.correct, extension.incorrect), (2, 0));
    }

    #[test]
    fn class_never_predicted_scores_zero_precision() {
        let eval = evaluate(&[F, E], &[F, F]).unwrap();
        // F: p = 0.5, r = 1; E: p = 0, r = 0.
        assert!((eval.precision - 0.25).abs() < 1e-12);
        assert!((eval.recall - 0.5).abs() < 1e-12);
    }

    #[test]
    fn string_labels_are_normalized() {
        let eval = evaluate_labels(&["FLX", "flexion", "Flexión", "ext"], &["13", "F", "flex", "14"])
            .unwrap();
        assert_eq!(eval.accuracy, 1.0);
        assert_eq!(eval.confusion.counts, [[3, 0], [0, 1]]);
    }

    #[test]
    fn unknown_label_is_fatal() {
        match evaluate_labels(&["flx", "unknown"], &["flx", "ext"]) {
            Err(PipelineError::UnrecognizedClassLabel { label }) => assert_eq!(label, "unknown"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn mismatched_lengths_and_empty_input() {
        assert!(matches!(
            evaluate(&[F], &[F, E]),
            Err(PipelineError::LengthMismatch { expected: 1, actual: 2 })
        ));
        assert!(matches!(evaluate(&[], &[]), Err(PipelineError::EmptyInput(_))));
    }

    #[test]
    fn matrix_renders_in_declared_order() {
        let text = ConfusionMatrix::from_labels(&[F, E], &[E, E]).to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].trim_start().starts_with("Flexion"));
        assert!(lines[2].trim_start().starts_with("Extension"));
    }
}
