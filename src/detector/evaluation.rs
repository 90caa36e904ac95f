//! Diagnostic metrics against ground-truth labels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Binary classification metrics, the anomalous class being positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// `[[tn, fp], [fn, tp]]`
    pub confusion_matrix: [[usize; 2]; 2],
    pub support_normal: usize,
    pub support_anomalous: usize,
    /// Printable per-class table
    pub classification_report: String,
}

#[derive(Debug, Clone, Copy)]
struct ClassScores {
    precision: f64,
    recall: f64,
    f1: f64,
    support: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

impl EvaluationReport {
    /// Build from `(truth, predicted)` pairs
    pub fn from_pairs(pairs: &[(bool, bool)]) -> Self {
        let mut matrix = [[0usize; 2]; 2];
        for &(truth, predicted) in pairs {
            matrix[truth as usize][predicted as usize] += 1;
        }
        let [[tn, fp], [fn_, tp]] = matrix;

        let class = |tp: usize, fp: usize, fn_: usize| {
            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_);
            ClassScores {
                precision,
                recall,
                f1: f1(precision, recall),
                support: tp + fn_,
            }
        };
        // normal-class scores swap the roles of the two error cells
        let normal = class(tn, fn_, fp);
        let anomalous = class(tp, fp, fn_);
        let total = pairs.len();
        let accuracy = ratio(tp + tn, total);

        Self {
            accuracy,
            precision: anomalous.precision,
            recall: anomalous.recall,
            f1_score: anomalous.f1,
            confusion_matrix: matrix,
            support_normal: normal.support,
            support_anomalous: anomalous.support,
            classification_report: render(normal, anomalous, accuracy, total),
        }
    }

    pub fn total(&self) -> usize {
        self.support_normal + self.support_anomalous
    }

    pub fn true_positives(&self) -> usize {
        self.confusion_matrix[1][1]
    }

    pub fn false_positives(&self) -> usize {
        self.confusion_matrix[0][1]
    }

    pub fn false_negatives(&self) -> usize {
        self.confusion_matrix[1][0]
    }

    pub fn true_negatives(&self) -> usize {
        self.confusion_matrix[0][0]
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.classification_report)
    }
}

fn render(normal: ClassScores, anomalous: ClassScores, accuracy: f64, total: usize) -> String {
    let mut out = format!(
        "{:>12} {:>10} {:>9} {:>9} {:>9}\n\n",
        "", "precision", "recall", "f1-score", "support"
    );
    for (name, s) in [("False", normal), ("True", anomalous)] {
        out.push_str(&format!(
            "{:>12} {:>10.2} {:>9.2} {:>9.2} {:>9}\n",
            name, s.precision, s.recall, s.f1, s.support
        ));
    }
    out.push('\n');
    out.push_str(&format!(
        "{:>12} {:>10} {:>9} {:>9.2} {:>9}\n",
        "accuracy", "", "", accuracy, total
    ));

    let weight = |s: &ClassScores| ratio(s.support, total);
    let averages = [
        (
            "macro avg",
            [
                (normal.precision + anomalous.precision) / 2.0,
                (normal.recall + anomalous.recall) / 2.0,
                (normal.f1 + anomalous.f1) / 2.0,
            ],
        ),
        (
            "weighted avg",
            [
                normal.precision * weight(&normal) + anomalous.precision * weight(&anomalous),
                normal.recall * weight(&normal) + anomalous.recall * weight(&anomalous),
                normal.f1 * weight(&normal) + anomalous.f1 * weight(&anomalous),
            ],
        ),
    ];
    for (name, [precision, recall, f1]) in averages {
        out.push_str(&format!(
            "{:>12} {:>10.2} {:>9.2} {:>9.2} {:>9}\n",
            name, precision, recall, f1, total
        ));
    }
    out
}
