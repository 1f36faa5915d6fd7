//! Classification metrics for the binary phishing target.

use crate::error::MlError;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// F1, precision and recall for the positive class `1`. A zero denominator
/// scores `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetric {
    pub f1_score: f64,
    pub precision_score: f64,
    pub recall_score: f64,
}

/// Confusion counts for the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_negative: usize,
}

impl ConfusionCounts {
    pub fn tally(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let mut counts = Self::default();
        for (t, p) in y_true.iter().zip(y_pred.iter()) {
            match (*t == 1.0, *p == 1.0) {
                (true, true) => counts.true_positive += 1,
                (false, true) => counts.false_positive += 1,
                (true, false) => counts.false_negative += 1,
                (false, false) => counts.true_negative += 1,
            }
        }
        counts
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

pub fn get_classification_score(
    y_true: &Array1<f64>,
    y_pred: &Array1<f64>,
) -> Result<ClassificationMetric, MlError> {
    if y_true.len() != y_pred.len() {
        return Err(MlError::training(format!(
            "{} targets but {} predictions",
            y_true.len(),
            y_pred.len()
        )));
    }
    let c = ConfusionCounts::tally(y_true, y_pred);
    let precision = ratio(c.true_positive, c.true_positive + c.false_positive);
    let recall = ratio(c.true_positive, c.true_positive + c.false_negative);
    let f1 = ratio(
        2 * c.true_positive,
        2 * c.true_positive + c.false_positive + c.false_negative,
    );
    Ok(ClassificationMetric {
        f1_score: f1,
        precision_score: precision,
        recall_score: recall,
    })
}
