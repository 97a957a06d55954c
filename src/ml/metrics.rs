//! Evaluation metrics for binary classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A metric could not be computed for the given inputs.
#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("cannot compute metrics on an empty holdout")]
    Empty,
    #[error("{labels} labels but {predictions} predictions")]
    LengthMismatch { labels: usize, predictions: usize },
    #[error("AUC is undefined: holdout labels contain only class {0}")]
    SingleClass(u8),
    #[error("label {0} is not 0 or 1")]
    InvalidLabel(u8),
    #[error("score at position {0} is not finite")]
    NonFiniteScore(usize),
}

#[derive(Debug, Clone)]
/// Confusion matrix for a `K`-class classifier.
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Build a binary matrix from aligned truth and predicted labels.
    pub fn from_binary(truth: &[u8], predicted: &[u8]) -> Result<Self, MetricError> {
        check_lengths(truth.len(), predicted.len())?;
        let mut cm = Self::new(2);
        for (&t, &p) in truth.iter().zip(predicted) {
            for label in [t, p] {
                if label > 1 {
                    return Err(MetricError::InvalidLabel(label));
                }
            }
            cm.add(usize::from(t), usize::from(p));
        }
        Ok(cm)
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    /// Total number of recorded examples.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&v| u64::from(v)).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Precision/recall statistics for a single class.
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f64,
    /// `TP / (TP + FN)`.
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
    /// Total number of true examples for the class.
    pub support: u32,
}

/// Compute per-class precision, recall and F1 from a confusion matrix.
///
/// A zero denominator yields `0.0` for that statistic.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    let mut stats = Vec::with_capacity(k);
    for class_idx in 0..k {
        let tp = f64::from(cm.get(class_idx, class_idx));
        let mut fp = 0f64;
        let mut fn_ = 0f64;
        let mut support = 0u32;
        for j in 0..k {
            let v = cm.get(class_idx, j);
            support = support.saturating_add(v);
            if j != class_idx {
                fn_ += f64::from(v);
            }
        }
        for i in 0..k {
            if i != class_idx {
                fp += f64::from(cm.get(i, class_idx));
            }
        }
        let precision = if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) };
        let recall = if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) };
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        stats.push(PerClassStats {
            precision,
            recall,
            f1,
            support,
        });
    }
    stats
}

/// Compute overall accuracy from a confusion matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f64 {
    let mut correct = 0u64;
    for class_idx in 0..cm.n_classes {
        correct += u64::from(cm.get(class_idx, class_idx));
    }
    let total = cm.total();
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

/// Per-class F1 averaged with each class weighted by its support.
pub fn f1_weighted(cm: &ConfusionMatrix) -> f64 {
    let stats = precision_recall_by_class(cm);
    let total_support: u64 = stats.iter().map(|s| u64::from(s.support)).sum();
    if total_support == 0 {
        return 0.0;
    }
    stats
        .iter()
        .map(|s| s.f1 * f64::from(s.support))
        .sum::<f64>()
        / total_support as f64
}

/// Area under the ROC curve of `scores` against binary `labels`.
///
/// Scores are ranked descending; tied scores move the curve in a single
/// diagonal step, and the area is summed with the trapezoidal rule. Hard
/// `{0, 1}` predictions are valid scores and give a three-point curve.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Result<f64, MetricError> {
    check_lengths(labels.len(), scores.len())?;
    let mut positives = 0u64;
    let mut negatives = 0u64;
    for &label in labels {
        match label {
            0 => negatives += 1,
            1 => positives += 1,
            other => return Err(MetricError::InvalidLabel(other)),
        }
    }
    if positives == 0 {
        return Err(MetricError::SingleClass(0));
    }
    if negatives == 0 {
        return Err(MetricError::SingleClass(1));
    }
    if let Some(idx) = scores.iter().position(|s| !s.is_finite()) {
        return Err(MetricError::NonFiniteScore(idx));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut area = 0f64;
    let (mut tp, mut fp) = (0u64, 0u64);
    let (mut prev_tp, mut prev_fp) = (0u64, 0u64);
    let mut pos = 0usize;
    while pos < order.len() {
        let threshold = scores[order[pos]];
        while pos < order.len() && scores[order[pos]] == threshold {
            if labels[order[pos]] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            pos += 1;
        }
        area += (fp - prev_fp) as f64 * (tp + prev_tp) as f64 / 2.0;
        prev_tp = tp;
        prev_fp = fp;
    }
    Ok(area / (positives as f64 * negatives as f64))
}

fn check_lengths(labels: usize, predictions: usize) -> Result<(), MetricError> {
    if labels != predictions {
        return Err(MetricError::LengthMismatch {
            labels,
            predictions,
        });
    }
    if labels == 0 {
        return Err(MetricError::Empty);
    }
    Ok(())
}

/// The three holdout metrics reported for a training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub accuracy: f64,
    pub f1_weighted: f64,
    pub auc: f64,
}

impl MetricsRecord {
    pub const ACCURACY: &'static str = "Accuracy";
    pub const F1_SCORE: &'static str = "F1 score";
    pub const AUC: &'static str = "AUC";

    /// Evaluate rounded predictions against the holdout labels.
    ///
    /// AUC deliberately uses the rounded labels as scores rather than
    /// probabilities so results stay comparable with historical runs.
    pub fn from_hard_predictions(truth: &[u8], predicted: &[u8]) -> Result<Self, MetricError> {
        let cm = ConfusionMatrix::from_binary(truth, predicted)?;
        let scores: Vec<f64> = predicted.iter().map(|&p| f64::from(p)).collect();
        let auc = roc_auc(truth, &scores)?;
        Ok(Self {
            accuracy: accuracy(&cm),
            f1_weighted: f1_weighted(&cm),
            auc,
        })
    }

    /// Named values in reporting order.
    pub fn entries(&self) -> [(&'static str, f64); 3] {
        [
            (Self::ACCURACY, self.accuracy),
            (Self::F1_SCORE, self.f1_weighted),
            (Self::AUC, self.auc),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn accuracy_is_exact_fraction() {
        let truth = [1, 1, 0, 1, 0, 1, 1];
        let predicted = [1, 0, 0, 1, 1, 1, 1];
        let cm = ConfusionMatrix::from_binary(&truth, &predicted).unwrap();
        assert_eq!(accuracy(&cm), 5.0 / 7.0);
        assert_eq!(cm.get(1, 0), 1);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.total(), 7);
    }

    #[test]
    fn weighted_f1_matches_reference_values() {
        // class 0: p = 1/2, r = 1/2, f1 = 1/2, support 2
        // class 1: p = 4/5, r = 4/5, f1 = 4/5, support 5
        let truth = [1, 1, 0, 1, 0, 1, 1];
        let predicted = [1, 0, 0, 1, 1, 1, 1];
        let cm = ConfusionMatrix::from_binary(&truth, &predicted).unwrap();
        let stats = precision_recall_by_class(&cm);
        assert!(close(stats[0].f1, 0.5));
        assert!(close(stats[1].f1, 0.8));
        assert!(close(f1_weighted(&cm), (0.5 * 2.0 + 0.8 * 5.0) / 7.0));
    }

    #[test]
    fn weighted_f1_handles_missing_predictions_of_a_class() {
        let cm = ConfusionMatrix::from_binary(&[0, 1, 1, 1], &[1, 1, 1, 1]).unwrap();
        let stats = precision_recall_by_class(&cm);
        assert_eq!(stats[0].precision, 0.0);
        assert_eq!(stats[0].f1, 0.0);
        assert!(close(f1_weighted(&cm), 3.0 * (2.0 * 0.75 / 1.75) / 4.0));
    }

    #[test]
    fn auc_of_hard_labels_is_balanced_accuracy() {
        let truth = [1, 1, 0, 1, 0, 1, 1];
        let predicted = [1, 0, 0, 1, 1, 1, 1];
        let scores: Vec<f64> = predicted.iter().map(|&p| f64::from(p)).collect();
        let auc = roc_auc(&truth, &scores).unwrap();
        // (TPR + TNR) / 2 = (4/5 + 1/2) / 2
        assert!(close(auc, 0.65));
    }

    #[test]
    fn auc_ranks_continuous_scores() {
        let labels = [0, 0, 1, 1];
        assert!(close(roc_auc(&labels, &[0.1, 0.4, 0.35, 0.8]).unwrap(), 0.75));
        assert!(close(roc_auc(&labels, &[0.1, 0.2, 0.3, 0.4]).unwrap(), 1.0));
        assert!(close(roc_auc(&labels, &[0.5, 0.5, 0.5, 0.5]).unwrap(), 0.5));
    }

    #[test]
    fn auc_fails_loudly_for_single_class() {
        assert_eq!(
            roc_auc(&[1, 1, 1], &[1.0, 0.0, 1.0]).unwrap_err(),
            MetricError::SingleClass(1)
        );
        assert_eq!(
            MetricsRecord::from_hard_predictions(&[0, 0], &[0, 1]).unwrap_err(),
            MetricError::SingleClass(0)
        );
    }

    #[test]
    fn rejects_bad_inputs() {
        assert_eq!(
            ConfusionMatrix::from_binary(&[], &[]).unwrap_err(),
            MetricError::Empty
        );
        assert!(matches!(
            roc_auc(&[0, 1], &[0.5]),
            Err(MetricError::LengthMismatch { .. })
        ));
        assert_eq!(
            roc_auc(&[0, 1], &[0.5, f64::NAN]).unwrap_err(),
            MetricError::NonFiniteScore(1)
        );
        assert_eq!(
            ConfusionMatrix::from_binary(&[0, 2], &[0, 1]).unwrap_err(),
            MetricError::InvalidLabel(2)
        );
    }

    #[test]
    fn record_entries_are_in_reporting_order() {
        let record = MetricsRecord::from_hard_predictions(&[0, 1, 1, 0], &[0, 1, 0, 0]).unwrap();
        let names: Vec<&str> = record.entries().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["Accuracy", "F1 score", "AUC"]);
        for (_, value) in record.entries() {
            assert!((0.0..=1.0).contains(&value));
        }
        assert_eq!(record.accuracy, 0.75);
    }
}
