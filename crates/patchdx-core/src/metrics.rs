//! Binary classification metrics.
//!
//! The confusion matrix is the unit of exchange between evaluation passes
//! and checkpoint selection: every pass accumulates one, and an
//! [`EvalMetric`] turns it into the scalar used to rank epochs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use crate::{Error, Result};

const MCC_EPSILON: f64 = 1e-8;

/// 2x2 confusion matrix for a binary task (class 1 is positive).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: u64,
    pub false_positive: u64,
    pub false_negative: u64,
    pub true_positive: u64,
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_counts(tn: u64, fp: u64, fn_: u64, tp: u64) -> Self {
        Self {
            true_negative: tn,
            false_positive: fp,
            false_negative: fn_,
            true_positive: tp,
        }
    }

    /// Record one prediction against its label. Any nonzero value is positive.
    pub fn record(&mut self, predicted: usize, label: usize) {
        match (predicted != 0, label != 0) {
            (false, false) => self.true_negative += 1,
            (true, false) => self.false_positive += 1,
            (false, true) => self.false_negative += 1,
            (true, true) => self.true_positive += 1,
        }
    }

    /// Build a matrix from flat `[N, 2]` scores. Ties predict class 0.
    pub fn from_scores(scores: &[f32], labels: &[usize]) -> Result<Self> {
        if scores.len() != labels.len() * 2 {
            return Err(Error::InvalidArgument(format!(
                "expected {} scores for {} labels, got {}",
                labels.len() * 2,
                labels.len(),
                scores.len()
            )));
        }

        let mut matrix = Self::new();
        for (row, &label) in scores.chunks_exact(2).zip(labels) {
            matrix.record(predicted_class(row[0], row[1]), label);
        }
        Ok(matrix)
    }

    pub fn total(&self) -> u64 {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }

    pub fn correct(&self) -> u64 {
        self.true_negative + self.true_positive
    }

    /// Fraction of correct predictions, 0.0 for an empty matrix.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.correct() as f64 / total as f64
    }

    /// Matthews correlation coefficient.
    pub fn mcc(&self) -> f64 {
        let tp = self.true_positive as f64;
        let tn = self.true_negative as f64;
        let fp = self.false_positive as f64;
        let fn_ = self.false_negative as f64;

        let numerator = tp * tn - fp * fn_;
        let denominator = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
        numerator / (denominator + MCC_EPSILON)
    }

    pub fn f1(&self) -> f64 {
        let denominator = 2 * self.true_positive + self.false_positive + self.false_negative;
        if denominator == 0 {
            return 0.0;
        }
        2.0 * self.true_positive as f64 / denominator as f64
    }

    pub fn sensitivity(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn specificity(&self) -> f64 {
        ratio(self.true_negative, self.true_negative + self.false_positive)
    }
}

/// Argmax over two scores, ties going to class 0.
pub fn predicted_class(score0: f32, score1: f32) -> usize {
    if score1 > score0 {
        1
    } else {
        0
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl Add for ConfusionMatrix {
    type Output = ConfusionMatrix;

    fn add(self, rhs: ConfusionMatrix) -> ConfusionMatrix {
        ConfusionMatrix {
            true_negative: self.true_negative + rhs.true_negative,
            false_positive: self.false_positive + rhs.false_positive,
            false_negative: self.false_negative + rhs.false_negative,
            true_positive: self.true_positive + rhs.true_positive,
        }
    }
}

impl AddAssign for ConfusionMatrix {
    fn add_assign(&mut self, rhs: ConfusionMatrix) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for ConfusionMatrix {
    fn sum<I: Iterator<Item = ConfusionMatrix>>(iter: I) -> Self {
        iter.fold(ConfusionMatrix::new(), Add::add)
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[[{}, {}], [{}, {}]]",
            self.true_negative, self.false_positive, self.false_negative, self.true_positive
        )
    }
}

/// Scalar metric used to rank validation epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMetric {
    Accuracy,
    Mcc,
}

impl EvalMetric {
    pub fn evaluate(&self, matrix: &ConfusionMatrix) -> f64 {
        match self {
            EvalMetric::Accuracy => matrix.accuracy(),
            EvalMetric::Mcc => matrix.mcc(),
        }
    }
}

impl FromStr for EvalMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "accuracy" | "acc" => Ok(EvalMetric::Accuracy),
            "mcc" => Ok(EvalMetric::Mcc),
            other => Err(Error::Config(format!(
                "unknown metric '{other}', expected 'accuracy' or 'mcc'"
            ))),
        }
    }
}

impl fmt::Display for EvalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalMetric::Accuracy => write!(f, "accuracy"),
            EvalMetric::Mcc => write!(f, "mcc"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_accuracy() {
        let mut cm = ConfusionMatrix::new();
        cm.record(0, 0);
        cm.record(1, 1);
        cm.record(1, 0);
        cm.record(0, 1);
        cm.record(1, 1);

        assert_eq!(cm, ConfusionMatrix::from_counts(1, 1, 1, 2));
        assert_eq!(cm.total(), 5);
        assert!((cm.accuracy() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_matrix() {
        let cm = ConfusionMatrix::new();
        assert_eq!(cm.accuracy(), 0.0);
        assert_eq!(cm.f1(), 0.0);
        assert_eq!(cm.mcc(), 0.0);
    }

    #[test]
    fn test_from_scores_ties_go_to_negative() {
        let scores = [0.5, 0.5, 0.2, 0.8, 0.9, 0.1];
        let cm = ConfusionMatrix::from_scores(&scores, &[1, 1, 0]).unwrap();
        assert_eq!(cm, ConfusionMatrix::from_counts(1, 0, 1, 1));

        assert!(ConfusionMatrix::from_scores(&scores, &[1]).is_err());
    }

    #[test]
    fn test_sum_is_associative_and_commutative() {
        let a = ConfusionMatrix::from_counts(3, 1, 0, 2);
        let b = ConfusionMatrix::from_counts(0, 4, 1, 1);
        let c = ConfusionMatrix::from_counts(7, 0, 2, 5);

        assert_eq!((a + b) + c, a + (b + c));
        assert_eq!(a + b, b + a);
        assert_eq!((a + b + c).total(), a.total() + b.total() + c.total());

        let summed: ConfusionMatrix = vec![a, b, c].into_iter().sum();
        assert_eq!(summed, a + b + c);
    }

    #[test]
    fn test_mcc_perfect_and_inverse() {
        let perfect = ConfusionMatrix::from_counts(10, 0, 0, 10);
        assert!((perfect.mcc() - 1.0).abs() < 1e-6);

        let inverse = ConfusionMatrix::from_counts(0, 10, 10, 0);
        assert!((inverse.mcc() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sensitivity_specificity_f1() {
        let cm = ConfusionMatrix::from_counts(8, 2, 1, 9);
        assert!((cm.sensitivity() - 0.9).abs() < 1e-12);
        assert!((cm.specificity() - 0.8).abs() < 1e-12);
        assert!((cm.f1() - 18.0 / 21.0).abs() < 1e-12);
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("accuracy".parse::<EvalMetric>().unwrap(), EvalMetric::Accuracy);
        assert_eq!("MCC".parse::<EvalMetric>().unwrap(), EvalMetric::Mcc);
        assert!(matches!("auc".parse::<EvalMetric>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_display() {
        let cm = ConfusionMatrix::from_counts(1, 2, 3, 4);
        assert_eq!(cm.to_string(), "[[1, 2], [3, 4]]");
    }
}
