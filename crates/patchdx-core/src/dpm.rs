//! Decision probability map (DPM) statistics.
//!
//! A DPM holds the positive-class probability at every sliding-window
//! location of one subject. A subject is called positive when the mean
//! risk over its map reaches 0.5.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::ConfusionMatrix;
use crate::{Error, Result};

const DECISION_THRESHOLD: f32 = 0.5;

/// Positive-class probabilities over a `rows x cols` grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionMap {
    pub rows: usize,
    pub cols: usize,
    pub risk: Vec<f32>,
}

impl DecisionMap {
    pub fn new(rows: usize, cols: usize, risk: Vec<f32>) -> Result<Self> {
        if rows == 0 || cols == 0 || risk.len() != rows * cols {
            return Err(Error::InvalidArgument(format!(
                "decision map of {rows}x{cols} cannot hold {} values",
                risk.len()
            )));
        }
        Ok(Self { rows, cols, risk })
    }

    pub fn mean_risk(&self) -> f32 {
        self.risk.iter().sum::<f32>() / self.risk.len() as f32
    }

    pub fn predicted_class(&self) -> usize {
        usize::from(self.mean_risk() >= DECISION_THRESHOLD)
    }

    /// Number of locations whose thresholded risk matches `label`.
    pub fn agreeing_locations(&self, label: usize) -> usize {
        let positive = label != 0;
        self.risk
            .iter()
            .filter(|&&r| (r >= DECISION_THRESHOLD) == positive)
            .count()
    }
}

/// Subject-level summary of a set of decision maps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DpmSummary {
    pub matrix: ConfusionMatrix,
    pub accuracy: f64,
    pub f1: f64,
    pub mcc: f64,
    /// Fraction of all map locations agreeing with their subject label
    pub location_accuracy: f64,
}

/// Aggregate one decision map per subject into subject-level statistics.
pub fn dpm_statistics(maps: &[DecisionMap], labels: &[usize]) -> Result<DpmSummary> {
    if maps.len() != labels.len() {
        return Err(Error::InvalidArgument(format!(
            "{} decision maps but {} labels",
            maps.len(),
            labels.len()
        )));
    }

    let mut matrix = ConfusionMatrix::new();
    let mut agreeing = 0usize;
    let mut locations = 0usize;

    for (map, &label) in maps.iter().zip(labels) {
        matrix.record(map.predicted_class(), label);
        agreeing += map.agreeing_locations(label);
        locations += map.risk.len();
    }

    let location_accuracy = if locations == 0 {
        0.0
    } else {
        agreeing as f64 / locations as f64
    };

    debug!(
        "DPM statistics over {} subjects: matrix {}, location accuracy {:.4}",
        maps.len(),
        matrix,
        location_accuracy
    );

    Ok(DpmSummary {
        matrix,
        accuracy: matrix.accuracy(),
        f1: matrix.f1(),
        mcc: matrix.mcc(),
        location_accuracy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_map_shape_checked() {
        assert!(DecisionMap::new(2, 2, vec![0.1; 4]).is_ok());
        assert!(DecisionMap::new(2, 2, vec![0.1; 3]).is_err());
        assert!(DecisionMap::new(0, 2, vec![]).is_err());
    }

    #[test]
    fn test_subject_prediction_uses_mean_risk() {
        let map = DecisionMap::new(1, 4, vec![0.9, 0.9, 0.1, 0.2]).unwrap();
        assert!((map.mean_risk() - 0.525).abs() < 1e-6);
        assert_eq!(map.predicted_class(), 1);
        assert_eq!(map.agreeing_locations(1), 2);
        assert_eq!(map.agreeing_locations(0), 2);
    }

    #[test]
    fn test_dpm_statistics() {
        let maps = vec![
            DecisionMap::new(1, 2, vec![0.8, 0.9]).unwrap(),
            DecisionMap::new(1, 2, vec![0.1, 0.2]).unwrap(),
            DecisionMap::new(1, 2, vec![0.6, 0.7]).unwrap(),
        ];
        let summary = dpm_statistics(&maps, &[1, 0, 0]).unwrap();

        assert_eq!(summary.matrix, ConfusionMatrix::from_counts(1, 1, 0, 1));
        assert!((summary.accuracy - 2.0 / 3.0).abs() < 1e-12);
        assert!((summary.location_accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert!((summary.f1 - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_dpm_statistics_length_mismatch() {
        let maps = vec![DecisionMap::new(1, 1, vec![0.5]).unwrap()];
        assert!(dpm_statistics(&maps, &[]).is_err());
    }
}
