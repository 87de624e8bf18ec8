//! Inverse-class-frequency sample weights.

use patchdx_core::{Error, Result};
use serde::Serialize;

/// Per-sample weights and class statistics of a binary training set
#[derive(Debug, Clone, Serialize)]
pub struct ClassWeights {
    /// `N / N_label` for every sample
    pub sample_weights: Vec<f64>,
    /// Sample count per class
    pub counts: [usize; 2],
    /// `N_0 / N_1`, the positive-class loss weight
    pub imbalance_ratio: f32,
}

/// Compute sampling weights and the imbalance ratio from binary labels.
///
/// Both classes must be present; a one-class training set has no
/// meaningful ratio.
pub fn class_sample_weights(labels: &[usize]) -> Result<ClassWeights> {
    let mut counts = [0usize; 2];
    for &label in labels {
        match label {
            0 | 1 => counts[label] += 1,
            other => {
                return Err(Error::Dataset(format!(
                    "label {other} is not binary"
                )))
            }
        }
    }

    if counts[0] == 0 || counts[1] == 0 {
        return Err(Error::Dataset(format!(
            "training set needs both classes, got {} negative and {} positive",
            counts[0], counts[1]
        )));
    }

    let total = labels.len() as f64;
    let sample_weights = labels
        .iter()
        .map(|&label| total / counts[label] as f64)
        .collect();

    Ok(ClassWeights {
        sample_weights,
        counts,
        imbalance_ratio: counts[0] as f32 / counts[1] as f32,
    })
}
