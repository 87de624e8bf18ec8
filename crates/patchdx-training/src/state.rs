//! Per-run training state.

use std::path::Path;

use patchdx_core::{ConfusionMatrix, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Validation outcome of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub metric: f64,
    pub matrix: ConfusionMatrix,
}

/// Mutable state of one training run, threaded through the epoch loop.
///
/// `best_metric` starts unset, so the first observed epoch always becomes
/// the best. Later epochs replace it when their metric is greater than or
/// equal to it; ties go to the later epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub epoch: usize,
    pub best_epoch: Option<usize>,
    pub best_metric: Option<f64>,
    pub best_matrix: ConfusionMatrix,
    pub history: Vec<EpochRecord>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one epoch and report whether it is the new best.
    pub fn observe(&mut self, record: EpochRecord) -> bool {
        self.epoch = record.epoch;
        self.history.push(record);

        let improved = self.best_metric.map_or(true, |best| record.metric >= best);
        if improved {
            self.best_epoch = Some(record.epoch);
            self.best_metric = Some(record.metric);
            self.best_matrix = record.matrix;
        }
        improved
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Run state saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, metric: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 0.5,
            metric,
            matrix: ConfusionMatrix::from_counts(epoch as u64, 0, 0, 1),
        }
    }

    #[test]
    fn test_first_epoch_always_improves() {
        let mut state = RunState::new();
        assert!(state.best_epoch.is_none());
        assert!(state.observe(record(0, -0.3)));
        assert_eq!(state.best_epoch, Some(0));
        assert_eq!(state.best_metric, Some(-0.3));
    }

    #[test]
    fn test_ties_go_to_later_epoch() {
        let mut state = RunState::new();
        state.observe(record(0, 0.7));
        assert!(!state.observe(record(1, 0.6)));
        assert!(state.observe(record(2, 0.7)));
        assert_eq!(state.best_epoch, Some(2));
        assert_eq!(state.best_matrix, record(2, 0.7).matrix);
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn test_best_is_maximum() {
        let metrics = [0.60, 0.65, 0.70, 0.68, 0.72, 0.71, 0.75, 0.74, 0.73, 0.70];
        let mut state = RunState::new();
        for (epoch, &metric) in metrics.iter().enumerate() {
            state.observe(record(epoch, metric));
        }
        assert_eq!(state.best_epoch, Some(6));
        assert_eq!(state.best_metric, Some(0.75));
        assert_eq!(state.epoch, 9);
    }

    #[test]
    fn test_save_json() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let mut state = RunState::new();
        state.observe(record(0, 0.5));

        let path = dir.path().join("run_state.json");
        state.save_json(&path)?;
        let loaded: RunState = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(loaded.best_epoch, Some(0));
        Ok(())
    }
}
