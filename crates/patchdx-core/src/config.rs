//! Configuration structures for training experiments.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Full experiment configuration, usually loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Model configuration
    pub model: ModelSection,
    /// Training hyperparameters
    pub training: TrainingSection,
    /// Data configuration
    pub data: DataSection,
    /// Output configuration
    pub output: OutputSection,
}

/// Which classifier family to train
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Whole-scan convolutional classifier
    #[default]
    Cnn,
    /// Patch classifier evaluated as a fully-convolutional sliding window
    Fcn,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Cnn => write!(f, "cnn"),
            ModelKind::Fcn => write!(f, "fcn"),
        }
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Architecture family
    pub kind: ModelKind,
    /// Number of filters in each conv block
    pub filters: usize,
    /// Dropout rate
    pub dropout: f64,
    /// Edge length of training patches (fcn only)
    pub patch_size: usize,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            kind: ModelKind::Cnn,
            filters: 20,
            dropout: 0.5,
            patch_size: 47,
        }
    }
}

/// How class imbalance in the training set is compensated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImbalanceMode {
    /// Shuffle uniformly and weight the positive class in the loss
    #[default]
    LossWeight,
    /// Draw samples with inverse-class-frequency probability
    WeightedSampler,
}

impl ImbalanceMode {
    /// Map the numeric `balanced` flag (0 or 1) onto a mode.
    pub fn from_balanced(flag: u8) -> Result<Self> {
        match flag {
            0 => Ok(ImbalanceMode::LossWeight),
            1 => Ok(ImbalanceMode::WeightedSampler),
            other => Err(Error::InvalidArgument(format!(
                "balanced must be 0 or 1, got {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ImbalanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImbalanceMode::LossWeight => write!(f, "loss_weight"),
            ImbalanceMode::WeightedSampler => write!(f, "weighted_sampler"),
        }
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSection {
    /// Learning rate for Adam
    pub learning_rate: f64,
    /// Number of training epochs
    pub epochs: usize,
    /// Training batch size
    pub batch_size: usize,
    /// Class imbalance handling
    pub imbalance: ImbalanceMode,
    /// Validation metric used for checkpoint selection
    pub metric: String,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            epochs: 100,
            batch_size: 10,
            imbalance: ImbalanceMode::LossWeight,
            metric: "accuracy".to_string(),
        }
    }
}

/// Data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// Root directory holding `exp<run>/{train,valid,test}.csv` and the scans
    pub data_dir: PathBuf,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of repeated runs (run indices 0..runs)
    pub runs: usize,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            seed: 1000,
            runs: 1,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Root under which `<model_name>_exp<run>/` directories are created
    pub checkpoint_root: PathBuf,
    /// Name used for run directories and checkpoint files
    pub model_name: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            checkpoint_root: PathBuf::from("checkpoint_dir"),
            model_name: "cnn".to_string(),
        }
    }
}

impl ExperimentConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.training.epochs == 0 {
            return Err("epochs must be greater than 0".to_string());
        }
        if self.training.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }
        if !(self.training.learning_rate > 0.0) {
            return Err(format!(
                "learning_rate must be positive, got {}",
                self.training.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(format!("dropout must be in [0, 1), got {}", self.model.dropout));
        }
        if self.model.filters == 0 {
            return Err("filters must be greater than 0".to_string());
        }
        if self.data.runs == 0 {
            return Err("runs must be greater than 0".to_string());
        }
        if self.output.model_name.is_empty() {
            return Err("model_name must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExperimentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.training.batch_size, 10);
        assert_eq!(config.output.checkpoint_root, PathBuf::from("checkpoint_dir"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ExperimentConfig::default();
        config.training.learning_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.model.dropout = 1.0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.training.epochs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_imbalance_from_balanced() {
        assert_eq!(ImbalanceMode::from_balanced(0).unwrap(), ImbalanceMode::LossWeight);
        assert_eq!(ImbalanceMode::from_balanced(1).unwrap(), ImbalanceMode::WeightedSampler);
        assert!(ImbalanceMode::from_balanced(2).is_err());
    }

    #[test]
    fn test_toml_roundtrip_enums() {
        let text = r#"
            [model]
            kind = "fcn"
            patch_size = 31

            [training]
            imbalance = "weighted_sampler"
        "#;
        let config: ExperimentConfig = toml::from_str(text).unwrap();
        assert_eq!(config.model.kind, ModelKind::Fcn);
        assert_eq!(config.model.patch_size, 31);
        assert_eq!(config.training.imbalance, ImbalanceMode::WeightedSampler);
        assert_eq!(config.model.kind.to_string(), "fcn");
    }
}
