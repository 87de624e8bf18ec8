//! Train / validate / test controller.
//!
//! One controller drives one run: it owns the model, the three data
//! providers and the run's checkpoint directory. `train` runs the epoch
//! loop with an explicit [`RunState`]; `test` consumes the controller,
//! reloads the best checkpoint and scores the held-out set.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use chrono::Utc;
use patchdx_core::{timed, EvalMetric, ExperimentConfig, ImbalanceMode, RawScoreWriter};
use patchdx_core::{Error, Result};
use patchdx_dataset::{DataProvider, DataProviders, LoaderSettings};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::CheckpointManager;
use crate::model::{Classifier, PatchFcn, PatchFcnConfig, ScanCnn, ScanCnnConfig};
use crate::state::{EpochRecord, RunState};
use crate::strategy::{EvaluationStrategy, PatchScoring, SlidingWindow};

const ADAM_BETA_1: f32 = 0.5;
const ADAM_BETA_2: f32 = 0.999;

/// Everything a controller needs besides the model itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    pub seed: u64,
    pub batch_size: usize,
    pub imbalance: ImbalanceMode,
    pub data_dir: PathBuf,
    pub run_index: usize,
    pub model_name: String,
    /// `accuracy` or `mcc`
    pub metric: String,
    pub checkpoint_root: PathBuf,
    /// Train on random patches of this size (patch classifier only)
    pub patch_size: Option<usize>,
}

impl ControllerSettings {
    pub fn from_config(config: &ExperimentConfig, run_index: usize) -> Self {
        Self {
            seed: config.data.seed,
            batch_size: config.training.batch_size,
            imbalance: config.training.imbalance,
            data_dir: config.data.data_dir.clone(),
            run_index,
            model_name: config.output.model_name.clone(),
            metric: config.training.metric.clone(),
            checkpoint_root: config.output.checkpoint_root.clone(),
            patch_size: None,
        }
    }
}

/// Single-use controller for one training run
pub struct Controller<B: AutodiffBackend, M, S> {
    model: M,
    strategy: S,
    providers: DataProviders,
    checkpoints: CheckpointManager,
    metric: EvalMetric,
    settings: ControllerSettings,
    device: B::Device,
    state: Option<RunState>,
}

/// Whole-scan classifier scored example by example
pub type CnnController<B> = Controller<B, ScanCnn<B>, PatchScoring>;

/// Patch classifier scored through decision maps
pub type FcnController<B> = Controller<B, PatchFcn<B>, SlidingWindow>;

impl<B, M, S> Controller<B, M, S>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    S: EvaluationStrategy<B::InnerBackend, M::InnerModule>,
{
    /// Build the data providers and checkpoint directory around `model`.
    ///
    /// Fails with a configuration error on an unknown metric name.
    pub fn new(model: M, strategy: S, settings: ControllerSettings, device: B::Device) -> Result<Self> {
        let metric: EvalMetric = settings.metric.parse()?;
        let providers = Self::prepare_dataloader(&settings, model.min_scan_size())?;
        let checkpoints =
            CheckpointManager::new(&settings.checkpoint_root, &settings.model_name, settings.run_index)?;

        info!(
            "Controller for {} run {} ({} evaluation, metric {}) in {:?}",
            settings.model_name,
            settings.run_index,
            strategy.name(),
            metric,
            checkpoints.run_dir()
        );

        Ok(Self {
            model,
            strategy,
            providers,
            checkpoints,
            metric,
            settings,
            device,
            state: None,
        })
    }

    /// Load the train/valid/test tables of the run and build providers.
    ///
    /// Scans with an edge shorter than `min_scan_size` fail with a dataset error.
    pub fn prepare_dataloader(settings: &ControllerSettings, min_scan_size: usize) -> Result<DataProviders> {
        let loader = LoaderSettings {
            batch_size: settings.batch_size,
            imbalance: settings.imbalance,
            seed: settings.seed,
            patch_size: settings.patch_size,
            min_scan_size: Some(min_scan_size),
        };
        DataProviders::prepare(&settings.data_dir, settings.run_index, &loader)
    }

    /// Run `epochs` epochs and return the best validation metric.
    pub fn train(&mut self, learning_rate: f64, epochs: usize) -> Result<f64> {
        if self.state.is_some() {
            return Err(Error::Training("controller has already been trained".to_string()));
        }
        if epochs == 0 {
            return Err(Error::InvalidArgument("epochs must be greater than 0".to_string()));
        }

        let mut optimizer = AdamConfig::new()
            .with_beta_1(ADAM_BETA_1)
            .with_beta_2(ADAM_BETA_2)
            .init::<B, M>();
        let loss_fn = CrossEntropyLossConfig::new()
            .with_weights(Some(vec![1.0, self.providers.imbalance_ratio]))
            .init(&self.device);

        let mut state = RunState::new();
        let mut model = self.model.clone();

        for epoch in 0..epochs {
            let (next, train_loss) = timed(&format!("Epoch {epoch} training"), || {
                train_epoch(
                    model,
                    &mut self.providers.train,
                    &mut optimizer,
                    &loss_fn,
                    learning_rate,
                    &self.device,
                )
            })?;
            model = next;

            let inference = model.valid();
            let evaluation = timed(&format!("Epoch {epoch} validation"), || {
                self.strategy
                    .evaluate(&inference, &mut self.providers.valid, &self.device)
            })?;
            let metric = self.metric.evaluate(&evaluation.matrix);

            info!(
                "Epoch {} validation confusion matrix: {} {}: {:.4} (train loss {:.4})",
                epoch, evaluation.matrix, self.metric, metric, train_loss
            );

            let record = EpochRecord {
                epoch,
                train_loss,
                metric,
                matrix: evaluation.matrix,
            };
            self.checkpoints
                .save_checkpoint::<B, M>(&mut state, record, &model)?;
        }

        let best = state
            .best_metric
            .ok_or_else(|| Error::Training("no epoch was evaluated".to_string()))?;
        info!(
            "Best model saved at epoch {}: {} {:.4} {}",
            state.best_epoch.unwrap_or_default(),
            self.metric,
            best,
            state.best_matrix
        );

        state.save_json(&self.checkpoints.run_state_path())?;
        self.model = model;
        self.state = Some(state);
        Ok(best)
    }

    /// Reload the best checkpoint, score the test set and write raw scores.
    pub fn test(self) -> Result<f64> {
        let Controller {
            model,
            strategy,
            mut providers,
            checkpoints,
            metric,
            settings,
            device,
            state,
        } = self;

        let best_epoch = state
            .as_ref()
            .and_then(|s| s.best_epoch)
            .ok_or_else(|| Error::Training("test() requires a trained controller".to_string()))?;

        let model = checkpoints.load::<B, M>(model, best_epoch, &device)?;
        let inference = model.valid();
        let evaluation = strategy.evaluate(&inference, &mut providers.test, &device)?;

        let mut writer = RawScoreWriter::create(checkpoints.raw_score_path(settings.seed))?;
        writer.write_all(&evaluation.scores)?;
        let lines = writer.finish()?;
        if lines != providers.test.len() {
            warn!("Wrote {} raw scores for {} test examples", lines, providers.test.len());
        }

        let value = metric.evaluate(&evaluation.matrix);
        info!(
            "Test confusion matrix: {} {}: {:.4} (checkpoint of epoch {}, {})",
            evaluation.matrix,
            metric,
            value,
            best_epoch,
            Utc::now().to_rfc3339()
        );
        Ok(value)
    }

    pub fn state(&self) -> Option<&RunState> {
        self.state.as_ref()
    }

    pub fn run_dir(&self) -> &Path {
        self.checkpoints.run_dir()
    }

    pub fn imbalance_ratio(&self) -> f32 {
        self.providers.imbalance_ratio
    }

    pub fn metric(&self) -> EvalMetric {
        self.metric
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

/// One pass over the training provider with gradient updates.
fn train_epoch<B, M, O>(
    mut model: M,
    provider: &mut DataProvider,
    optimizer: &mut O,
    loss_fn: &CrossEntropyLoss<B>,
    learning_rate: f64,
    device: &B::Device,
) -> Result<(M, f64)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    O: Optimizer<M, B>,
{
    let mut total_loss = 0.0f64;
    let mut batches = 0usize;

    for indices in provider.plan_epoch()? {
        let batch = provider.batch::<B>(&indices, device);
        let logits = model.logits(batch.images);
        let loss = loss_fn.forward(logits, batch.targets);

        total_loss += loss.clone().into_scalar().elem::<f64>();
        batches += 1;

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(learning_rate, model, grads);
    }

    if batches == 0 {
        warn!("Training pass had no complete batch");
    }
    Ok((model, total_loss / batches.max(1) as f64))
}

impl<B: AutodiffBackend> Controller<B, ScanCnn<B>, PatchScoring> {
    /// Seed the backend and build a whole-scan controller.
    pub fn cnn(config: &ScanCnnConfig, settings: ControllerSettings, device: B::Device) -> Result<Self> {
        B::seed(settings.seed);
        let model = config.init::<B>(&device);
        Self::new(model, PatchScoring, settings, device)
    }
}

impl<B: AutodiffBackend> Controller<B, PatchFcn<B>, SlidingWindow> {
    /// Seed the backend and build a patch controller. Training items are
    /// random patches of `config.patch_size`; evaluation uses whole scans.
    pub fn fcn(config: &PatchFcnConfig, mut settings: ControllerSettings, device: B::Device) -> Result<Self> {
        settings.patch_size = Some(config.patch_size);
        B::seed(settings.seed);
        let model = config.init::<B>(&device)?;
        Self::new(model, SlidingWindow, settings, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn settings(root: &Path, metric: &str) -> ControllerSettings {
        ControllerSettings {
            seed: 1,
            batch_size: 2,
            imbalance: ImbalanceMode::LossWeight,
            data_dir: root.join("data"),
            run_index: 0,
            model_name: "cnn".to_string(),
            metric: metric.to_string(),
            checkpoint_root: root.join("checkpoint_dir"),
            patch_size: None,
        }
    }

    #[test]
    fn test_unknown_metric_rejected_before_loading_data() {
        let root = TempDir::new().unwrap();
        let config = ScanCnnConfig::new().with_filters(2);
        let result = CnnController::<TestBackend>::cnn(&config, settings(root.path(), "auc"), Default::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_lookup_tables() {
        let root = TempDir::new().unwrap();
        let config = ScanCnnConfig::new().with_filters(2);
        let result =
            CnnController::<TestBackend>::cnn(&config, settings(root.path(), "accuracy"), Default::default());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = ExperimentConfig::default();
        config.training.metric = "mcc".to_string();
        let settings = ControllerSettings::from_config(&config, 4);
        assert_eq!(settings.run_index, 4);
        assert_eq!(settings.metric, "mcc");
        assert_eq!(settings.batch_size, 10);
        assert!(settings.patch_size.is_none());
    }
}
