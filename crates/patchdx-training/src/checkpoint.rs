//! Best-model checkpointing.
//!
//! Each run owns `<checkpoint_root>/<model_name>_exp<run>/`. At most one
//! model checkpoint, `<model_name>_<epoch>.bin`, lives there at a time:
//! every new best wipes the directory's checkpoints before it is written.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use patchdx_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::state::{EpochRecord, RunState};

const CHECKPOINT_EXTENSION: &str = "bin";

type Recorder = BinFileRecorder<FullPrecisionSettings>;

/// Manager for the single retained checkpoint of one run
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    run_dir: PathBuf,
    model_name: String,
}

impl CheckpointManager {
    /// Derive the run directory and create it if absent.
    pub fn new(checkpoint_root: &Path, model_name: &str, run_index: usize) -> Result<Self> {
        if model_name.is_empty() {
            return Err(Error::InvalidArgument("model name must not be empty".to_string()));
        }
        let run_dir = checkpoint_root.join(format!("{model_name}_exp{run_index}"));
        fs::create_dir_all(&run_dir)?;

        Ok(Self {
            run_dir,
            model_name: model_name.to_string(),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Path handed to the recorder, which appends the extension itself.
    fn checkpoint_stem(&self, epoch: usize) -> PathBuf {
        self.run_dir.join(format!("{}_{}", self.model_name, epoch))
    }

    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.checkpoint_stem(epoch).with_extension(CHECKPOINT_EXTENSION)
    }

    pub fn raw_score_path(&self, seed: u64) -> PathBuf {
        self.run_dir.join(format!("raw_score_seed{seed}.txt"))
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.run_dir.join("run_state.json")
    }

    /// List all checkpoint files in the run directory
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>> {
        if !self.run_dir.exists() {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        for entry in fs::read_dir(&self.run_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(CHECKPOINT_EXTENSION) {
                checkpoints.push(path);
            }
        }
        checkpoints.sort();
        Ok(checkpoints)
    }

    /// Remove every `.bin` entry in the run directory.
    ///
    /// Best-effort: an unreadable directory or an entry that cannot be
    /// removed is logged and skipped.
    pub fn clear(&self) {
        let entries = match fs::read_dir(&self.run_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read run directory {:?}: {}", self.run_dir, e);
                return;
            }
        };

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Failed to read entry of {:?}: {}", self.run_dir, e);
                    continue;
                }
            };
            if path.extension().and_then(|s| s.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed checkpoint {:?}", path),
                Err(e) => warn!("Failed to remove checkpoint {:?}: {}", path, e),
            }
        }
    }

    /// Replace whatever checkpoint exists with `model` at `epoch`.
    pub fn save<B: Backend, M: Module<B>>(&self, model: &M, epoch: usize) -> Result<PathBuf> {
        self.clear();
        model
            .clone()
            .save_file(self.checkpoint_stem(epoch), &Recorder::new())?;

        let path = self.checkpoint_path(epoch);
        info!("Checkpoint saved to {:?}", path);
        Ok(path)
    }

    /// Load the checkpoint of `epoch` into `model`.
    pub fn load<B: Backend, M: Module<B>>(&self, model: M, epoch: usize, device: &B::Device) -> Result<M> {
        let path = self.checkpoint_path(epoch);
        if !path.exists() {
            return Err(Error::NotFound(format!("checkpoint {}", path.display())));
        }
        let model = model.load_file(self.checkpoint_stem(epoch), &Recorder::new(), device)?;
        info!("Checkpoint loaded from {:?}", path);
        Ok(model)
    }

    /// Record the epoch in `state` and, when it is the new best (`>=`),
    /// replace the retained checkpoint with `model`.
    pub fn save_checkpoint<B: Backend, M: Module<B>>(
        &self,
        state: &mut RunState,
        record: EpochRecord,
        model: &M,
    ) -> Result<bool> {
        let improved = state.observe(record);
        if improved {
            self.save(model, record.epoch)?;
        }
        Ok(improved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::nn::{Linear, LinearConfig};
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use patchdx_core::ConfusionMatrix;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn record(epoch: usize, metric: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 0.0,
            metric,
            matrix: ConfusionMatrix::new(),
        }
    }

    #[test]
    fn test_run_dir_created() -> Result<()> {
        let root = TempDir::new()?;
        let manager = CheckpointManager::new(root.path(), "fcn", 3)?;
        assert!(manager.run_dir().ends_with("fcn_exp3"));
        assert!(manager.run_dir().is_dir());
        assert_eq!(
            manager.raw_score_path(1000).file_name().unwrap(),
            "raw_score_seed1000.txt"
        );
        Ok(())
    }

    #[test]
    fn test_single_checkpoint_retained() -> Result<()> {
        let root = TempDir::new()?;
        let manager = CheckpointManager::new(root.path(), "cnn", 0)?;
        let device = Default::default();
        let model: Linear<TestBackend> = LinearConfig::new(4, 2).init(&device);

        let metrics = [0.60, 0.65, 0.70, 0.68, 0.72, 0.71, 0.75, 0.74, 0.73, 0.70];
        let mut state = RunState::new();
        for (epoch, &metric) in metrics.iter().enumerate() {
            manager.save_checkpoint(&mut state, record(epoch, metric), &model)?;
            assert_eq!(manager.list_checkpoints()?.len(), 1);
        }

        assert_eq!(state.best_epoch, Some(6));
        assert_eq!(state.best_metric, Some(0.75));

        let files = manager.list_checkpoints()?;
        assert_eq!(files, vec![manager.checkpoint_path(6)]);
        assert_eq!(files[0].file_name().unwrap(), "cnn_6.bin");
        Ok(())
    }

    #[test]
    fn test_clear_leaves_other_files() -> Result<()> {
        let root = TempDir::new()?;
        let manager = CheckpointManager::new(root.path(), "cnn", 0)?;
        fs::write(manager.run_dir().join("cnn_1.bin"), b"stale")?;
        fs::write(manager.raw_score_path(1), b"0.1 0.9 1\n")?;

        manager.clear();
        assert!(manager.list_checkpoints()?.is_empty());
        assert!(manager.raw_score_path(1).exists());
        Ok(())
    }

    #[test]
    fn test_failed_cleanup_does_not_block_save() -> Result<()> {
        let root = TempDir::new()?;
        let manager = CheckpointManager::new(root.path(), "cnn", 0)?;
        let device = Default::default();
        let model: Linear<TestBackend> = LinearConfig::new(4, 2).init(&device);

        // A directory cannot be removed with remove_file.
        let stuck = manager.run_dir().join("cnn_0.bin");
        fs::create_dir(&stuck)?;

        let mut state = RunState::new();
        assert!(manager.save_checkpoint(&mut state, record(1, 0.8), &model)?);
        assert!(stuck.is_dir());
        assert_eq!(manager.list_checkpoints()?, vec![manager.checkpoint_path(1)]);
        Ok(())
    }

    #[test]
    fn test_save_and_load_roundtrip() -> Result<()> {
        let root = TempDir::new()?;
        let manager = CheckpointManager::new(root.path(), "cnn", 0)?;
        let device = Default::default();

        let trained: Linear<TestBackend> = LinearConfig::new(3, 2).init(&device);
        manager.save(&trained, 4)?;

        let fresh: Linear<TestBackend> = LinearConfig::new(3, 2).init(&device);
        let loaded = manager.load(fresh, 4, &device)?;

        let input = Tensor::<TestBackend, 2>::ones([1, 3], &device);
        let expected: Vec<f32> = trained.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        assert_eq!(expected, actual);

        assert!(matches!(manager.load(loaded, 5, &device), Err(Error::NotFound(_))));
        Ok(())
    }
}
