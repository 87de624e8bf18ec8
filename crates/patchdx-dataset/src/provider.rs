//! Data providers for the train, valid and test stages.
//!
//! A provider owns a dataset, a batch size and a sampling strategy. Each
//! epoch it plans a list of index batches up front; batches are then
//! materialised lazily so only one lives on the device at a time.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::Backend;
use patchdx_core::{Error, ImbalanceMode, Result};
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::dataset::{ScanBatch, ScanBatcher, ScanDataset, ScanItem, ScanView};
use crate::lookup::{read_lookup, Stage};
use crate::weights::{class_sample_weights, ClassWeights};

/// How a provider orders its indices each epoch
#[derive(Debug, Clone)]
pub enum SamplingStrategy {
    /// Fixed dataset order
    Sequential,
    /// Uniform shuffle per epoch
    Shuffle { drop_last: bool },
    /// Draw `num_samples` indices with replacement, probability proportional to weight
    Weighted {
        weights: Vec<f64>,
        num_samples: usize,
    },
}

impl SamplingStrategy {
    /// Plan one epoch of index batches over a dataset of `len` items.
    pub fn plan(&self, len: usize, batch_size: usize, rng: &mut ChaCha8Rng) -> Result<Vec<Vec<usize>>> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be positive".to_string()));
        }

        let (indices, drop_last) = match self {
            SamplingStrategy::Sequential => ((0..len).collect::<Vec<_>>(), false),
            SamplingStrategy::Shuffle { drop_last } => {
                let mut indices: Vec<usize> = (0..len).collect();
                indices.shuffle(rng);
                (indices, *drop_last)
            }
            SamplingStrategy::Weighted {
                weights,
                num_samples,
            } => {
                if weights.len() != len {
                    return Err(Error::Dataset(format!(
                        "{} sample weights for {} samples",
                        weights.len(),
                        len
                    )));
                }
                let dist = WeightedIndex::new(weights)
                    .map_err(|e| Error::Dataset(format!("invalid sample weights: {e}")))?;
                ((0..*num_samples).map(|_| dist.sample(rng)).collect(), false)
            }
        };

        let batches = if drop_last {
            indices.chunks_exact(batch_size).map(<[usize]>::to_vec).collect()
        } else {
            indices.chunks(batch_size).map(<[usize]>::to_vec).collect()
        };
        Ok(batches)
    }
}

/// A dataset plus the policy for walking it in batches
#[derive(Debug)]
pub struct DataProvider {
    dataset: ScanDataset,
    batch_size: usize,
    strategy: SamplingStrategy,
    rng: ChaCha8Rng,
}

impl DataProvider {
    pub fn new(dataset: ScanDataset, batch_size: usize, strategy: SamplingStrategy, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be positive".to_string()));
        }
        if batch_size > 1 && !dataset.uniform_shape() {
            return Err(Error::Dataset(
                "scans differ in size and cannot be batched together; use batch size 1".to_string(),
            ));
        }

        Ok(Self {
            dataset,
            batch_size,
            strategy,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Index batches for the next epoch.
    pub fn plan_epoch(&mut self) -> Result<Vec<Vec<usize>>> {
        self.strategy.plan(self.dataset.len(), self.batch_size, &mut self.rng)
    }

    /// Materialise one planned batch on `device`.
    pub fn batch<B: Backend>(&self, indices: &[usize], device: &B::Device) -> ScanBatch<B> {
        let items = indices.iter().filter_map(|&i| self.dataset.get(i)).collect();
        Batcher::<B, ScanItem, ScanBatch<B>>::batch(&ScanBatcher, items, device)
    }
}

/// Loader settings shared by the three stages
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub batch_size: usize,
    pub imbalance: ImbalanceMode,
    pub seed: u64,
    /// Train on random patches of this size; evaluate whole scans one at a time
    pub patch_size: Option<usize>,
    /// Reject any stage holding a scan with a shorter edge
    pub min_scan_size: Option<usize>,
}

/// The train/valid/test providers of one run
#[derive(Debug)]
pub struct DataProviders {
    pub train: DataProvider,
    pub valid: DataProvider,
    pub test: DataProvider,
    pub class_weights: ClassWeights,
    /// Positive-class loss weight; 1 when the sampler already balances classes
    pub imbalance_ratio: f32,
}

impl DataProviders {
    /// Load the lookup tables of `run_index` and build all three providers.
    pub fn prepare(data_dir: &Path, run_index: usize, settings: &LoaderSettings) -> Result<Self> {
        let train_records = read_lookup(data_dir, run_index, Stage::Train)?;
        let valid_records = read_lookup(data_dir, run_index, Stage::Valid)?;
        let test_records = read_lookup(data_dir, run_index, Stage::Test)?;

        let train_view = match settings.patch_size {
            Some(size) => ScanView::random_patch(size, settings.seed),
            None => ScanView::Whole,
        };
        let train_set = ScanDataset::load(&train_records, train_view)?;
        let valid_set = ScanDataset::load(&valid_records, ScanView::Whole)?;
        let test_set = ScanDataset::load(&test_records, ScanView::Whole)?;

        Self::from_datasets(train_set, valid_set, test_set, settings)
    }

    /// Build providers from already-loaded datasets.
    pub fn from_datasets(
        train_set: ScanDataset,
        valid_set: ScanDataset,
        test_set: ScanDataset,
        settings: &LoaderSettings,
    ) -> Result<Self> {
        if let Some(min) = settings.min_scan_size {
            for (stage, set) in [
                (Stage::Train, &train_set),
                (Stage::Valid, &valid_set),
                (Stage::Test, &test_set),
            ] {
                match set.smallest_side() {
                    Some(side) if side < min => {
                        return Err(Error::Dataset(format!(
                            "{stage} set holds a scan with a {side}px edge, the model needs at least {min}px"
                        )));
                    }
                    _ => {}
                }
            }
        }

        let class_weights = class_sample_weights(train_set.labels())?;

        let (strategy, imbalance_ratio) = match settings.imbalance {
            ImbalanceMode::WeightedSampler => (
                SamplingStrategy::Weighted {
                    weights: class_weights.sample_weights.clone(),
                    num_samples: train_set.len(),
                },
                1.0,
            ),
            ImbalanceMode::LossWeight => (
                SamplingStrategy::Shuffle { drop_last: true },
                class_weights.imbalance_ratio,
            ),
        };

        if matches!(strategy, SamplingStrategy::Shuffle { drop_last: true })
            && train_set.len() < settings.batch_size
        {
            warn!(
                "Training set of {} is smaller than batch size {}; every batch will be dropped",
                train_set.len(),
                settings.batch_size
            );
        }

        let eval_batch_size = if settings.patch_size.is_some() {
            1
        } else {
            settings.batch_size
        };

        info!(
            "Train {} (neg {}, pos {}), valid {}, test {}, imbalance ratio {:.3} ({})",
            train_set.len(),
            class_weights.counts[0],
            class_weights.counts[1],
            valid_set.len(),
            test_set.len(),
            imbalance_ratio,
            settings.imbalance
        );

        Ok(Self {
            train: DataProvider::new(train_set, settings.batch_size, strategy, settings.seed)?,
            valid: DataProvider::new(valid_set, eval_batch_size, SamplingStrategy::Sequential, settings.seed)?,
            test: DataProvider::new(test_set, eval_batch_size, SamplingStrategy::Sequential, settings.seed)?,
            class_weights,
            imbalance_ratio,
        })
    }
}
