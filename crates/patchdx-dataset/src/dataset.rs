//! Burn dataset and batcher for grayscale scans.
//!
//! Scans are decoded once into `f32` luminance in `[0, 1]` and kept in
//! memory. A [`ScanView`] decides what `get` hands out: the whole scan, or
//! a random square patch drawn from it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use patchdx_core::{Error, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::lookup::ScanRecord;

/// A decoded single-channel scan in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub pixels: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

impl Scan {
    pub fn new(pixels: Vec<f32>, height: usize, width: usize) -> Result<Self> {
        if height == 0 || width == 0 || pixels.len() != height * width {
            return Err(Error::Dataset(format!(
                "scan of {height}x{width} cannot hold {} pixels",
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            height,
            width,
        })
    }

    /// Decode an image file to grayscale.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let img = image::open(path)
            .map_err(|e| Error::Image(format!("{}: {e}", path.display())))?
            .to_luma32f();
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), height as usize, width as usize)
    }

    /// Copy out the `size x size` window with its top-left corner at (`top`, `left`).
    pub fn crop(&self, top: usize, left: usize, size: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(size * size);
        for row in top..top + size {
            let start = row * self.width + left;
            out.extend_from_slice(&self.pixels[start..start + size]);
        }
        out
    }
}

/// What the dataset yields for each index
#[derive(Debug)]
pub enum ScanView {
    /// The full scan
    Whole,
    /// A uniformly placed `patch_size x patch_size` crop, reseeded per draw
    RandomPatch {
        patch_size: usize,
        seed: u64,
        draws: AtomicU64,
    },
}

impl ScanView {
    pub fn random_patch(patch_size: usize, seed: u64) -> Self {
        ScanView::RandomPatch {
            patch_size,
            seed,
            draws: AtomicU64::new(0),
        }
    }
}

/// A single scan (or patch) ready for batching
#[derive(Debug, Clone)]
pub struct ScanItem {
    /// Pixels, row-major `[height * width]`
    pub image: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub label: usize,
}

/// In-memory scan dataset implementing Burn's `Dataset`
#[derive(Debug, Clone)]
pub struct ScanDataset {
    scans: Arc<Vec<Scan>>,
    labels: Vec<usize>,
    view: Arc<ScanView>,
}

impl ScanDataset {
    /// Decode every scan listed in `records`.
    pub fn load(records: &[ScanRecord], view: ScanView) -> Result<Self> {
        let scans = records
            .iter()
            .map(|record| Scan::open(&record.path))
            .collect::<Result<Vec<_>>>()?;
        let labels = records.iter().map(|r| r.label).collect();

        let dataset = Self::from_scans(scans, labels, view)?;
        info!("Loaded {} scans", dataset.len());
        Ok(dataset)
    }

    pub fn from_scans(scans: Vec<Scan>, labels: Vec<usize>, view: ScanView) -> Result<Self> {
        if scans.len() != labels.len() {
            return Err(Error::Dataset(format!(
                "{} scans but {} labels",
                scans.len(),
                labels.len()
            )));
        }

        if let ScanView::RandomPatch { patch_size, .. } = &view {
            if *patch_size == 0 {
                return Err(Error::Dataset("patch size must be positive".to_string()));
            }
            if let Some(small) = scans
                .iter()
                .find(|s| s.height < *patch_size || s.width < *patch_size)
            {
                return Err(Error::Dataset(format!(
                    "scan of {}x{} is smaller than patch size {}",
                    small.height, small.width, patch_size
                )));
            }
        }

        Ok(Self {
            scans: Arc::new(scans),
            labels,
            view: Arc::new(view),
        })
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Shortest edge over all scans, before any patch is cut.
    pub fn smallest_side(&self) -> Option<usize> {
        self.scans.iter().map(|s| s.height.min(s.width)).min()
    }

    /// True when every item this dataset yields has the same shape.
    pub fn uniform_shape(&self) -> bool {
        match self.view.as_ref() {
            ScanView::RandomPatch { .. } => true,
            ScanView::Whole => self
                .scans
                .windows(2)
                .all(|w| w[0].height == w[1].height && w[0].width == w[1].width),
        }
    }
}

impl Dataset<ScanItem> for ScanDataset {
    fn get(&self, index: usize) -> Option<ScanItem> {
        let scan = self.scans.get(index)?;
        let label = *self.labels.get(index)?;

        match self.view.as_ref() {
            ScanView::Whole => Some(ScanItem {
                image: scan.pixels.clone(),
                height: scan.height,
                width: scan.width,
                label,
            }),
            ScanView::RandomPatch {
                patch_size,
                seed,
                draws,
            } => {
                let draw = draws.fetch_add(1, Ordering::Relaxed);
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(draw));
                let top = rng.gen_range(0..=scan.height - patch_size);
                let left = rng.gen_range(0..=scan.width - patch_size);
                Some(ScanItem {
                    image: scan.crop(top, left, *patch_size),
                    height: *patch_size,
                    width: *patch_size,
                    label,
                })
            }
        }
    }

    fn len(&self) -> usize {
        self.scans.len()
    }
}

/// A batch of scans
#[derive(Clone, Debug)]
pub struct ScanBatch<B: Backend> {
    /// Images with shape `[batch_size, 1, height, width]`
    pub images: Tensor<B, 4>,
    /// Labels with shape `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
    /// Labels as plain integers, for metric bookkeeping
    pub labels: Vec<usize>,
}

/// Stacks same-shaped scan items into a batch.
#[derive(Clone, Debug, Default)]
pub struct ScanBatcher;

impl<B: Backend> Batcher<B, ScanItem, ScanBatch<B>> for ScanBatcher {
    fn batch(&self, items: Vec<ScanItem>, device: &B::Device) -> ScanBatch<B> {
        let batch_size = items.len();
        let (height, width) = items
            .first()
            .map(|item| (item.height, item.width))
            .unwrap_or((0, 0));

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 1, height, width]),
            device,
        );

        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        let targets_data: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ScanBatch {
            images,
            targets,
            labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn ramp(height: usize, width: usize) -> Scan {
        let pixels = (0..height * width).map(|v| v as f32).collect();
        Scan::new(pixels, height, width).unwrap()
    }

    #[test]
    fn test_crop() {
        let scan = ramp(4, 5);
        assert_eq!(scan.crop(1, 2, 2), vec![7.0, 8.0, 12.0, 13.0]);
    }

    #[test]
    fn test_whole_view() {
        let dataset = ScanDataset::from_scans(vec![ramp(3, 3), ramp(3, 3)], vec![0, 1], ScanView::Whole).unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset.uniform_shape());

        let item = dataset.get(1).unwrap();
        assert_eq!(item.label, 1);
        assert_eq!(item.image.len(), 9);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn test_random_patch_view_is_seeded() {
        let make = || {
            ScanDataset::from_scans(vec![ramp(10, 12)], vec![1], ScanView::random_patch(4, 9)).unwrap()
        };
        let a = make();
        let b = make();

        for _ in 0..5 {
            let pa = a.get(0).unwrap();
            let pb = b.get(0).unwrap();
            assert_eq!(pa.image, pb.image);
            assert_eq!((pa.height, pa.width), (4, 4));
        }
    }

    #[test]
    fn test_patch_larger_than_scan_rejected() {
        let result = ScanDataset::from_scans(vec![ramp(3, 8)], vec![0], ScanView::random_patch(4, 0));
        assert!(matches!(result, Err(Error::Dataset(_))));
    }

    #[test]
    fn test_mixed_shapes_not_uniform() {
        let dataset =
            ScanDataset::from_scans(vec![ramp(3, 3), ramp(4, 3)], vec![0, 1], ScanView::Whole).unwrap();
        assert!(!dataset.uniform_shape());
    }

    #[test]
    fn test_batcher_shapes() {
        let dataset = ScanDataset::from_scans(vec![ramp(2, 3), ramp(2, 3)], vec![0, 1], ScanView::Whole).unwrap();
        let items: Vec<ScanItem> = (0..2).filter_map(|i| dataset.get(i)).collect();

        let device = Default::default();
        let batch: ScanBatch<TestBackend> = ScanBatcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 1, 2, 3]);
        assert_eq!(batch.targets.dims(), [2]);
        assert_eq!(batch.labels, vec![0, 1]);
    }
}
