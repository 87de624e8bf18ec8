//! Model architectures.
//!
//! Two binary classifiers over single-channel scans:
//! - [`ScanCnn`] scores a whole scan. Global pooling makes it size-agnostic.
//! - [`PatchFcn`] scores a fixed-size patch. After training it is turned
//!   into [`PatchFcnInference`], whose dense layers are convolutions, so a
//!   whole scan yields a map of patch scores in one pass.

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use patchdx_core::Error;

/// Width of the hidden dense layer of the patch classifier
const DENSE_HIDDEN: usize = 30;

/// Smallest scan edge the whole-scan CNN accepts: four 2x2 pools
pub const CNN_MIN_SCAN_SIZE: usize = 16;

/// (kernel, followed by 2x2 max pool) for each patch classifier block
const FCN_LAYOUT: [(usize, bool); 4] = [(4, true), (4, true), (3, true), (3, false)];

/// A model producing two class logits per input.
pub trait Classifier<B: Backend> {
    /// `[N, 1, H, W]` -> `[N, 2]`
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Smallest scan edge the model can score.
    fn min_scan_size(&self) -> usize;
}

/// A model producing a two-channel logit map per input.
pub trait FullyConvolutional<B: Backend> {
    /// `[N, 1, H, W]` -> `[N, 2, h, w]`
    fn logit_map(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Positive-class probability at every location, `[N, 1, h, w]`.
    fn risk_map(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let probs = softmax(self.logit_map(images), 1);
        let [n, _, h, w] = probs.dims();
        probs.slice([0..n, 1..2, 0..h, 0..w])
    }
}

/// A patch classifier that can be rewritten as a fully-convolutional one.
pub trait DenseToConv<B: Backend> {
    type Inference: FullyConvolutional<B>;

    fn dense_to_conv(&self) -> Self::Inference;
}

/// Configuration for the whole-scan CNN
#[derive(Config, Debug)]
pub struct ScanCnnConfig {
    /// Filters in the first block, doubled per block
    #[config(default = "20")]
    pub filters: usize,

    /// Dropout rate before the classifier head
    #[config(default = "0.5")]
    pub dropout: f64,

    /// Number of input channels
    #[config(default = "1")]
    pub in_channels: usize,

    /// Number of output classes
    #[config(default = "2")]
    pub num_classes: usize,
}

impl ScanCnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ScanCnn<B> {
        let base = self.filters;

        let conv1 = ConvBlock::new(self.in_channels, base, device);
        let conv2 = ConvBlock::new(base, base * 2, device);
        let conv3 = ConvBlock::new(base * 2, base * 4, device);
        let conv4 = ConvBlock::new(base * 4, base * 8, device);

        ScanCnn {
            conv1,
            conv2,
            conv3,
            conv4,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(base * 8, 32).init(device),
            fc2: LinearConfig::new(32, self.num_classes).init(device),
        }
    }
}

/// Conv 3x3 (same padding), BatchNorm, ReLU, 2x2 max pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Whole-scan classifier
///
/// Architecture:
/// - 4 conv blocks with doubling filter counts
/// - Global average pooling
/// - Dropout and a two-layer head
#[derive(Module, Debug)]
pub struct ScanCnn<B: Backend> {
    pub conv1: ConvBlock<B>,
    pub conv2: ConvBlock<B>,
    pub conv3: ConvBlock<B>,
    pub conv4: ConvBlock<B>,
    pub global_pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
}

impl<B: Backend> ScanCnn<B> {
    /// `[N, C, H, W]` (H, W >= [`CNN_MIN_SCAN_SIZE`]) -> logits `[N, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout.forward(x);
        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        self.fc2.forward(x)
    }
}

impl<B: Backend> Classifier<B> for ScanCnn<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }

    fn min_scan_size(&self) -> usize {
        CNN_MIN_SCAN_SIZE
    }
}

/// Configuration for the patch classifier
#[derive(Config, Debug)]
pub struct PatchFcnConfig {
    /// Filters in every conv block
    #[config(default = "20")]
    pub filters: usize,

    /// Dropout rate
    #[config(default = "0.5")]
    pub dropout: f64,

    /// Edge length of the square training patch
    #[config(default = "47")]
    pub patch_size: usize,

    /// Number of input channels
    #[config(default = "1")]
    pub in_channels: usize,
}

impl PatchFcnConfig {
    /// Edge length of the feature map the conv stack leaves of one patch.
    pub fn feature_extent(&self) -> patchdx_core::Result<usize> {
        let mut size = self.patch_size;
        for (kernel, pooled) in FCN_LAYOUT {
            if size < kernel {
                return Err(self.too_small());
            }
            size = size - kernel + 1;
            if pooled {
                if size < 2 {
                    return Err(self.too_small());
                }
                size /= 2;
            }
        }
        Ok(size)
    }

    fn too_small(&self) -> Error {
        Error::Config(format!(
            "patch size {} is too small for the patch classifier",
            self.patch_size
        ))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> patchdx_core::Result<PatchFcn<B>> {
        if self.filters == 0 {
            return Err(Error::Config("filters must be greater than 0".to_string()));
        }
        let extent = self.feature_extent()?;

        let mut in_channels = self.in_channels;
        let blocks = FCN_LAYOUT
            .iter()
            .map(|&(kernel, pooled)| {
                let block = FcnBlock::new(in_channels, self.filters, kernel, pooled, device);
                in_channels = self.filters;
                block
            })
            .collect();

        Ok(PatchFcn {
            blocks,
            dropout: DropoutConfig::new(self.dropout).init(),
            dense1: LinearConfig::new(self.filters * extent * extent, DENSE_HIDDEN).init(device),
            dense2: LinearConfig::new(DENSE_HIDDEN, 2).init(device),
            filters: self.filters,
            patch_size: self.patch_size,
            extent,
        })
    }
}

/// Valid-padding conv, ReLU and an optional 2x2 max pool
#[derive(Module, Debug)]
pub struct FcnBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> FcnBlock<B> {
    fn new(in_channels: usize, out_channels: usize, kernel: usize, pooled: bool, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [kernel, kernel]).init(device),
            relu: Relu::new(),
            pool: pooled.then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init()),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.conv.forward(x));
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Patch classifier with a dense head
#[derive(Module, Debug)]
pub struct PatchFcn<B: Backend> {
    pub blocks: Vec<FcnBlock<B>>,
    pub dropout: Dropout,
    pub dense1: Linear<B>,
    pub dense2: Linear<B>,
    filters: usize,
    patch_size: usize,
    extent: usize,
}

impl<B: Backend> PatchFcn<B> {
    /// `[N, C, patch, patch]` -> logits `[N, 2]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(x);
        let x = self.dropout.forward(x);

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.dense1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.dense2.forward(x)
    }

    fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    /// Edge length of the feature map entering the dense head
    pub fn extent(&self) -> usize {
        self.extent
    }
}

impl<B: Backend> Classifier<B> for PatchFcn<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }

    fn min_scan_size(&self) -> usize {
        self.patch_size
    }
}

impl<B: Backend> DenseToConv<B> for PatchFcn<B> {
    type Inference = PatchFcnInference<B>;

    /// Each dense layer becomes a conv whose kernel is its weight matrix
    /// transposed and reshaped over the incoming feature map.
    fn dense_to_conv(&self) -> PatchFcnInference<B> {
        let conv1 = dense_as_conv(&self.dense1, self.filters, self.extent);
        let conv2 = dense_as_conv(&self.dense2, DENSE_HIDDEN, 1);

        PatchFcnInference {
            blocks: self.blocks.clone(),
            conv1,
            relu: Relu::new(),
            conv2,
        }
    }
}

fn dense_as_conv<B: Backend>(dense: &Linear<B>, channels: usize, extent: usize) -> Conv2d<B> {
    let weight = dense.weight.val();
    let device = weight.device();
    let [_, outputs] = weight.dims();

    let mut conv = Conv2dConfig::new([channels, outputs], [extent, extent]).init(&device);
    conv.weight = Param::from_tensor(weight.transpose().reshape([outputs, channels, extent, extent]));
    conv.bias = dense.bias.as_ref().map(|bias| Param::from_tensor(bias.val()));
    conv
}

/// Fully-convolutional form of [`PatchFcn`] for sliding-window inference
#[derive(Module, Debug)]
pub struct PatchFcnInference<B: Backend> {
    pub blocks: Vec<FcnBlock<B>>,
    pub conv1: Conv2d<B>,
    pub relu: Relu,
    pub conv2: Conv2d<B>,
}

impl<B: Backend> PatchFcnInference<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = self.relu.forward(self.conv1.forward(x));
        self.conv2.forward(x)
    }
}

impl<B: Backend> FullyConvolutional<B> for PatchFcnInference<B> {
    fn logit_map(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_scan_cnn_output_shape() {
        let device = Default::default();
        let model = ScanCnnConfig::new().with_filters(2).init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random([3, 1, 32, 40], Distribution::Default, &device);
        assert_eq!(model.forward(input).dims(), [3, 2]);
        assert_eq!(model.min_scan_size(), CNN_MIN_SCAN_SIZE);
    }

    #[test]
    fn test_feature_extent() {
        assert_eq!(PatchFcnConfig::new().feature_extent().unwrap(), 1);
        assert_eq!(PatchFcnConfig::new().with_patch_size(41).feature_extent().unwrap(), 1);
        assert_eq!(PatchFcnConfig::new().with_patch_size(63).feature_extent().unwrap(), 3);
        assert!(matches!(
            PatchFcnConfig::new().with_patch_size(40).feature_extent(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_dense_to_conv_matches_dense_output() {
        let device = Default::default();
        let model = PatchFcnConfig::new()
            .with_filters(3)
            .with_patch_size(63)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(model.extent(), 3);

        let patch = Tensor::<TestBackend, 4>::random([2, 1, 63, 63], Distribution::Default, &device);
        let dense = model.forward(patch.clone());
        let conv = model.dense_to_conv().logit_map(patch);
        assert_eq!(conv.dims(), [2, 2, 1, 1]);

        let dense: Vec<f32> = dense.into_data().to_vec().unwrap();
        let conv: Vec<f32> = conv.reshape([2, 2]).into_data().to_vec().unwrap();
        for (a, b) in dense.iter().zip(&conv) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn test_risk_map_over_whole_scan() {
        let device = Default::default();
        let model = PatchFcnConfig::new().with_filters(2).init::<TestBackend>(&device).unwrap();
        let fcn = model.dense_to_conv();

        let scan = Tensor::<TestBackend, 4>::random([1, 1, 63, 71], Distribution::Default, &device);
        let risk = fcn.risk_map(scan);
        let [n, c, h, w] = risk.dims();
        assert_eq!((n, c), (1, 1));
        assert!(h > 1 && w > h);

        let values: Vec<f32> = risk.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_patch_fcn_rejects_small_patch() {
        let device = Default::default();
        let result = PatchFcnConfig::new().with_patch_size(20).init::<TestBackend>(&device);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_patch_fcn_min_scan_size_is_patch() {
        let device = Default::default();
        let model = PatchFcnConfig::new()
            .with_filters(2)
            .with_patch_size(41)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(model.min_scan_size(), 41);
    }
}
