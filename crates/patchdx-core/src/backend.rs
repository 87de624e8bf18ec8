//! Backend selection for the Burn framework.
//!
//! NdArray (CPU) is the default; building with the `cuda` feature switches
//! every alias to the CUDA backend.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn_ndarray::NdArray<f32>;

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device of the default backend
pub type DefaultDevice = <DefaultBackend as Backend>::Device;

/// Get the default device
pub fn default_device() -> DefaultDevice {
    DefaultDevice::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }
    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name() {
        assert!(!backend_name().is_empty());
    }
}
