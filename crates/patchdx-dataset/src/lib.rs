//! Scan datasets for patch-based classification.
//!
//! This crate provides:
//! - Lookup table reading (`exp<run>/{train,valid,test}.csv`)
//! - An in-memory scan dataset with whole-scan and random-patch views
//! - A Burn batcher producing `[N, 1, H, W]` image tensors
//! - Inverse-class-frequency sample weights
//! - Data providers with sequential, shuffled and weighted sampling

pub mod dataset;
pub mod lookup;
pub mod provider;
pub mod weights;

pub use dataset::{Scan, ScanBatch, ScanBatcher, ScanDataset, ScanItem, ScanView};
pub use lookup::{read_lookup, ScanRecord, Stage};
pub use provider::{DataProvider, DataProviders, LoaderSettings, SamplingStrategy};
pub use weights::{class_sample_weights, ClassWeights};
