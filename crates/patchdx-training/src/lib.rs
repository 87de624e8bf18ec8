//! Training infrastructure for scan and patch classifiers.
//!
//! This crate provides:
//! - A whole-scan CNN and a patch FCN with its dense-to-conv inference form
//! - Evaluation strategies (direct scoring, sliding-window DPM aggregation)
//! - Explicit per-run state and single-file checkpoint retention
//! - The controller driving train, validate and test

pub mod checkpoint;
pub mod controller;
pub mod model;
pub mod state;
pub mod strategy;

pub use checkpoint::CheckpointManager;
pub use controller::{CnnController, Controller, ControllerSettings, FcnController};
pub use model::{
    Classifier, DenseToConv, FullyConvolutional, PatchFcn, PatchFcnConfig, PatchFcnInference, ScanCnn,
    ScanCnnConfig,
};
pub use state::{EpochRecord, RunState};
pub use strategy::{Evaluation, EvaluationStrategy, PatchScoring, SlidingWindow};
