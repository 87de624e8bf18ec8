//! Core types and utilities for patch-based scan classification.
//!
//! This crate provides the error type, experiment configuration, binary
//! classification metrics and decision-map statistics shared by the
//! dataset and training crates.

pub mod backend;
pub mod cli;
pub mod config;
pub mod dpm;
pub mod error;
pub mod metrics;
pub mod scores;
pub mod timing;

pub use backend::*;
pub use config::*;
pub use dpm::{dpm_statistics, DecisionMap, DpmSummary};
pub use error::{Error, Result};
pub use metrics::{ConfusionMatrix, EvalMetric};
pub use scores::{RawScoreWriter, ScoreRecord};
pub use timing::timed;

