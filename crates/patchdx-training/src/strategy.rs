//! Evaluation strategies for validation and test passes.
//!
//! The controller runs the same epoch loop for every model family; what
//! differs is how a held-out provider is scored. [`PatchScoring`] scores
//! each example with the classifier directly. [`SlidingWindow`] converts
//! a patch classifier to its fully-convolutional form and turns every
//! subject into a decision map before scoring.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use patchdx_core::{dpm_statistics, ConfusionMatrix, DecisionMap, DpmSummary, Error, Result, ScoreRecord};
use patchdx_dataset::DataProvider;
use tracing::{debug, info};

use crate::model::{Classifier, DenseToConv, FullyConvolutional};

/// Outcome of scoring one provider
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub matrix: ConfusionMatrix,
    /// One record per scored example (or subject)
    pub scores: Vec<ScoreRecord>,
    /// Present when scores were aggregated from decision maps
    pub dpm: Option<DpmSummary>,
}

/// Scores every example of a provider with an inference-mode model.
pub trait EvaluationStrategy<B: Backend, M> {
    fn name(&self) -> &'static str;

    fn evaluate(&self, model: &M, provider: &mut DataProvider, device: &B::Device) -> Result<Evaluation>;
}

/// Direct scoring: argmax of the two logits per example.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchScoring;

impl<B: Backend, M: Classifier<B>> EvaluationStrategy<B, M> for PatchScoring {
    fn name(&self) -> &'static str {
        "patch-scoring"
    }

    fn evaluate(&self, model: &M, provider: &mut DataProvider, device: &B::Device) -> Result<Evaluation> {
        let mut matrix = ConfusionMatrix::new();
        let mut scores = Vec::with_capacity(provider.len());

        for indices in provider.plan_epoch()? {
            let batch = provider.batch::<B>(&indices, device);
            let values = to_floats(model.logits(batch.images))?;

            matrix += ConfusionMatrix::from_scores(&values, &batch.labels)?;
            scores.extend(
                values
                    .chunks_exact(2)
                    .zip(&batch.labels)
                    .map(|(row, &label)| ScoreRecord::new(row[0], row[1], label)),
            );
        }

        debug!("Scored {} examples: {}", scores.len(), matrix);
        Ok(Evaluation {
            matrix,
            scores,
            dpm: None,
        })
    }
}

/// Sliding-window scoring through decision probability maps.
///
/// The score record of a subject is `(1 - mean risk, mean risk)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingWindow;

impl<B: Backend, M: DenseToConv<B>> EvaluationStrategy<B, M> for SlidingWindow {
    fn name(&self) -> &'static str {
        "sliding-window"
    }

    fn evaluate(&self, model: &M, provider: &mut DataProvider, device: &B::Device) -> Result<Evaluation> {
        let fcn = model.dense_to_conv();
        let mut maps = Vec::with_capacity(provider.len());
        let mut labels = Vec::with_capacity(provider.len());
        let mut scores = Vec::with_capacity(provider.len());

        for indices in provider.plan_epoch()? {
            let batch = provider.batch::<B>(&indices, device);
            let risk = fcn.risk_map(batch.images);
            let [_, _, rows, cols] = risk.dims();
            let values = to_floats(risk)?;

            for (chunk, &label) in values.chunks_exact(rows * cols).zip(&batch.labels) {
                let map = DecisionMap::new(rows, cols, chunk.to_vec())?;
                let mean = map.mean_risk();
                scores.push(ScoreRecord::new(1.0 - mean, mean, label));
                maps.push(map);
                labels.push(label);
            }
        }

        let summary = dpm_statistics(&maps, &labels)?;
        info!(
            "DPM over {} subjects: accuracy {:.4}, F1 {:.4}, MCC {:.4}, location accuracy {:.4}",
            maps.len(),
            summary.accuracy,
            summary.f1,
            summary.mcc,
            summary.location_accuracy
        );

        Ok(Evaluation {
            matrix: summary.matrix,
            scores,
            dpm: Some(summary),
        })
    }
}

fn to_floats<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Model(format!("Failed to read tensor data: {e:?}")))
}
