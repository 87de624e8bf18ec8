//! Training CLI Tool
//!
//! Trains a whole-scan CNN or a patch FCN for a number of repeated runs
//! (one data split per run index), tests each run on its held-out set and
//! reports the mean and standard deviation of the test metric.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use patchdx_core::cli::{load_toml_config, setup_cli_logging};
use patchdx_core::{backend_name, default_device, ExperimentConfig, ImbalanceMode, ModelKind, TrainingBackend};
use patchdx_training::{CnnController, ControllerSettings, FcnController, PatchFcnConfig, ScanCnnConfig};
use serde::Serialize;
use tracing::info;

/// Patch-based scan classification training tool
#[derive(Parser, Debug)]
#[command(
    name = "patchdx-train",
    about = "Train and test scan classifiers",
    long_about = "Train a whole-scan CNN or a patch FCN over repeated data splits, \
                  keep the best checkpoint per run and report held-out test metrics."
)]
struct Args {
    /// Path to experiment configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Override learning rate
    #[arg(short, long, value_name = "LR")]
    lr: Option<f64>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Override imbalance handling: 0 = loss weight, 1 = weighted sampler
    #[arg(long, value_name = "0|1")]
    balanced: Option<u8>,

    /// Override validation metric (accuracy or mcc)
    #[arg(short, long, value_name = "NAME")]
    metric: Option<String>,

    /// Override number of repeated runs
    #[arg(short, long, value_name = "N")]
    runs: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Dry run (validate config without training)
    #[arg(long)]
    dry_run: bool,
}

/// Outcome of one train/test run
#[derive(Debug, Clone, Serialize)]
struct RunOutcome {
    run_index: usize,
    valid_metric: f64,
    test_metric: f64,
}

/// Summary written next to the run directories
#[derive(Debug, Serialize)]
struct ExperimentSummary {
    timestamp: String,
    model: String,
    metric: String,
    runs: Vec<RunOutcome>,
    test_mean: f64,
    test_std: f64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    setup_cli_logging(args.verbose)?;

    info!("Patch-based scan classification - Training Tool");
    info!("===============================================");

    let mut config: ExperimentConfig =
        load_toml_config(&args.config).context("Failed to load configuration file")?;

    apply_overrides(&mut config, &args)?;
    validate_config(&config)?;
    print_config_summary(&config);

    if args.dry_run {
        info!("Configuration validated successfully (dry run)");
        return Ok(());
    }

    let mut outcomes = Vec::with_capacity(config.data.runs);
    for run_index in 0..config.data.runs {
        println!(
            "{}",
            format!("Run {}/{}", run_index + 1, config.data.runs).yellow().bold()
        );
        let outcome = run_once(&config, run_index)
            .with_context(|| format!("Run {run_index} failed"))?;
        println!(
            "  {} valid {}: {:.4} | test {}: {:.4}",
            "→".cyan(),
            config.training.metric,
            outcome.valid_metric,
            config.training.metric,
            outcome.test_metric
        );
        outcomes.push(outcome);
    }

    let summary = summarize(&config, outcomes);
    let summary_path = write_summary(&config.output.checkpoint_root, &summary)?;

    println!();
    println!("{}", "Experiment Complete!".green().bold());
    println!(
        "  Test {}: {:.4} ± {:.4} over {} runs",
        summary.metric,
        summary.test_mean,
        summary.test_std,
        summary.runs.len()
    );
    println!("  Summary: {}", summary_path.display());

    Ok(())
}

fn apply_overrides(config: &mut ExperimentConfig, args: &Args) -> Result<()> {
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(lr) = args.lr {
        config.training.learning_rate = lr;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(flag) = args.balanced {
        config.training.imbalance = ImbalanceMode::from_balanced(flag)?;
    }
    if let Some(ref metric) = args.metric {
        config.training.metric = metric.clone();
    }
    if let Some(runs) = args.runs {
        config.data.runs = runs;
    }
    Ok(())
}

fn validate_config(config: &ExperimentConfig) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    config
        .training
        .metric
        .parse::<patchdx_core::EvalMetric>()
        .context("Invalid validation metric")?;

    if !config.data.data_dir.exists() {
        anyhow::bail!("Data directory does not exist: {}", config.data.data_dir.display());
    }

    if config.model.kind == ModelKind::Fcn {
        PatchFcnConfig::new()
            .with_patch_size(config.model.patch_size)
            .feature_extent()
            .context("Invalid patch size")?;
    }

    Ok(())
}

fn print_config_summary(config: &ExperimentConfig) {
    info!("");
    info!("Configuration Summary:");
    info!("  Model: {} ({})", config.model.kind, config.output.model_name);
    info!("  Filters: {}", config.model.filters);
    info!("  Dropout: {}", config.model.dropout);
    if config.model.kind == ModelKind::Fcn {
        info!("  Patch size: {}", config.model.patch_size);
    }
    info!("  Epochs: {}", config.training.epochs);
    info!("  Batch size: {}", config.training.batch_size);
    info!("  Learning rate: {}", config.training.learning_rate);
    info!("  Imbalance: {}", config.training.imbalance);
    info!("  Metric: {}", config.training.metric);
    info!("  Data dir: {}", config.data.data_dir.display());
    info!("  Seed: {}", config.data.seed);
    info!("  Runs: {}", config.data.runs);
    info!("  Checkpoint root: {}", config.output.checkpoint_root.display());
    info!("  Backend: {}", backend_name());
    info!("");
}

fn run_once(config: &ExperimentConfig, run_index: usize) -> Result<RunOutcome> {
    let settings = ControllerSettings::from_config(config, run_index);
    let device = default_device();
    let lr = config.training.learning_rate;
    let epochs = config.training.epochs;

    let (valid_metric, test_metric) = match config.model.kind {
        ModelKind::Cnn => {
            let model_config = ScanCnnConfig::new()
                .with_filters(config.model.filters)
                .with_dropout(config.model.dropout);
            let mut controller = CnnController::<TrainingBackend>::cnn(&model_config, settings, device)?;
            let valid = controller.train(lr, epochs)?;
            (valid, controller.test()?)
        }
        ModelKind::Fcn => {
            let model_config = PatchFcnConfig::new()
                .with_filters(config.model.filters)
                .with_dropout(config.model.dropout)
                .with_patch_size(config.model.patch_size);
            let mut controller = FcnController::<TrainingBackend>::fcn(&model_config, settings, device)?;
            let valid = controller.train(lr, epochs)?;
            (valid, controller.test()?)
        }
    };

    Ok(RunOutcome {
        run_index,
        valid_metric,
        test_metric,
    })
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn summarize(config: &ExperimentConfig, runs: Vec<RunOutcome>) -> ExperimentSummary {
    let tests: Vec<f64> = runs.iter().map(|r| r.test_metric).collect();
    let (test_mean, test_std) = mean_std(&tests);
    ExperimentSummary {
        timestamp: Utc::now().to_rfc3339(),
        model: config.output.model_name.clone(),
        metric: config.training.metric.clone(),
        runs,
        test_mean,
        test_std,
    }
}

fn write_summary(checkpoint_root: &Path, summary: &ExperimentSummary) -> Result<PathBuf> {
    std::fs::create_dir_all(checkpoint_root).context("Failed to create checkpoint root")?;
    let path = checkpoint_root.join(format!("{}_summary.json", summary.model));
    std::fs::write(&path, serde_json::to_string_pretty(summary)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Summary saved to {}", path.display());
    Ok(path)
}
