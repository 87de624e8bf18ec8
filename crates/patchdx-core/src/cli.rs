//! Start-up helpers for the `patchdx-train` binary.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

/// Route `tracing` output to stderr; `RUST_LOG`, when set, overrides `verbose`.
pub fn setup_cli_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

/// Read an experiment file; missing sections take their defaults.
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExperimentConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_toml_config_partial() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[training]\nepochs = 3\nmetric = \"mcc\"\n").unwrap();

        let config: ExperimentConfig = load_toml_config(file.path()).unwrap();
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.metric, "mcc");
        assert_eq!(config.training.batch_size, 10);
    }

    #[test]
    fn test_load_toml_config_missing_file() {
        let result: Result<ExperimentConfig> = load_toml_config(Path::new("/nonexistent/run.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
