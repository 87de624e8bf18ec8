//! Lookup tables mapping scan files to labels.
//!
//! Each run index has its own split under `<data_dir>/exp<run>/`, one CSV
//! per stage with a `filename,label` header. Filenames are relative to
//! `data_dir`.

use std::fmt;
use std::path::{Path, PathBuf};

use patchdx_core::{Error, Result};
use serde::Deserialize;
use tracing::debug;

/// Dataset stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Train,
    Valid,
    Test,
}

impl Stage {
    pub fn file_name(&self) -> &'static str {
        match self {
            Stage::Train => "train.csv",
            Stage::Valid => "valid.csv",
            Stage::Test => "test.csv",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Train => write!(f, "train"),
            Stage::Valid => write!(f, "valid"),
            Stage::Test => write!(f, "test"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupRow {
    filename: String,
    label: usize,
}

/// One scan and its binary label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub path: PathBuf,
    pub label: usize,
}

/// Path of the lookup table for `stage` of run `run_index`.
pub fn lookup_path(data_dir: &Path, run_index: usize, stage: Stage) -> PathBuf {
    data_dir.join(format!("exp{run_index}")).join(stage.file_name())
}

/// Read the lookup table for one stage of one run.
pub fn read_lookup(data_dir: &Path, run_index: usize, stage: Stage) -> Result<Vec<ScanRecord>> {
    let path = lookup_path(data_dir, run_index, stage);
    if !path.exists() {
        return Err(Error::NotFound(format!("lookup table {}", path.display())));
    }

    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(&path)?;
    let mut records = Vec::new();

    for (line, row) in reader.deserialize::<LookupRow>().enumerate() {
        let row = row?;
        if row.label > 1 {
            return Err(Error::Dataset(format!(
                "{}: row {} has label {}, expected 0 or 1",
                path.display(),
                line + 1,
                row.label
            )));
        }
        records.push(ScanRecord {
            path: data_dir.join(&row.filename),
            label: row.label,
        });
    }

    if records.is_empty() {
        return Err(Error::Dataset(format!("{} has no rows", path.display())));
    }

    debug!("Read {} {} records from {:?}", records.len(), stage, path);
    Ok(records)
}
