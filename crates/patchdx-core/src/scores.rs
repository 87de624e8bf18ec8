//! Raw prediction score export.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Result;

/// Two class scores and the true label of one test example.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub negative: f32,
    pub positive: f32,
    pub label: usize,
}

impl ScoreRecord {
    pub fn new(negative: f32, positive: f32, label: usize) -> Self {
        Self {
            negative,
            positive,
            label,
        }
    }
}

/// Writes one `score0 score1 label` line per record.
pub struct RawScoreWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl RawScoreWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            writer,
            lines: 0,
        })
    }

    pub fn write(&mut self, record: &ScoreRecord) -> Result<()> {
        writeln!(
            self.writer,
            "{} {} {}",
            record.negative, record.positive, record.label
        )?;
        self.lines += 1;
        Ok(())
    }

    pub fn write_all<'a>(&mut self, records: impl IntoIterator<Item = &'a ScoreRecord>) -> Result<()> {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    /// Flush to disk and return the number of lines written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        info!("Wrote {} raw scores to {:?}", self.lines, self.path);
        Ok(self.lines)
    }
}
