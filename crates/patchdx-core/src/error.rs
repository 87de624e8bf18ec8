//! One error enum for loading scans, training and checkpointing.

use thiserror::Error;

/// Every fallible library call in patchdx returns this.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem access to scans, tables or run directories
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A scan that could not be decoded
    #[error("Image processing error: {0}")]
    Image(String),

    /// A malformed `filename,label` table
    #[error("CSV error: {0}")]
    Csv(String),

    /// Bad layer geometry or unreadable tensor data
    #[error("Model error: {0}")]
    Model(String),

    /// Labels, splits or scan sizes the models cannot use
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Experiment settings, including unknown metric names
    #[error("Configuration error: {0}")]
    Config(String),

    /// Controller used out of order
    #[error("Training error: {0}")]
    Training(String),

    /// Recorder failure while writing or reading weights
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Run state or summary JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing lookup table or checkpoint
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Csv(err.to_string())
    }
}

impl From<burn::record::RecorderError> for Error {
    fn from(err: burn::record::RecorderError) -> Self {
        Error::Checkpoint(err.to_string())
    }
}

/// `Result` over [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
