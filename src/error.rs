use std::path::PathBuf;
use thiserror::Error;

/// Invalid settings, rejected before any archive is touched.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("model input size must be between 1 and {max}, got {size}")]
    InvalidInputSize { size: u32, max: u32 },

    #[error("confidence threshold must be in (0, 1], got {0}")]
    InvalidConfidence(f32),

    #[error("image extension allow-list is empty")]
    NoExtensions,

    #[error("input directory does not exist: {0}")]
    MissingInput(PathBuf),

    #[error("debug directory is not empty: {0}")]
    DebugDirNotEmpty(PathBuf),
}

/// Failures that end the processing of one archive. Other archives are unaffected.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("cannot open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read archive {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("detector returned {actual} results for a batch of {expected}")]
    ResultCountMismatch { expected: usize, actual: usize },

    #[error("no worker was available to process the archive")]
    WorkerUnavailable,
}

/// Per-image failures that are counted and logged, never fatal.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("empty payload")]
    Empty,

    #[error("unrecognised image data: {0}")]
    UnknownFormat(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("member declares {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("image has a zero dimension ({width}x{height})")]
    ZeroSized { width: u32, height: u32 },

    #[error("detection box lies outside the image")]
    EmptyCrop,

    #[error("write to {path} failed: {message}")]
    Write { path: PathBuf, message: String },
}
