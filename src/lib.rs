pub mod config;
pub mod detection;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod pipeline;

pub use config::{Config, CropPolicy};
pub use detection::{Detector, DetectorFactory, YoloDetector, YoloFactory, YoloParams};
pub use error::{ConfigError, SkipReason, TaskError};
pub use models::{
    ArchiveTask, BoundingBox, ClassId, DecodedImage, DetectionResult, EntryRef, ImageEntry,
    OutputDecision,
};
pub use orchestrator::{ArchiveReport, ArchiveStatus, Orchestrator, Summary};
pub use output::{OutputLayout, OutputRouter, WriteOutcome};
pub use pipeline::{
    ArchiveCounts, Batch, BatchAccumulator, WorkerResult, WorkerSettings, WorkerUnit,
};
