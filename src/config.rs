use crate::error::ConfigError;
use crate::models::ClassId;
use clap::ValueEnum;
use serde::Serialize;
use std::path::PathBuf;

pub const DEFAULT_BATCH_SIZE: usize = 16;
pub const DEFAULT_CLASS: ClassId = 0;
pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const MAX_INPUT_SIZE: u32 = 4096;
pub const DEFAULT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// How many crops to write for an image with several detections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CropPolicy {
    /// Only the most confident detection
    #[default]
    First,
    /// One crop per detection
    All,
}

/// Validated run settings
#[derive(Debug, Clone)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub model_path: PathBuf,
    pub workers: usize,
    pub batch_size: usize,
    pub class: ClassId,
    pub extensions: Vec<String>,
    pub confidence: f32,
    pub input_size: u32,
    pub crop_policy: CropPolicy,
    pub report: Option<PathBuf>,
    pub debug_out: Option<PathBuf>,
    pub show_progress: bool,
}

impl Config {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            model_path: PathBuf::from("yolov8s.rten"),
            workers: default_workers(),
            batch_size: DEFAULT_BATCH_SIZE,
            class: DEFAULT_CLASS,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            confidence: DEFAULT_CONFIDENCE,
            input_size: DEFAULT_INPUT_SIZE,
            crop_policy: CropPolicy::First,
            report: None,
            debug_out: None,
            show_progress: false,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_class(mut self, class: ClassId) -> Self {
        self.class = class;
        self
    }

    pub fn with_crop_policy(mut self, policy: CropPolicy) -> Self {
        self.crop_policy = policy;
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn with_debug(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_out = dir;
        self
    }

    /// Reject settings that can never produce a valid run
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.input_size == 0 || self.input_size > MAX_INPUT_SIZE {
            return Err(ConfigError::InvalidInputSize {
                size: self.input_size,
                max: MAX_INPUT_SIZE,
            });
        }
        if !(self.confidence > 0.0 && self.confidence <= 1.0) {
            return Err(ConfigError::InvalidConfidence(self.confidence));
        }
        if self.extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }
        if !self.input_dir.is_dir() {
            return Err(ConfigError::MissingInput(self.input_dir.clone()));
        }
        // Debug output must not mix with a previous run
        if let Some(dir) = &self.debug_out {
            let occupied = std::fs::read_dir(dir)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
            if occupied {
                return Err(ConfigError::DebugDirNotEmpty(dir.clone()));
            }
        }
        Ok(self)
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
