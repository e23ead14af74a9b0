pub mod postprocess;
pub mod preprocessing;
pub mod yolo;

use crate::models::{ClassId, DecodedImage, DetectionResult};
use std::path::PathBuf;

pub use yolo::{YoloDetector, YoloParams};

/// Black-box object detector.
///
/// `detect` returns exactly one result per input image, in input order, and
/// must not modify the batch. Instances are not shared between workers, so
/// implementations are free to keep mutable scratch state.
pub trait Detector {
    fn detect(
        &mut self,
        batch: &[DecodedImage],
        class: ClassId,
    ) -> anyhow::Result<Vec<DetectionResult>>;

    /// Human-readable name for this backend (used in logs)
    fn name(&self) -> &str;
}

/// Builds a private detector for each worker at worker start.
pub trait DetectorFactory: Send + Sync {
    fn create(&self) -> anyhow::Result<Box<dyn Detector>>;
}

/// Loads the `.rten` YOLO model once per worker
#[derive(Debug, Clone)]
pub struct YoloFactory {
    pub model_path: PathBuf,
    pub params: YoloParams,
}

impl DetectorFactory for YoloFactory {
    fn create(&self) -> anyhow::Result<Box<dyn Detector>> {
        Ok(Box::new(YoloDetector::load(&self.model_path, self.params.clone())?))
    }
}
