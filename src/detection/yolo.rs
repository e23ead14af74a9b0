use crate::detection::postprocess::{self, PostprocessParams, Predictions};
use crate::detection::{Detector, preprocessing};
use crate::models::{ClassId, DecodedImage, DetectionResult};
use anyhow::Context;
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct YoloParams {
    /// Side of the square model input
    pub input_size: u32,
    pub postprocess: PostprocessParams,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            postprocess: PostprocessParams::default(),
        }
    }
}

/// YOLOv8 detector running a `.rten` model on the CPU
pub struct YoloDetector {
    model: Model,
    params: YoloParams,
}

impl YoloDetector {
    /// Load the model, failing early with a hint if the file is missing
    pub fn load(model_path: &Path, params: YoloParams) -> anyhow::Result<Self> {
        if !model_path.is_file() {
            anyhow::bail!(
                "Detection model not found: {}\n\
                 Export YOLOv8 to ONNX with a dynamic batch axis, \
                 then convert it with `rten-convert`.",
                model_path.display()
            );
        }

        let model = Model::load_file(model_path)
            .with_context(|| format!("Failed to load detection model {:?}", model_path))?;

        Ok(Self { model, params })
    }
}

impl Detector for YoloDetector {
    fn detect(
        &mut self,
        batch: &[DecodedImage],
        class: ClassId,
    ) -> anyhow::Result<Vec<DetectionResult>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let size = self.params.input_size;
        let data = preprocessing::batch_to_nchw(batch, size);
        let input = NdTensor::from_data([batch.len(), 3, size as usize, size as usize], data);

        let output = self
            .model
            .run_one(input.view().into(), None)
            .context("Detection model run failed")?;
        let output: NdTensor<f32, 3> = output
            .try_into()
            .map_err(|e| anyhow::anyhow!("Unexpected detection output: {:?}", e))?;

        let shape = output.shape();
        let values = output.to_vec();
        let predictions = Predictions::new(&values, shape)?;

        if predictions.batch_len() != batch.len() {
            anyhow::bail!(
                "Model produced {} outputs for {} images (is the batch axis dynamic?)",
                predictions.batch_len(),
                batch.len()
            );
        }
        if class >= predictions.class_count() {
            anyhow::bail!(
                "Class {} is outside the model's {} classes",
                class,
                predictions.class_count()
            );
        }

        let results = batch
            .iter()
            .enumerate()
            .map(|(n, item)| {
                let dims = (item.width(), item.height());
                let scale = preprocessing::scale_factors(item.width(), item.height(), size);
                let boxes = postprocess::extract_boxes(
                    &predictions,
                    n,
                    class,
                    dims,
                    scale,
                    &self.params.postprocess,
                );
                debug!("{}: {} detections", item.entry, boxes.len());
                DetectionResult::new(item.entry.clone(), boxes)
            })
            .collect();

        Ok(results)
    }

    fn name(&self) -> &str {
        "YOLOv8 (rten)"
    }
}
