use crate::models::{BoundingBox, ClassId};

/// Raw YOLOv8 head output laid out as `[batch, 4 + classes, anchors]`.
/// Rows 0..4 hold `cx, cy, w, h` in model-input pixels, the rest class scores.
pub struct Predictions<'a> {
    data: &'a [f32],
    batch: usize,
    rows: usize,
    anchors: usize,
}

impl<'a> Predictions<'a> {
    pub fn new(data: &'a [f32], shape: [usize; 3]) -> anyhow::Result<Self> {
        let [batch, rows, anchors] = shape;
        if rows <= 4 {
            anyhow::bail!(
                "Detector output has {} rows, expected box coordinates plus class scores",
                rows
            );
        }
        if data.len() != batch * rows * anchors {
            anyhow::bail!(
                "Detector output holds {} values, shape {:?} needs {}",
                data.len(),
                shape,
                batch * rows * anchors
            );
        }
        Ok(Self {
            data,
            batch,
            rows,
            anchors,
        })
    }

    pub fn batch_len(&self) -> usize {
        self.batch
    }

    pub fn class_count(&self) -> usize {
        self.rows - 4
    }

    fn at(&self, n: usize, row: usize, anchor: usize) -> f32 {
        self.data[(n * self.rows + row) * self.anchors + anchor]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PostprocessParams {
    pub confidence: f32,
    pub iou_threshold: f32,
}

impl Default for PostprocessParams {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou_threshold: 0.45,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

/// Boxes of `class` for image `n`, mapped to source pixels, clamped to
/// `width x height`, NMS-filtered and sorted by descending score.
pub fn extract_boxes(
    predictions: &Predictions<'_>,
    n: usize,
    class: ClassId,
    (width, height): (u32, u32),
    (scale_x, scale_y): (f32, f32),
    params: &PostprocessParams,
) -> Vec<BoundingBox> {
    if class >= predictions.class_count() || n >= predictions.batch_len() {
        return Vec::new();
    }

    let mut candidates: Vec<Candidate> = (0..predictions.anchors)
        .filter_map(|a| {
            let score = predictions.at(n, 4 + class, a);
            if score < params.confidence {
                return None;
            }
            let cx = predictions.at(n, 0, a);
            let cy = predictions.at(n, 1, a);
            let w = predictions.at(n, 2, a);
            let h = predictions.at(n, 3, a);
            Some(Candidate {
                x1: ((cx - w / 2.0) * scale_x).clamp(0.0, width as f32),
                y1: ((cy - h / 2.0) * scale_y).clamp(0.0, height as f32),
                x2: ((cx + w / 2.0) * scale_x).clamp(0.0, width as f32),
                y2: ((cy + h / 2.0) * scale_y).clamp(0.0, height as f32),
                score,
            })
        })
        .filter(|c| c.area() > 0.0)
        .collect();

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) < params.iou_threshold) {
            kept.push(candidate);
        }
    }

    kept.into_iter()
        .map(|c| {
            BoundingBox::new(
                c.x1.floor() as u32,
                c.y1.floor() as u32,
                c.x2.ceil() as u32,
                c.y2.ceil() as u32,
                c.score,
            )
            .clamp_to(width, height)
        })
        .filter(|b| !b.is_empty())
        .collect()
}
