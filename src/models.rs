use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::path::PathBuf;

/// COCO class index understood by the detector (0 = person).
pub type ClassId = usize;

/// One archive file discovered under the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTask {
    pub path: PathBuf,
    /// File name with the archive suffix stripped, used to qualify output names
    pub id: String,
}

impl ArchiveTask {
    pub fn new(path: PathBuf, id: impl Into<String>) -> Self {
        Self { path, id: id.into() }
    }
}

/// Identifies an image by its archive and its name inside that archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryRef {
    pub archive_id: String,
    pub name: String,
}

impl EntryRef {
    pub fn new(archive_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            archive_id: archive_id.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for EntryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.archive_id, self.name)
    }
}

/// Raw payload of an allow-listed archive member.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub entry: EntryRef,
    pub bytes: Vec<u8>,
}

/// A successfully decoded image. Width and height are always > 0.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub entry: EntryRef,
    pub image: DynamicImage,
    /// Container format the payload was decoded from
    pub format: ImageFormat,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }
}

/// Detection box in pixel coordinates of the source image.
/// `x2` and `y2` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub score: f32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32, score: f32) -> Self {
        Self { x1, y1, x2, y2, score }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Clip the box to `[0, width) x [0, height)`
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x1 = self.x1.min(width);
        let y1 = self.y1.min(height);
        Self {
            x1,
            y1,
            x2: self.x2.clamp(x1, width),
            y2: self.y2.clamp(y1, height),
            score: self.score,
        }
    }

    /// Extract the boxed region, or `None` if nothing of the box lies inside the image
    pub fn extract_roi(&self, img: &DynamicImage) -> Option<DynamicImage> {
        let clipped = self.clamp_to(img.width(), img.height());
        if clipped.is_empty() {
            return None;
        }
        Some(img.crop_imm(clipped.x1, clipped.y1, clipped.width(), clipped.height()))
    }
}

/// Detector output for one image of a batch.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub entry: EntryRef,
    /// Ordered by descending confidence
    pub boxes: Vec<BoundingBox>,
}

impl DetectionResult {
    pub fn new(entry: EntryRef, boxes: Vec<BoundingBox>) -> Self {
        Self { entry, boxes }
    }

    pub fn empty(entry: EntryRef) -> Self {
        Self::new(entry, Vec::new())
    }

    pub fn decision(&self) -> OutputDecision {
        if self.boxes.is_empty() {
            OutputDecision::PassThrough
        } else {
            OutputDecision::Cropped
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputDecision {
    Cropped,
    PassThrough,
}
