use crate::config::CropPolicy;
use crate::error::SkipReason;
use crate::models::{DecodedImage, DetectionResult, EntryRef, OutputDecision};
use anyhow::Context;
use image::{DynamicImage, ImageFormat, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MATCHED_DIR: &str = "Person";
pub const UNMATCHED_DIR: &str = "No_Person";

/// The two class directories under the output root
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub matched: PathBuf,
    pub unmatched: PathBuf,
}

impl OutputLayout {
    /// Create both class directories. Existing directories and files are left alone.
    pub fn create(root: &Path) -> anyhow::Result<Self> {
        let layout = Self {
            root: root.to_path_buf(),
            matched: root.join(MATCHED_DIR),
            unmatched: root.join(UNMATCHED_DIR),
        };
        for dir in [&layout.matched, &layout.unmatched] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        }
        Ok(layout)
    }

    pub fn dir_for(&self, decision: OutputDecision) -> &Path {
        match decision {
            OutputDecision::Cropped => &self.matched,
            OutputDecision::PassThrough => &self.unmatched,
        }
    }
}

/// Percent-escape `reserved` characters and `%` itself, so distinct inputs
/// always give distinct outputs.
fn escape(value: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '%' || reserved.contains(&c) {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

/// `{archive}_{entry}` for pass-through copies, keeping the entry's extension.
/// The id escapes `_` (the separator) and the entry escapes path separators.
pub fn passthrough_file_name(entry: &EntryRef) -> String {
    format!(
        "{}_{}",
        escape(&entry.archive_id, &['_', '/', '\\']),
        escape(&entry.name, &['/', '\\'])
    )
}

/// `{archive}_{entry}_person_{index}.jpg` for crops
pub fn crop_file_name(entry: &EntryRef, index: usize) -> String {
    format!("{}_person_{}.jpg", passthrough_file_name(entry), index)
}

/// What happened to one routed image
#[derive(Debug)]
pub enum WriteOutcome {
    Cropped { files: Vec<PathBuf> },
    PassThrough { file: PathBuf },
    Failed { decision: OutputDecision, reason: SkipReason },
}

/// Writes crops or pass-through copies into the class directories.
#[derive(Debug, Clone)]
pub struct OutputRouter {
    layout: OutputLayout,
    policy: CropPolicy,
    debug_dir: Option<PathBuf>,
}

impl OutputRouter {
    pub fn new(layout: OutputLayout, policy: CropPolicy) -> Self {
        Self {
            layout,
            policy,
            debug_dir: None,
        }
    }

    /// Also write annotated copies of images with detections under `dir`
    pub fn with_debug(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn route(&self, image: &DecodedImage, result: &DetectionResult) -> WriteOutcome {
        match result.decision() {
            OutputDecision::PassThrough => self.write_passthrough(image),
            OutputDecision::Cropped => {
                if self.debug_dir.is_some() {
                    self.write_annotated(image, result);
                }
                self.write_crops(image, result)
            }
        }
    }

    fn write_passthrough(&self, image: &DecodedImage) -> WriteOutcome {
        let path = self
            .layout
            .dir_for(OutputDecision::PassThrough)
            .join(passthrough_file_name(&image.entry));

        match save_image(&image.image, &path, image.format) {
            Ok(()) => {
                debug!("{} -> {:?}", image.entry, path);
                WriteOutcome::PassThrough { file: path }
            }
            Err(reason) => WriteOutcome::Failed {
                decision: OutputDecision::PassThrough,
                reason,
            },
        }
    }

    fn write_crops(&self, image: &DecodedImage, result: &DetectionResult) -> WriteOutcome {
        let boxes = match self.policy {
            CropPolicy::First => &result.boxes[..1],
            CropPolicy::All => &result.boxes[..],
        };

        let dir = self.layout.dir_for(OutputDecision::Cropped);
        let mut files = Vec::with_capacity(boxes.len());
        for (index, bbox) in boxes.iter().enumerate() {
            let fail = |reason| WriteOutcome::Failed {
                decision: OutputDecision::Cropped,
                reason,
            };

            let Some(crop) = bbox.extract_roi(&image.image) else {
                return fail(SkipReason::EmptyCrop);
            };
            let path = dir.join(crop_file_name(&image.entry, index));
            if let Err(reason) = save_image(&crop, &path, ImageFormat::Jpeg) {
                return fail(reason);
            }
            debug!("{} box {} -> {:?}", image.entry, index, path);
            files.push(path);
        }

        WriteOutcome::Cropped { files }
    }

    /// Best effort; a failed debug write never affects routing
    fn write_annotated(&self, image: &DecodedImage, result: &DetectionResult) {
        let Some(root) = &self.debug_dir else {
            return;
        };
        let dir = root.join(&image.entry.archive_id);
        let path = dir.join(format!("{}_boxes.png", passthrough_file_name(&image.entry)));

        let mut canvas = image.image.to_rgb8();
        for bbox in &result.boxes {
            let clipped = bbox.clamp_to(canvas.width(), canvas.height());
            if clipped.is_empty() {
                continue;
            }
            let rect = Rect::at(clipped.x1 as i32, clipped.y1 as i32)
                .of_size(clipped.width(), clipped.height());
            draw_hollow_rect_mut(&mut canvas, rect, Rgb([255u8, 0, 0]));
        }

        let written = fs::create_dir_all(&dir)
            .map_err(|e| e.to_string())
            .and_then(|_| canvas.save(&path).map_err(|e| e.to_string()));
        if let Err(e) = written {
            warn!("Failed to save debug image {:?}: {}", path, e);
        }
    }
}

/// Encode `img` to `path`. JPEG cannot store alpha or 16-bit samples, so
/// those are reduced to RGB8 first.
fn save_image(img: &DynamicImage, path: &Path, format: ImageFormat) -> Result<(), SkipReason> {
    let to_write;
    let img = match (format, img) {
        (ImageFormat::Jpeg, DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_)) => img,
        (ImageFormat::Jpeg, other) => {
            to_write = DynamicImage::ImageRgb8(other.to_rgb8());
            &to_write
        }
        _ => img,
    };

    img.save_with_format(path, format)
        .map_err(|e| SkipReason::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}
