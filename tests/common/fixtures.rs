use archsort::{
    BoundingBox, ClassId, Config, DecodedImage, DetectionResult, Detector, DetectorFactory,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tar::{Builder, Header};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;
use zstd::stream::write::Encoder as ZstdEncoder;

pub const RED: Rgb<u8> = Rgb([230, 20, 20]);
pub const GREY: Rgb<u8> = Rgb([120, 120, 120]);

/// 64x48 grey scene, optionally with a red "person" rectangle
pub fn scene(person: Option<(u32, u32, u32, u32)>) -> RgbImage {
    ImageBuffer::from_fn(64, 48, |x, y| match person {
        Some((x1, y1, x2, y2)) if x >= x1 && x < x2 && y >= y1 && y < y2 => RED,
        _ => Rgb([GREY[0], GREY[1], (x + y) as u8]),
    })
}

pub fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut out, format)
        .expect("Failed to encode test image");
    out.into_inner()
}

pub fn person_png() -> Vec<u8> {
    encode(&scene(Some((10, 8, 30, 40))), ImageFormat::Png)
}

pub fn empty_png() -> Vec<u8> {
    encode(&scene(None), ImageFormat::Png)
}

fn append_all<W: std::io::Write>(builder: &mut Builder<W>, entries: &[(&str, Vec<u8>)]) {
    for (name, data) in entries {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, data.as_slice())
            .expect("Failed to append tar entry");
    }
}

/// Write an uncompressed tar with the given members, in order
pub fn write_tar(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut builder = Builder::new(File::create(path).expect("Failed to create archive"));
    append_all(&mut builder, entries);
    builder.into_inner().expect("Failed to finish tar");
}

/// Write a zstd-compressed tar with the given members, in order
pub fn write_tar_zst(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let out = File::create(path).expect("Failed to create archive");
    let encoder = ZstdEncoder::new(out, 3).expect("Failed to create zstd encoder");
    let mut builder = Builder::new(encoder);
    append_all(&mut builder, entries);
    let encoder = builder.into_inner().expect("Failed to finish tar");
    encoder.finish().expect("Failed to finish zstd stream");
}

/// Write a zip with the given members, in order
pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut writer = ZipWriter::new(File::create(path).expect("Failed to create archive"));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("Failed to start zip member");
        writer.write_all(data).expect("Failed to write zip member");
    }
    writer.finish().expect("Failed to finish zip");
}

/// Byte offset where the payload of member `index` starts in a tar written by `write_tar`
pub fn tar_payload_offset(entries: &[(&str, Vec<u8>)], index: usize) -> u64 {
    let padded = |len: usize| len.div_ceil(512) * 512;
    let before: usize = entries[..index]
        .iter()
        .map(|(_, data)| 512 + padded(data.len()))
        .sum();
    (before + 512) as u64
}

pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).filter(|e| e.path().is_file()).count())
        .unwrap_or(0)
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to list directory")
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Config with a fixed worker count and no progress bar
pub fn test_config(input: &Path, output: &Path, workers: usize, batch_size: usize) -> Config {
    Config::new(input, output)
        .with_workers(workers)
        .with_batch_size(batch_size)
        .validate()
        .expect("Test config should be valid")
}

/// Detects the bounding rectangle of pure red pixels; nothing else.
pub struct RedDetector {
    largest_batch: Arc<AtomicUsize>,
}

impl Detector for RedDetector {
    fn detect(
        &mut self,
        batch: &[DecodedImage],
        class: ClassId,
    ) -> anyhow::Result<Vec<DetectionResult>> {
        self.largest_batch.fetch_max(batch.len(), Ordering::SeqCst);

        Ok(batch
            .iter()
            .map(|item| {
                let rgb = item.image.to_rgb8();
                let mut bounds: Option<(u32, u32, u32, u32)> = None;
                for (x, y, pixel) in rgb.enumerate_pixels() {
                    if class == 0 && pixel[0] > 200 && pixel[1] < 60 && pixel[2] < 60 {
                        let b = bounds.get_or_insert((x, y, x + 1, y + 1));
                        b.0 = b.0.min(x);
                        b.1 = b.1.min(y);
                        b.2 = b.2.max(x + 1);
                        b.3 = b.3.max(y + 1);
                    }
                }
                let boxes = bounds
                    .map(|(x1, y1, x2, y2)| vec![BoundingBox::new(x1, y1, x2, y2, 0.9)])
                    .unwrap_or_default();
                DetectionResult::new(item.entry.clone(), boxes)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "red"
    }
}

/// Builds `RedDetector`s and records how many were built and the largest batch seen
#[derive(Default, Clone)]
pub struct RedDetectorFactory {
    pub created: Arc<AtomicUsize>,
    pub largest_batch: Arc<AtomicUsize>,
    /// Number of initial `create` calls that fail
    pub failures: usize,
}

impl RedDetectorFactory {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn largest_batch(&self) -> usize {
        self.largest_batch.load(Ordering::SeqCst)
    }
}

impl DetectorFactory for RedDetectorFactory {
    fn create(&self) -> anyhow::Result<Box<dyn Detector>> {
        let attempt = self.created.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            anyhow::bail!("simulated backend initialisation failure");
        }
        Ok(Box::new(RedDetector {
            largest_batch: self.largest_batch.clone(),
        }))
    }
}

/// Returns one result too few for every batch
pub struct ShortDetectorFactory;

struct ShortDetector;

impl Detector for ShortDetector {
    fn detect(
        &mut self,
        batch: &[DecodedImage],
        _class: ClassId,
    ) -> anyhow::Result<Vec<DetectionResult>> {
        Ok(batch
            .iter()
            .skip(1)
            .map(|item| DetectionResult::empty(item.entry.clone()))
            .collect())
    }

    fn name(&self) -> &str {
        "short"
    }
}

impl DetectorFactory for ShortDetectorFactory {
    fn create(&self) -> anyhow::Result<Box<dyn Detector>> {
        Ok(Box::new(ShortDetector))
    }
}
