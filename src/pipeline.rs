use crate::detection::Detector;
use crate::error::TaskError;
use crate::ingest::{ArchiveItem, ArchiveReader, ExtensionFilter, decode_image};
use crate::models::{ArchiveTask, ClassId, DecodedImage};
use crate::output::{OutputRouter, WriteOutcome};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Ordered group of decoded images, `1..=max` long
#[derive(Debug)]
pub struct Batch {
    images: Vec<DecodedImage>,
}

impl Batch {
    pub fn images(&self) -> &[DecodedImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn into_images(self) -> Vec<DecodedImage> {
        self.images
    }
}

/// Buffers decoded images until a batch is full or the archive ends.
#[derive(Debug)]
pub struct BatchAccumulator {
    max_size: usize,
    pending: Vec<DecodedImage>,
}

impl BatchAccumulator {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            pending: Vec::with_capacity(max_size),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Append an image; returns the batch once it reaches `max_size`
    pub fn push(&mut self, image: DecodedImage) -> Option<Batch> {
        self.pending.push(image);
        if self.pending.len() >= self.max_size {
            self.take()
        } else {
            None
        }
    }

    /// Hand out whatever is buffered, if anything
    pub fn flush(&mut self) -> Option<Batch> {
        self.take()
    }

    fn take(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        let images = std::mem::replace(&mut self.pending, Vec::with_capacity(self.max_size));
        Some(Batch { images })
    }
}

/// Per-archive tallies, summed by the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveCounts {
    /// Images sent through the detector
    pub images_processed: usize,
    /// Images written to the matched directory
    pub matched: usize,
    /// Images written unchanged to the unmatched directory
    pub unmatched: usize,
    /// Crop files written (equals `matched` with the first-box policy)
    pub crops_written: usize,
    /// Members skipped by the extension allow-list
    pub entries_filtered: usize,
    /// Allow-listed members that failed to decode
    pub decode_skips: usize,
    /// Images whose output could not be written
    pub write_failures: usize,
}

impl ArchiveCounts {
    pub fn merge(&mut self, other: &ArchiveCounts) {
        self.images_processed += other.images_processed;
        self.matched += other.matched;
        self.unmatched += other.unmatched;
        self.crops_written += other.crops_written;
        self.entries_filtered += other.entries_filtered;
        self.decode_skips += other.decode_skips;
        self.write_failures += other.write_failures;
    }

    /// Images that ended up on disk in either class directory
    pub fn images_written(&self) -> usize {
        self.matched + self.unmatched
    }
}

/// Outcome of one archive. `error` is set when the archive failed; counts
/// still describe the work completed before the failure.
#[derive(Debug)]
pub struct WorkerResult {
    pub task: ArchiveTask,
    pub counts: ArchiveCounts,
    pub error: Option<TaskError>,
}

/// Settings a worker needs for every archive
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub class: ClassId,
    pub extensions: ExtensionFilter,
}

/// Runs archive → decode → batch → detect → route for the archives handed to it.
/// Owns its detector; nothing here is shared with other workers.
pub struct WorkerUnit {
    detector: Box<dyn Detector>,
    router: OutputRouter,
    settings: WorkerSettings,
}

impl WorkerUnit {
    pub fn new(
        detector: Box<dyn Detector>,
        router: OutputRouter,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            detector,
            router,
            settings,
        }
    }

    /// Process one archive to completion. Never panics on bad input and
    /// never returns an error: failures are carried in the result.
    pub fn process(&mut self, task: &ArchiveTask) -> WorkerResult {
        let mut counts = ArchiveCounts::default();
        let error = self.run_archive(task, &mut counts).err();

        match &error {
            None => info!(
                "{}: {} images ({} matched, {} unmatched), {} decode skips, {} write failures",
                task.id,
                counts.images_processed,
                counts.matched,
                counts.unmatched,
                counts.decode_skips,
                counts.write_failures
            ),
            Some(e) => error!("{}: archive failed: {}", task.id, e),
        }

        WorkerResult {
            task: task.clone(),
            counts,
            error,
        }
    }

    fn run_archive(
        &mut self,
        task: &ArchiveTask,
        counts: &mut ArchiveCounts,
    ) -> Result<(), TaskError> {
        let mut reader = ArchiveReader::open(task, self.settings.extensions.clone())?;
        let mut batcher = BatchAccumulator::new(self.settings.batch_size);
        let mut stream_error = None;

        for item in reader.entries()? {
            let entry = match item {
                Ok(ArchiveItem::Image(entry)) => entry,
                Ok(ArchiveItem::Filtered(name)) => {
                    debug!("{}: {} is not an allow-listed image", task.id, name);
                    counts.entries_filtered += 1;
                    continue;
                }
                Ok(ArchiveItem::Skipped { name, reason }) => {
                    warn!("{}: skipping {}: {}", task.id, name, reason);
                    counts.decode_skips += 1;
                    continue;
                }
                Err(e) => {
                    stream_error = Some(e);
                    break;
                }
            };

            let name = entry.entry.name.clone();
            match decode_image(entry) {
                Ok(image) => {
                    if let Some(batch) = batcher.push(image) {
                        self.dispatch(batch, counts)?;
                    }
                }
                Err(reason) => {
                    warn!("{}: skipping {}: {}", task.id, name, reason);
                    counts.decode_skips += 1;
                }
            }
        }

        // Images decoded before a stream error are still routed
        if let Some(batch) = batcher.flush() {
            self.dispatch(batch, counts)?;
        }

        match stream_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn dispatch(&mut self, batch: Batch, counts: &mut ArchiveCounts) -> Result<(), TaskError> {
        debug!("running {} on a batch of {}", self.detector.name(), batch.len());

        let results = self
            .detector
            .detect(batch.images(), self.settings.class)
            .map_err(TaskError::Inference)?;

        if results.len() != batch.len() {
            return Err(TaskError::ResultCountMismatch {
                expected: batch.len(),
                actual: results.len(),
            });
        }

        for (image, result) in batch.into_images().iter().zip(&results) {
            counts.images_processed += 1;
            match self.router.route(image, result) {
                WriteOutcome::Cropped { files } => {
                    counts.matched += 1;
                    counts.crops_written += files.len();
                }
                WriteOutcome::PassThrough { .. } => counts.unmatched += 1,
                WriteOutcome::Failed { decision, reason } => {
                    warn!("{}: could not write {:?} output: {}", image.entry, decision, reason);
                    counts.write_failures += 1;
                }
            }
        }

        Ok(())
    }
}
