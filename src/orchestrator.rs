//! Run-level coordination.
//!
//! Discovers archives, prepares the output layout, starts a fixed pool of
//! blocking workers and aggregates their per-archive results.
//!
//! - Every worker builds its own detector when it starts; detectors are never shared.
//! - Archives are handed out through a locked queue, so each one is taken exactly once.
//! - A failing archive, a worker whose detector cannot be built, or a
//!   panicking worker never stops the other workers. Archives left without
//!   a result are reported as failed.

use crate::config::Config;
use crate::detection::DetectorFactory;
use crate::error::TaskError;
use crate::ingest::{ExtensionFilter, discover_archives};
use crate::models::ArchiveTask;
use crate::output::{OutputLayout, OutputRouter};
use crate::pipeline::{ArchiveCounts, WorkerResult, WorkerSettings, WorkerUnit};
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Archives waiting for a worker
struct TaskQueue {
    tasks: Mutex<VecDeque<ArchiveTask>>,
}

impl TaskQueue {
    fn new(tasks: Vec<ArchiveTask>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into()),
        }
    }

    fn next(&self) -> Option<ArchiveTask> {
        // A worker that panicked while holding the lock cannot corrupt a VecDeque pop
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.pop_front()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub archive: PathBuf,
    pub id: String,
    pub status: ArchiveStatus,
    pub counts: ArchiveCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final, best-effort account of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub archives_total: usize,
    pub archives_processed: usize,
    pub archives_failed: usize,
    pub workers_started: usize,
    pub totals: ArchiveCounts,
    pub archives: Vec<ArchiveReport>,
}

impl Summary {
    /// Combine worker results in discovery order. Tasks without a result are failures.
    fn collect(tasks: &[ArchiveTask], results: Vec<WorkerResult>, workers_started: usize) -> Self {
        let mut by_path: HashMap<PathBuf, WorkerResult> = results
            .into_iter()
            .map(|r| (r.task.path.clone(), r))
            .collect();

        let mut summary = Summary {
            archives_total: tasks.len(),
            workers_started,
            ..Default::default()
        };

        for task in tasks {
            let (counts, error) = match by_path.remove(&task.path) {
                Some(result) => (result.counts, result.error.map(|e| e.to_string())),
                None => (
                    ArchiveCounts::default(),
                    Some(TaskError::WorkerUnavailable.to_string()),
                ),
            };

            let status = if error.is_none() {
                summary.archives_processed += 1;
                ArchiveStatus::Completed
            } else {
                summary.archives_failed += 1;
                ArchiveStatus::Failed
            };
            summary.totals.merge(&counts);
            summary.archives.push(ArchiveReport {
                archive: task.path.clone(),
                id: task.id.clone(),
                status,
                counts,
                error,
            });
        }

        summary
    }

    pub fn failed_archives(&self) -> impl Iterator<Item = &ArchiveReport> {
        self.archives.iter().filter(|a| a.status == ArchiveStatus::Failed)
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report {:?}", path))
    }
}

pub struct Orchestrator {
    config: Config,
    factory: Arc<dyn DetectorFactory>,
}

impl Orchestrator {
    pub fn new(config: Config, factory: Arc<dyn DetectorFactory>) -> Self {
        Self { config, factory }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process every archive under the input directory.
    ///
    /// Errors only for fatal-to-run conditions: unreadable input directory,
    /// output layout that cannot be created, or no worker able to start.
    pub async fn run(&self) -> anyhow::Result<Summary> {
        let config = &self.config;

        let layout = OutputLayout::create(&config.output_dir)?;
        let tasks = discover_archives(&config.input_dir)?;

        if tasks.is_empty() {
            warn!("No archives found in {:?}", config.input_dir);
            return Ok(Summary::default());
        }

        let worker_count = config.workers.min(tasks.len()).max(1);
        info!(
            "Found {} archives, starting {} workers (batch size {})",
            tasks.len(),
            worker_count,
            config.batch_size
        );

        let router =
            OutputRouter::new(layout, config.crop_policy).with_debug(config.debug_out.clone());
        let settings = WorkerSettings {
            batch_size: config.batch_size,
            class: config.class,
            extensions: ExtensionFilter::new(&config.extensions),
        };
        let progress = progress_bar(tasks.len() as u64, config.show_progress);

        let queue = Arc::new(TaskQueue::new(tasks.clone()));
        let (sender, receiver) = mpsc::channel::<WorkerResult>();
        let mut workers = JoinSet::new();

        for worker_id in 0..worker_count {
            let queue = queue.clone();
            let sender = sender.clone();
            let factory = self.factory.clone();
            let router = router.clone();
            let settings = settings.clone();
            let progress = progress.clone();

            workers.spawn_blocking(move || {
                run_worker(
                    worker_id,
                    factory.as_ref(),
                    &queue,
                    router,
                    settings,
                    &sender,
                    &progress,
                )
            });
        }
        drop(sender);

        let mut workers_started = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(true) => workers_started += 1,
                Ok(false) => {}
                Err(e) => {
                    // The worker did start; its in-flight archive is reported as failed
                    error!("Worker terminated abnormally: {}", e);
                    workers_started += 1;
                }
            }
        }
        progress.finish_and_clear();

        if workers_started == 0 {
            anyhow::bail!("No worker could initialise the detector; nothing was processed");
        }

        let results: Vec<WorkerResult> = receiver.try_iter().collect();
        Ok(Summary::collect(&tasks, results, workers_started))
    }
}

/// Worker loop: build a private detector, then drain the queue.
/// Returns whether the worker got as far as building its detector.
fn run_worker(
    worker_id: usize,
    factory: &dyn DetectorFactory,
    queue: &TaskQueue,
    router: OutputRouter,
    settings: WorkerSettings,
    results: &Sender<WorkerResult>,
    progress: &ProgressBar,
) -> bool {
    let detector = match factory.create() {
        Ok(detector) => detector,
        Err(e) => {
            error!("Worker {}: detector initialisation failed: {:#}", worker_id, e);
            return false;
        }
    };

    let mut unit = WorkerUnit::new(detector, router, settings);
    while let Some(task) = queue.next() {
        progress.set_message(task.id.clone());
        let result = unit.process(&task);
        progress.inc(1);
        if results.send(result).is_err() {
            break;
        }
    }
    true
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    let style = ProgressStyle::with_template("Processing archives [{bar:40}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}
