//! Logging setup and run banners
use crate::config::Config;
use crate::orchestrator::Summary;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` takes precedence over `verbose`.
pub fn init(verbose: bool) {
    let default = if verbose { "archsort=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("Input:   {}", config.input_dir.display());
    info!("Output:  {}", config.output_dir.display());
    info!("Model:   {}", config.model_path.display());
    info!(
        "Workers: {}  batch size: {}  class: {}  crop policy: {:?}",
        config.workers, config.batch_size, config.class, config.crop_policy
    );
    info!("Image extensions: {}", config.extensions.join(", "));
    info!("{}", "=".repeat(60));
}

pub fn print_summary(summary: &Summary) {
    let totals = &summary.totals;
    info!("{}", "=".repeat(60));
    info!(
        "Archives: {} processed, {} failed, {} total ({} workers)",
        summary.archives_processed,
        summary.archives_failed,
        summary.archives_total,
        summary.workers_started
    );
    info!(
        "Images:   {} processed, {} -> Person ({} crops), {} -> No_Person",
        totals.images_processed, totals.matched, totals.crops_written, totals.unmatched
    );
    info!(
        "Skipped:  {} not allow-listed, {} decode failures, {} write failures",
        totals.entries_filtered, totals.decode_skips, totals.write_failures
    );
    for failed in summary.failed_archives() {
        warn!(
            "Failed archive {}: {}",
            failed.archive.display(),
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
    info!("{}", "=".repeat(60));
}
