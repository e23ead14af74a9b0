use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use archsort::config::{self, Config, CropPolicy};
use archsort::detection::postprocess::PostprocessParams;
use archsort::{Orchestrator, YoloFactory, YoloParams, logging};

#[derive(Parser)]
#[command(name = "archsort")]
#[command(about = "Sort images packed in tar archives by whether they contain a person")]
struct Cli {
    /// Directory containing .tar / .tar.zst archives (not searched recursively)
    #[arg(short, long, value_name = "DIR", default_value = "zip")]
    input: PathBuf,

    /// Output root; Person/ and No_Person/ are created inside it
    #[arg(short, long, value_name = "DIR", default_value = "output")]
    output: PathBuf,

    /// YOLOv8 detection model in .rten format
    #[arg(short, long, value_name = "FILE", default_value = "yolov8s.rten")]
    model: PathBuf,

    /// Number of parallel workers [default: available CPUs]
    #[arg(short, long)]
    workers: Option<usize>,

    /// Images per detector call
    #[arg(short, long, default_value_t = config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Target class index (COCO: 0 = person)
    #[arg(long, default_value_t = config::DEFAULT_CLASS)]
    class: usize,

    /// Image file extensions to consider, comma separated
    #[arg(long, value_delimiter = ',', default_value = "png,jpg,jpeg")]
    extensions: Vec<String>,

    /// Minimum detection confidence
    #[arg(long, default_value_t = config::DEFAULT_CONFIDENCE)]
    confidence: f32,

    /// Side of the square model input
    #[arg(long, default_value_t = config::DEFAULT_INPUT_SIZE)]
    input_size: u32,

    /// Crop only the most confident detection, or every detection
    #[arg(long, value_enum, default_value_t = CropPolicy::First)]
    crop_policy: CropPolicy,

    /// Write a JSON run report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Save annotated copies of matched images to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.input, self.output)
            .with_workers(self.workers.unwrap_or_else(config::default_workers))
            .with_batch_size(self.batch_size)
            .with_class(self.class)
            .with_extensions(&self.extensions)
            .with_crop_policy(self.crop_policy)
            .with_debug(self.debug_out);
        config.model_path = self.model;
        config.confidence = self.confidence;
        config.input_size = self.input_size;
        config.report = self.report;
        config.show_progress = true;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    logging::init(args.verbose);

    let config = args.into_config().validate()?;
    logging::log_startup(&config);

    let factory = YoloFactory {
        model_path: config.model_path.clone(),
        params: YoloParams {
            input_size: config.input_size,
            postprocess: PostprocessParams {
                confidence: config.confidence,
                ..Default::default()
            },
        },
    };

    let orchestrator = Orchestrator::new(config, Arc::new(factory));
    let summary = orchestrator.run().await?;
    logging::print_summary(&summary);

    if let Some(report) = &orchestrator.config().report {
        summary.write_json(report)?;
        tracing::info!("Report written to {}", report.display());
    }

    Ok(())
}
