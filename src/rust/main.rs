use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use asclepius::{
    ChannelOrder, Classifier, ClassifierBuilder, ClassifierConfig, HistoryLog, LabelTable,
    ModelConfig, ModelManager, Normalization, PreprocessConfig, RawImage, RuntimeConfig,
    TensorLayout, TensorShape,
};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

const DEFAULT_MODEL: &str = "cancer_classification";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify one or more image files
    Classify(ClassifyArgs),
    /// List logged predictions, newest first
    History {
        /// History log file
        #[arg(long)]
        history: PathBuf,
    },
}

#[derive(clap::Args)]
struct ClassifyArgs {
    /// Image files to classify
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// JSON classifier config; replaces the model, label and preprocessing flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// ONNX model file (default: the packaged model in the models directory)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Class labels in model output order
    #[arg(long, value_delimiter = ',', default_value = "Non-Cancer,Cancer")]
    labels: Vec<String>,

    /// File with one label per line, overrides --labels
    #[arg(long)]
    labels_file: Option<PathBuf>,

    /// Side length of the square model input
    #[arg(long, default_value_t = 224)]
    input_size: usize,

    /// Pixel value mapping: raw, unit or imagenet
    #[arg(long, default_value = "raw")]
    normalization: Normalization,

    #[arg(long, value_enum, default_value_t = ChannelArg::Rgb)]
    channel_order: ChannelArg,

    #[arg(long, value_enum, default_value_t = LayoutArg::Nhwc)]
    layout: LayoutArg,

    /// Crop the centered square before resizing
    #[arg(long)]
    crop_square: bool,

    /// Append each prediction to this history log
    #[arg(long)]
    history: Option<PathBuf>,

    /// Expected SHA-256 of the model file
    #[arg(long)]
    model_sha256: Option<String>,

    /// Stop waiting for a single image after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// ONNX Runtime intra-op threads (0 lets the runtime decide)
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    Rgb,
    Bgr,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Nhwc,
    Nchw,
}

impl ClassifyArgs {
    fn preprocess_config(&self) -> PreprocessConfig {
        PreprocessConfig {
            channel_order: match self.channel_order {
                ChannelArg::Rgb => ChannelOrder::Rgb,
                ChannelArg::Bgr => ChannelOrder::Bgr,
            },
            layout: match self.layout {
                LayoutArg::Nhwc => TensorLayout::Nhwc,
                LayoutArg::Nchw => TensorLayout::Nchw,
            },
            normalization: self.normalization,
        }
    }

    fn model_config(&self, num_classes: usize) -> ModelConfig {
        let size = self.input_size;
        let input_shape = match self.layout {
            LayoutArg::Nhwc => TensorShape::new([1, size, size, 3]),
            LayoutArg::Nchw => TensorShape::new([1, 3, size, size]),
        };
        ModelConfig {
            input_shape,
            output_shape: TensorShape::new([1, num_classes]),
            ..ModelConfig::default()
        }
    }

    fn builder(&self) -> Result<ClassifierBuilder> {
        let runtime = RuntimeConfig {
            intra_threads: self.threads,
            ..RuntimeConfig::default()
        };

        if let Some(config_path) = &self.config {
            info!("Loading classifier config from {}", config_path.display());
            let config = ClassifierConfig::from_json_file(config_path)?;
            return Ok(ClassifierBuilder::from_config(config)?.with_runtime_config(runtime));
        }

        let labels = match &self.labels_file {
            Some(path) => LabelTable::from_file(path)?,
            None => LabelTable::new(self.labels.iter().cloned())?,
        };
        let model_path = match &self.model {
            Some(path) => path.clone(),
            None => ModelManager::new_default()
                .context("Failed to prepare the models directory")?
                .resolve(DEFAULT_MODEL)?,
        };

        let mut builder = Classifier::builder()
            .with_runtime_config(runtime)
            .with_model_config(self.model_config(labels.len()))
            .with_preprocess_config(self.preprocess_config())
            .with_label_table(labels)?
            .with_model(model_path)?;
        if let Some(hash) = &self.model_sha256 {
            builder = builder.with_expected_sha256(hash.clone());
        }
        Ok(builder)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Classify(classify) => run_classify(classify).await,
        Command::History { history } => show_history(&history),
    }
}

async fn run_classify(args: ClassifyArgs) -> Result<()> {
    info!("=== Starting Image Classifier ===");
    let start_time = Instant::now();

    let classifier = Arc::new(args.builder()?.build().context("Classifier unavailable")?);
    info!("Classifier built in {:.2?}", start_time.elapsed());

    let history = args.history.as_deref().map(HistoryLog::open).transpose()?;
    let timeout = args.timeout_ms.map(Duration::from_millis);

    let mut failures = 0usize;
    for path in &args.images {
        match classify_one(&classifier, path, args.crop_square, timeout).await {
            Ok(result) => {
                println!("{}: {}", path.display(), result);
                if let Some(history) = &history {
                    if let Err(e) = history.append(path.display().to_string(), &result) {
                        release(&classifier);
                        return Err(e).context("Failed to record history");
                    }
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping {}: {}", path.display(), e);
                eprintln!("{}: {}", path.display(), e);
                failures += 1;
            }
            Err(e) => {
                release(&classifier);
                return Err(e).with_context(|| format!("Failed to classify {}", path.display()));
            }
        }
    }

    classifier.shutdown()?;
    info!(
        "=== Done: {} classified, {} skipped in {:.2?} ===",
        args.images.len() - failures,
        failures,
        start_time.elapsed()
    );
    Ok(())
}

/// Shuts the classifier down on an error path, keeping the original error.
fn release(classifier: &Classifier) {
    if let Err(e) = classifier.shutdown() {
        warn!("Shutdown after failure also failed: {}", e);
    }
}

async fn classify_one(
    classifier: &Arc<Classifier>,
    path: &Path,
    crop_square: bool,
    timeout: Option<Duration>,
) -> Result<asclepius::ClassificationResult, asclepius::ClassifierError> {
    let mut image = RawImage::from_path(path)?;
    if crop_square {
        image = image.center_square()?;
    }
    Arc::clone(classifier).classify_async(image, timeout).await
}

fn show_history(path: &Path) -> Result<()> {
    let log = HistoryLog::open(path)?;
    for entry in log.entries()? {
        println!(
            "#{} {} {} : {:.2}% ({})",
            entry.id,
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.prediction,
            entry.confidence,
            entry.image_uri
        );
    }
    Ok(())
}
