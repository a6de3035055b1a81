use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use former::config::{LoggingConfig, Settings};
use former::{create_backend, Initializer, Tensor, Transformer, WeightStore};

#[derive(Parser)]
#[command(name = "former", version, about = "Run a stack of transformer blocks on the CPU")]
struct Cli {
    /// Directory holding default.toml and an optional local.toml
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the block stack on a seeded random batch and report output statistics
    Forward {
        /// Weight file written by `former init`; seeded weights are used when absent
        #[arg(long)]
        weights: Option<PathBuf>,
        /// Apply dropout as during training
        #[arg(long)]
        train: bool,
    },
    /// Write seeded block-stack weights to a JSON file
    Init {
        #[arg(long)]
        out: PathBuf,
    },
}

/// Sets up the global subscriber; the returned guard must live until exit so
/// buffered file output is flushed.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match &logging.file {
        Some(log_dir) => {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "former");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                // Disable ANSI colors for cleaner log files
                .with_ansi(false)
                .with_line_number(true)
                .with_file(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(false)
                .with_env_filter(filter)
                .init();

            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_env_filter(filter)
                .init();

            None
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load settings first
    let settings = Settings::load(&cli.config_dir)
        .with_context(|| format!("failed to load settings from {}", cli.config_dir.display()))?;

    let _guard = init_logging(&settings.logging);
    info!("former starting up");
    info!("Model settings: {:?}", settings.model);

    match cli.command {
        Command::Forward { weights, train } => forward(&settings, weights, train),
        Command::Init { out } => init(&settings, out),
    }
}

fn forward(settings: &Settings, weights: Option<PathBuf>, train: bool) -> anyhow::Result<()> {
    let backend = create_backend();
    let model_config = &settings.model;
    let run = &settings.run;

    let model = match weights.or_else(|| run.weights.clone()) {
        Some(path) => {
            let store = WeightStore::load(&path, Arc::clone(&backend))
                .with_context(|| format!("failed to load weights from {}", path.display()))?;
            Transformer::from_store(&store, model_config)?
        }
        None => {
            let mut init = Initializer::new(run.seed, Arc::clone(&backend));
            Transformer::new(model_config, &mut init)?
        }
    };
    info!("Built {} transformer blocks", model.depth());

    // Input and dropout draw from a stream separate from the weights
    let mut rng = StdRng::seed_from_u64(run.seed.wrapping_add(1));
    let shape = vec![run.batch_size, run.seq_len, model_config.embedding_width];
    let size: usize = shape.iter().product();
    let data: Vec<f32> = (0..size).map(|_| rng.random_range(-1.0..1.0)).collect();
    let input = Tensor::new(data, shape, backend)?;

    let start_time = Instant::now();
    let output = if train {
        model.forward_train(&input, &mut rng)?
    } else {
        model.forward(&input)?
    };
    let duration = start_time.elapsed();
    info!("Forward pass completed in {:.2?}", duration);

    let values = output.data();
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let std = (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n).sqrt();
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    println!("output shape: {:?}", output.shape());
    println!("mean: {:.6}  std: {:.6}  min: {:.6}  max: {:.6}", mean, std, min, max);
    println!("finite: {}  elapsed: {:.2?}", output.is_finite(), duration);

    Ok(())
}

fn init(settings: &Settings, out: PathBuf) -> anyhow::Result<()> {
    let backend = create_backend();
    let mut init = Initializer::new(settings.run.seed, backend);
    let model = Transformer::new(&settings.model, &mut init)?;

    let mut store = WeightStore::new();
    model.export(&mut store);
    store
        .save(&out)
        .with_context(|| format!("failed to write weights to {}", out.display()))?;

    println!(
        "wrote {} tensors ({} parameters) to {}",
        store.len(),
        store.parameter_count(),
        out.display()
    );
    Ok(())
}
