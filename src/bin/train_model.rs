//! Standalone binary for training the vegetation generator
//!
//! Reads training instances from stdin until `finish` or end of input.
//!
//! Usage:
//!   train_model --config config.toml --model model/generator.ot < instances.txt

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vegetation_cgan::{
    collect_training_instances, reshape_for_training, GeneratorModel, Pix2Pix, StreamParser,
    Trainer,
};
use vegetation_cgan::utils::{ensure_config_exists, Config};

/// Train the height-to-vegetation generator on instances read from stdin
#[derive(Parser)]
#[command(name = "train_model")]
#[command(about = "Train the pix2pix vegetation generator")]
struct Args {
    /// Configuration file (TOML or JSON); created with defaults if missing
    #[arg(short, long)]
    config: Option<String>,

    /// Where to save the trained generator
    #[arg(short, long)]
    model: Option<String>,

    /// Number of training epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Batch size
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Train on the raw instances without augmentation
    #[arg(long)]
    no_augment: bool,

    /// Warm-start from a saved generator
    #[arg(long)]
    resume: Option<String>,

    /// Use GPU if available
    #[arg(long)]
    gpu: bool,
}

fn main() -> Result<()> {
    // stdout is reserved for the protocol
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ensure_config_exists(path)?,
        None => Config::default(),
    };
    if let Some(model) = &args.model {
        config.serving.model_path = model.clone();
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if args.no_augment {
        config.training.augment = false;
    }
    if args.gpu {
        config.model.device = "cuda".to_string();
    }
    config.validate()?;
    let device = config.get_device();
    info!("Using device {:?}", device);

    let stdin = io::stdin();
    let mut parser = StreamParser::with_rows(stdin.lock(), config.data.raster_rows);
    let instances = collect_training_instances(&mut parser)?;
    if instances.is_empty() {
        anyhow::bail!("no training instances on stdin");
    }
    let dataset = reshape_for_training(&instances)?;
    let (h, w) = dataset.image_dim();
    info!("Loaded {} training instances of {}x{}", dataset.len(), h, w);

    let generator = match &args.resume {
        Some(path) => {
            info!("Resuming from generator {}", path);
            GeneratorModel::load(path, device)?
        }
        None => GeneratorModel::new(config.model.generator.clone(), device)?,
    };
    let mut model = Pix2Pix::new(
        generator,
        config.model.discriminator.clone(),
        config.model.optimizer.clone(),
        (h as i64, w as i64),
    )?;
    info!("Discriminator patch shape {:?}", model.patch_shape());

    let mut trainer = Trainer::new(config.training.clone());
    let metrics = trainer.train(&mut model, &dataset)?;

    info!("Training complete after {} steps", metrics.num_steps());
    if let Some(last) = metrics.latest() {
        info!(
            "Final losses: D_real={:.4}, D_fake={:.4}, G={:.4}",
            last.d_real, last.d_fake, last.g_total
        );
    }

    model.generator.save(&config.serving.model_path)?;
    info!("Generator saved to {}", config.serving.model_path);

    Ok(())
}
