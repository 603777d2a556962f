//! Standalone binary serving the vegetation generator over stdin/stdout
//!
//! Usage:
//!   serve_model --model model/generator.ot --config config.toml

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vegetation_cgan::utils::Config;
use vegetation_cgan::{InferenceServer, StreamParser};

/// Answer inference and retrain requests read from stdin
#[derive(Parser)]
#[command(name = "serve_model")]
#[command(about = "Serve the pix2pix vegetation generator over the line protocol")]
struct Args {
    /// Saved generator weights (architecture sidecar next to it)
    #[arg(short, long)]
    model: String,

    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Epochs run when a request carries training instances
    #[arg(long)]
    retrain_epochs: Option<usize>,

    /// Use GPU if available
    #[arg(long)]
    gpu: bool,
}

fn main() -> Result<()> {
    // stdout carries responses, logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.serving.model_path = args.model.clone();
    if let Some(epochs) = args.retrain_epochs {
        config.serving.retrain_epochs = epochs;
    }
    if args.gpu {
        config.model.device = "cuda".to_string();
    }
    // no progress bar while serving
    config.training.progress = false;
    config.validate()?;

    let server = InferenceServer::load(config)?;
    info!("Loaded generator from {}", args.model);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut parser = StreamParser::with_rows(stdin.lock(), server.config().data.raster_rows);
    let mut writer = stdout.lock();
    server.listen(&mut parser, &mut writer)?;

    Ok(())
}
