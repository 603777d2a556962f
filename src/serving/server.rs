//! Inference server answering line-protocol requests with generated maps
//!
//! Requests are polled from the input stream. Inference blocks are answered
//! with one `TreeProxMap` record per instance; training blocks fine-tune the
//! served generator before any inference in the same request runs.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use ndarray::{s, Array4};
use tracing::{debug, info, warn};

use crate::data::{
    assemble_inference, assemble_training, reshape_for_inference, reshape_for_training,
    write_raster, InferenceInstance, StreamParser, TrainingInstance,
};
use crate::error::{Error, Result};
use crate::model::{GeneratorModel, Pix2Pix};
use crate::training::{Trainer, TrainingConfig, TrainingMetrics};
use crate::utils::Config;

/// Header line preceding each prediction in a response
pub const RESPONSE_HEADER: &str = "TreeProxMap";

/// What a single poll of the input stream did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The request carried no blocks
    Idle,
    /// The request was handled
    Served {
        /// Training instances used for retraining
        trained: usize,
        /// Predictions written
        inferred: usize,
    },
}

/// Server owning the generator being served
pub struct InferenceServer {
    model: Mutex<GeneratorModel>,
    config: Config,
    model_path: PathBuf,
}

impl InferenceServer {
    /// Load the generator at `config.serving.model_path`
    pub fn load(config: Config) -> Result<Self> {
        let device = config.get_device();
        let model = GeneratorModel::load(&config.serving.model_path, device)?;
        info!("Serving generator from {}", config.serving.model_path);
        Ok(Self::new(model, config))
    }

    /// Serve a generator already in memory; retrained weights go to
    /// `config.serving.model_path`
    pub fn new(model: GeneratorModel, config: Config) -> Self {
        let model_path = PathBuf::from(&config.serving.model_path);
        Self {
            model: Mutex::new(model),
            config,
            model_path,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GeneratorModel> {
        // a panic mid-request leaves the previous generator in place
        self.model.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Predict (N, H, W, C) outputs for the given instances
    pub fn infer(&self, instances: &[InferenceInstance]) -> Result<Array4<f32>> {
        let model = self.lock();
        let inputs = reshape_for_inference(instances)?;
        model.predict(&inputs)
    }

    /// Fine-tune a copy of the served generator on `instances`, persist it and
    /// swap it in. The served generator is untouched if anything fails.
    pub fn retrain(
        &self,
        instances: &[TrainingInstance],
        epochs: usize,
    ) -> Result<TrainingMetrics> {
        let mut model = self.lock();
        let dataset = reshape_for_training(instances)?;
        let (h, w) = dataset.image_dim();

        let mut pix2pix = Pix2Pix::new(
            model.try_clone()?,
            self.config.model.discriminator.clone(),
            self.config.model.optimizer.clone(),
            (h as i64, w as i64),
        )?;
        let mut trainer = Trainer::new(TrainingConfig {
            epochs,
            ..self.config.training.clone()
        });
        info!("Retraining on {} instances for {} epochs", instances.len(), epochs);
        let metrics = trainer.train(&mut pix2pix, &dataset)?.clone();

        let trained = pix2pix.into_generator();
        trained.save(&self.model_path)?;
        *model = trained;
        info!("Retrained generator saved to {}", self.model_path.display());
        Ok(metrics)
    }

    /// Read one request and answer it
    pub fn serve_once<R: BufRead, W: Write>(
        &self,
        parser: &mut StreamParser<R>,
        writer: &mut W,
    ) -> Result<ServeOutcome> {
        let blocks = parser.read_request()?;
        if blocks.is_empty() {
            return Ok(ServeOutcome::Idle);
        }

        let training = assemble_training(&blocks)?;
        let inference = assemble_inference(&blocks)?;
        debug!(
            "request with {} training and {} inference instances",
            training.len(),
            inference.len()
        );

        if !training.is_empty() {
            self.retrain(&training, self.config.serving.retrain_epochs)?;
        }
        if !inference.is_empty() {
            let outputs = self.infer(&inference)?;
            self.write_response(writer, &outputs)?;
        }

        Ok(ServeOutcome::Served {
            trained: training.len(),
            inferred: inference.len(),
        })
    }

    /// Write one `TreeProxMap` record per prediction: the header, then for
    /// each output channel its rows and a blank line
    pub fn write_response<W: Write>(&self, writer: &mut W, outputs: &Array4<f32>) -> Result<()> {
        let (n, _, _, c) = outputs.dim();
        let channels = self.config.serving.output_channels;
        if channels > c {
            return Err(Error::shape(format!(
                "cannot write {} channels from a prediction with {}",
                channels, c
            )));
        }

        for i in 0..n {
            writeln!(writer, "{}", RESPONSE_HEADER)?;
            for channel in 0..channels {
                write_raster(writer, outputs.slice(s![i, .., .., channel]))?;
                writeln!(writer)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Poll `parser` until its input ends, answering every request.
    ///
    /// Malformed requests are logged and skipped. Failures of the model,
    /// the filesystem or the output stream stop the loop.
    pub fn listen<R: BufRead, W: Write>(
        &self,
        parser: &mut StreamParser<R>,
        writer: &mut W,
    ) -> Result<()> {
        let poll = Duration::from_millis(self.config.serving.poll_interval_ms);
        info!("listening");
        loop {
            match self.serve_once(parser, writer) {
                Ok(ServeOutcome::Idle) => {
                    if parser.is_exhausted() {
                        info!("input closed, stopping");
                        return Ok(());
                    }
                    thread::sleep(poll);
                }
                Ok(ServeOutcome::Served { trained, inferred }) => {
                    debug!("served request: {} trained, {} inferred", trained, inferred);
                }
                Err(e) if e.is_request_local() => {
                    warn!("Rejected request: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Where retrained weights are written
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
