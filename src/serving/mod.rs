//! Serving module exposing the generator over the line protocol
//!
//! This module provides:
//! - Inference server owning the generator behind a lock
//! - Polling loop answering inference and retrain requests

mod server;

pub use server::{InferenceServer, ServeOutcome, RESPONSE_HEADER};
