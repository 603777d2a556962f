//! Error types for the vegetation cGAN library

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed or truncated line-protocol input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// `finish` or end of input reached while a block was still open
    #[error("block opened at line {line} was never closed (expected `{expected}`)")]
    UnterminatedBlock { line: usize, expected: &'static str },

    /// A sentinel appeared where it is not allowed
    #[error("unexpected `{sentinel}` at line {line}")]
    UnexpectedSentinel { line: usize, sentinel: String },

    /// A section header was followed by fewer rows than required
    #[error("section `{section}` at line {line} has {found} of {expected} rows")]
    TruncatedSection {
        section: &'static str,
        line: usize,
        expected: usize,
        found: usize,
    },

    /// A value token could not be parsed as a float
    #[error("non-numeric value `{token}` at line {line}")]
    InvalidValue { line: usize, token: String },

    /// Row width differs from the first row of the section
    #[error("row at line {line} has {found} values, expected {expected}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },

    /// A raster row without any values
    #[error("empty raster row at line {line}")]
    EmptyRow { line: usize },

    /// A line that is not valid UTF-8
    #[error("invalid UTF-8 at line {line}")]
    InvalidEncoding { line: usize },
}

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input stream
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A block lacks a section required to build an instance
    #[error("block at line {line} is missing its `{section}` section")]
    MissingSection { section: &'static str, line: usize },

    /// Mismatched tensor or raster dimensions
    #[error("shape error: {0}")]
    Shape(String),

    /// Persisted model could not be loaded
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// libtorch failure
    #[error("torch error: {0}")]
    Tch(#[from] tch::TchError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Shape error helper
    pub fn shape(msg: impl Into<String>) -> Self {
        Error::Shape(msg.into())
    }

    /// Whether the serving loop may keep polling after this error.
    ///
    /// Bad requests only abort themselves; anything touching the model,
    /// the output stream or the filesystem does not.
    pub fn is_request_local(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::MissingSection { .. } | Error::Shape(_)
        )
    }
}
