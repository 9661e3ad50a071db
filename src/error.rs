use std::path::PathBuf;
use thiserror::Error;

use crate::encoder::EncoderError;
use crate::index::IndexError;
use crate::reader::ReaderError;
use crate::retrieval::PipelineError;
use crate::storage::StorageError;

/// Main error type for QueryMind
#[derive(Error, Debug)]
pub enum QueryMindError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Malformed or out-of-range request parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Passage list / index mismatch or unreadable corpus
    #[error("Corpus error: {0}")]
    Corpus(String),

    /// Vector index errors
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Question encoder errors
    #[error(transparent)]
    Encoder(#[from] EncoderError),

    /// Span reader errors
    #[error(transparent)]
    Reader(#[from] ReaderError),

    /// Retrieval-and-reading pipeline errors
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Conversation store errors
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Server errors
    #[error("Server error: {0}")]
    Server(String),

    /// Server not running
    #[error("Server is not running at {path}")]
    ServerNotRunning { path: PathBuf },
}

impl QueryMindError {
    /// Whether the error was caused by the caller rather than by the system
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            QueryMindError::InvalidInput(_)
                | QueryMindError::Pipeline(PipelineError::InvalidQuery(_))
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for QueryMind operations
pub type Result<T> = std::result::Result<T, QueryMindError>;
