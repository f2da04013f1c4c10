//! Error types for Vigogne.

use thiserror::Error;

/// Result type alias for Vigogne operations.
pub type Result<T> = std::result::Result<T, VigogneError>;

/// Main error type for Vigogne operations.
#[derive(Error, Debug)]
pub enum VigogneError {
    /// Configuration errors (missing train file, empty corpus, malformed template).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument passed to an operation (e.g. collating an empty batch).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Tokenizer errors.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Dataset loading or parsing errors.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HuggingFace Hub errors.
    #[error("Hub error: {0}")]
    Hub(String),

    /// Errors reported by the training backend.
    #[error("Training error: {0}")]
    Training(String),

    /// Coordination errors between training processes.
    #[error("Distributed error: {0}")]
    Distributed(String),
}

impl From<serde_json::Error> for VigogneError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for VigogneError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
