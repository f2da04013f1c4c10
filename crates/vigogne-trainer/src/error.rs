//! Error type for training.

use vigogne_core::VigogneError;
use vigogne_lora::LoraError;

/// Error type for training.
#[derive(Debug, thiserror::Error)]
pub enum TrainerError {
    /// Error reported by the training backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// Configuration, data or distributed error.
    #[error(transparent)]
    Core(#[from] VigogneError),
    /// LoRA error.
    #[error("LoRA error: {0}")]
    Lora(#[from] LoraError),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for training operations.
pub type Result<T> = std::result::Result<T, TrainerError>;

impl From<TrainerError> for VigogneError {
    fn from(err: TrainerError) -> Self {
        match err {
            TrainerError::Core(e) => e,
            TrainerError::Io(e) => VigogneError::Io(e),
            TrainerError::Json(e) => VigogneError::Serialization(e.to_string()),
            other => VigogneError::Training(other.to_string()),
        }
    }
}
