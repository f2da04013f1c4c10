//! LoRA error type.

use vigogne_core::VigogneError;

/// Errors raised by adapter handling.
#[derive(Debug, thiserror::Error)]
pub enum LoraError {
    /// Safetensors (de)serialization error.
    #[error("Safetensors error: {0}")]
    SafeTensors(String),
    /// Shape mismatch error.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Invalid state error.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON error in `adapter_config.json`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<safetensors::SafeTensorError> for LoraError {
    fn from(e: safetensors::SafeTensorError) -> Self {
        LoraError::SafeTensors(e.to_string())
    }
}

impl From<LoraError> for VigogneError {
    fn from(e: LoraError) -> Self {
        match e {
            LoraError::Io(e) => VigogneError::Io(e),
            LoraError::Json(e) => VigogneError::Serialization(e.to_string()),
            other => VigogneError::Training(other.to_string()),
        }
    }
}
