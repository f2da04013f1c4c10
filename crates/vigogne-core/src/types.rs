//! Common type definitions.

use serde::{Deserialize, Serialize};

/// Label value excluded from the loss.
///
/// Marks prompt positions and padding in `labels`. Distinct in purpose from
/// the pad token id, which only drives attention masking.
pub const IGNORE_INDEX: i64 = -100;

/// Pad token added to tokenizers that ship without one.
pub const DEFAULT_PAD_TOKEN: &str = "[PAD]";

/// EOS token registered for llama-family tokenizers.
pub const DEFAULT_EOS_TOKEN: &str = "</s>";

/// BOS token registered for llama-family tokenizers.
pub const DEFAULT_BOS_TOKEN: &str = "</s>";

/// UNK token registered for llama-family tokenizers.
pub const DEFAULT_UNK_TOKEN: &str = "</s>";

/// Padding alignment used when reduced-precision training is enabled.
pub const FP16_PAD_MULTIPLE: usize = 8;

/// Data type used to load the base model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// 32-bit floating point.
    Float32,
    /// 16-bit floating point.
    #[default]
    Float16,
    /// Brain floating point (16-bit).
    BFloat16,
}

impl Dtype {
    /// Size of the dtype in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float16 | Self::BFloat16 => 2,
        }
    }
}

/// Reduced-precision scheme for the frozen base weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    /// No quantization (full precision).
    None,
    /// 8-bit integer weights.
    #[default]
    Int8,
}

/// Placement of the base model across local devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMap {
    /// Let the backend spread layers over the available devices.
    #[default]
    Auto,
    /// Put the whole model on one device (one process per device).
    Device(usize),
}

/// Evaluation metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Token-weighted mean loss.
    pub loss: f64,
    /// Perplexity (`exp(loss)`).
    pub perplexity: f64,
    /// Number of label tokens the loss was averaged over.
    pub num_tokens: usize,
}

impl EvalMetrics {
    /// Build metrics from a mean loss.
    pub fn from_loss(loss: f64, num_tokens: usize) -> Self {
        Self {
            loss,
            perplexity: loss.exp(),
            num_tokens,
        }
    }
}
