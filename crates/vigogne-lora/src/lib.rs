//! LoRA adapter handling for Vigogne.
//!
//! This crate provides:
//! - Target-module matching and adapter shapes ([`ModelPatcher`])
//! - Extraction of adapter-only state from a full model state
//! - Adapter checkpoints (`adapter_model.safetensors` + `adapter_config.json`)
//! - Trainable parameter summaries
//!
//! The numerical LoRA layers live in the training backend; this crate only
//! describes and persists them.

#![warn(missing_docs)]

mod adapter;
mod error;
mod patcher;
mod tensor;
mod trainable;

pub use adapter::*;
pub use error::LoraError;
pub use patcher::*;
pub use tensor::*;
pub use trainable::*;
