//! Training orchestration for Vigogne.
//!
//! This crate provides:
//! - The [`CausalLmBackend`] contract for the model side of training
//! - Supervised fine-tuning with gradient accumulation and LR scheduling
//! - Adapter checkpoints with rotation
//! - Training callbacks

#![warn(missing_docs)]

pub mod backend;
pub mod callbacks;
pub mod checkpoint;
mod error;
pub mod sft;

pub use backend::*;
pub use callbacks::*;
pub use checkpoint::*;
pub use error::*;
pub use sft::*;
