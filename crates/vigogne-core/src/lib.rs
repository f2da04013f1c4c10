//! Core types, traits, and configuration for Vigogne instruction fine-tuning.
//!
//! This crate provides the foundational abstractions used throughout the
//! workspace:
//!
//! - Configuration types for the base model, LoRA, data and training
//! - Error handling infrastructure
//! - Process coordination for multi-process runs
//! - Learning rate schedules
//! - Redacted handling of hub tokens

#![warn(missing_docs)]

mod config;
pub mod distributed;
mod error;
pub mod scheduler;
mod secrets;
mod traits;
mod types;

pub use config::*;
pub use distributed::ProcessContext;
pub use error::*;
pub use scheduler::LearningRateScheduler;
pub use secrets::SecretString;
pub use traits::*;
pub use types::*;
