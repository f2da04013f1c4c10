//! HuggingFace Hub integration for Vigogne.
//!
//! Fetches a base model's tokenizer files, or finds them in a local model
//! directory.

#![warn(missing_docs)]

mod download;

pub use download::*;
