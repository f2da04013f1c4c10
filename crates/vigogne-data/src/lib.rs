//! Dataset handling and preprocessing for Vigogne instruction tuning.
//!
//! This crate provides:
//! - Instruction dataset loading (JSON, JSON lines, CSV, Parquet)
//! - Prompt templates with `{instruction}` / `{input}` slots
//! - Percentile-based estimation of the maximum sequence length
//! - Tokenization with prompt masking
//! - Batch collation with pad-to-multiple alignment
//! - A seeded DataLoader and an on-disk preprocessing cache

#![warn(missing_docs)]

pub mod cache;
pub mod collator;
pub mod dataloader;
pub mod dataset;
mod error;
pub mod length;
pub mod pipeline;
pub mod preprocess;
pub mod prompt;
pub mod tokenizer;

pub use cache::{DatasetCache, PreprocessedDataset};
pub use collator::*;
pub use dataloader::*;
pub use dataset::*;
pub use error::DataError;
pub use length::{estimate_max_length, percentile, LengthEstimator, LengthReport};
pub use pipeline::{DataPipeline, PreparedData};
pub use preprocess::{preprocess, preprocess_corpus, PreprocessStats, TokenizedExample};
pub use prompt::PromptTemplate;
pub use tokenizer::*;
