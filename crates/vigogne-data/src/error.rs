//! Data-format errors.

use vigogne_core::VigogneError;

/// Errors raised while reading instruction datasets.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// File extension is not one of the supported dataset formats.
    #[error("Unsupported dataset format '{0}' (expected json, jsonl, csv or parquet)")]
    UnsupportedFormat(String),

    /// A JSON record could not be parsed.
    #[error("Failed to parse JSON record at line {line}: {source}")]
    Json {
        /// 1-based line number (0 for a whole-file JSON array).
        line: usize,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A CSV record could not be read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A Parquet file could not be read.
    #[error("Parquet error: {0}")]
    Parquet(String),

    /// A required column is absent.
    #[error("Column '{column}' not found. Available columns: {available:?}")]
    MissingColumn {
        /// The missing column.
        column: String,
        /// Columns present in the file.
        available: Vec<String>,
    },

    /// I/O error.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being read.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl From<DataError> for VigogneError {
    fn from(e: DataError) -> Self {
        match e {
            DataError::Io { source, .. } => VigogneError::Io(source),
            other => VigogneError::Dataset(other.to_string()),
        }
    }
}
