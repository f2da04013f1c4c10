//! Instruction dataset records and loading.

use crate::DataError;
use arrow::array::{Array as ArrowArray, StringArray};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use vigogne_core::Result;

/// One instruction-tuning record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExample {
    /// The task description.
    pub instruction: String,
    /// Optional context for the task (empty when absent or null).
    #[serde(default, deserialize_with = "null_as_empty")]
    pub input: String,
    /// The target response.
    pub output: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl RawExample {
    /// Create a new example.
    pub fn new(
        instruction: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            input: input.into(),
            output: output.into(),
        }
    }

    /// Whether the example carries a non-empty input.
    #[must_use]
    pub fn has_input(&self) -> bool {
        !self.input.is_empty()
    }
}

/// On-disk dataset format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// JSON lines, or a single JSON array of records.
    Json,
    /// Comma separated values with a header row.
    Csv,
    /// Apache Parquet with string columns.
    Parquet,
}

impl DatasetFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> std::result::Result<Self, DataError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "json" | "jsonl" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            _ => Err(DataError::UnsupportedFormat(ext)),
        }
    }
}

/// Load every record of a dataset file, choosing the reader by extension.
pub fn load_raw_examples<P: AsRef<Path>>(path: P) -> Result<Vec<RawExample>> {
    let path = path.as_ref();
    let examples = match DatasetFormat::from_path(path)? {
        DatasetFormat::Json => load_json(path)?,
        DatasetFormat::Csv => load_csv(path)?,
        DatasetFormat::Parquet => load_parquet(path)?,
    };
    tracing::info!(
        path = %path.display(),
        num_examples = examples.len(),
        "Loaded dataset"
    );
    Ok(examples)
}

fn io_error(path: &Path, source: std::io::Error) -> DataError {
    DataError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn load_json(path: &Path) -> std::result::Result<Vec<RawExample>, DataError> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut reader = BufReader::new(file);

    // Peek at the first non-whitespace byte to tell arrays from JSON lines.
    let is_array = loop {
        let buf = reader.fill_buf().map_err(|e| io_error(path, e))?;
        if buf.is_empty() {
            break false;
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => {
                let first = buf[pos];
                reader.consume(pos);
                break first == b'[';
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    };

    if is_array {
        return serde_json::from_reader(reader).map_err(|source| DataError::Json { line: 0, source });
    }

    let mut examples = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| io_error(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let example = serde_json::from_str(&line).map_err(|source| DataError::Json {
            line: line_num + 1,
            source,
        })?;
        examples.push(example);
    }
    Ok(examples)
}

fn load_csv(path: &Path) -> std::result::Result<Vec<RawExample>, DataError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut examples = Vec::new();
    for record in reader.deserialize() {
        examples.push(record?);
    }
    Ok(examples)
}

fn load_parquet(path: &Path) -> std::result::Result<Vec<RawExample>, DataError> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| DataError::Parquet(format!("Failed to create Parquet reader: {e}")))?;

    let schema = builder.schema().clone();
    let available = || {
        schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect::<Vec<_>>()
    };
    let required = |column: &str| {
        schema
            .index_of(column)
            .map_err(|_| DataError::MissingColumn {
                column: column.to_string(),
                available: available(),
            })
    };
    let instruction_idx = required("instruction")?;
    let output_idx = required("output")?;
    let input_idx = schema.index_of("input").ok();

    let reader = builder
        .build()
        .map_err(|e| DataError::Parquet(format!("Failed to build Parquet reader: {e}")))?;

    let mut examples = Vec::new();
    for batch in reader {
        let batch =
            batch.map_err(|e| DataError::Parquet(format!("Failed to read Parquet batch: {e}")))?;

        let column = |idx: usize, name: &str| {
            batch
                .column(idx)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| DataError::Parquet(format!("Column '{name}' is not a string type")))
        };
        let instructions = column(instruction_idx, "instruction")?;
        let outputs = column(output_idx, "output")?;
        let inputs = input_idx.map(|idx| column(idx, "input")).transpose()?;

        for i in 0..batch.num_rows() {
            let value = |arr: &StringArray| {
                if arr.is_null(i) {
                    String::new()
                } else {
                    arr.value(i).to_string()
                }
            };
            examples.push(RawExample {
                instruction: value(instructions),
                input: inputs.map(value).unwrap_or_default(),
                output: value(outputs),
            });
        }
    }
    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_jsonl_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "train.jsonl",
            "{\"instruction\": \"Say hello\", \"input\": \"\", \"output\": \"Bonjour!\"}\n\n\
             {\"instruction\": \"Sum\", \"input\": \"1 2\", \"output\": \"3\"}\n",
        );

        let examples = load_raw_examples(&path).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].output, "Bonjour!");
        assert!(!examples[0].has_input());
        assert_eq!(examples[1].input, "1 2");
    }

    #[test]
    fn test_null_input_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "train.jsonl",
            "{\"instruction\": \"a\", \"input\": null, \"output\": \"b\"}\n\
             {\"instruction\": \"c\", \"input\": \"d\", \"output\": \"e\"}\n",
        );

        let examples = load_raw_examples(&path).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0], RawExample::new("a", "", "b"));
        assert!(!examples[0].has_input());
        assert_eq!(examples[1].input, "d");
    }

    #[test]
    fn test_json_array_and_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "train.json",
            "  \n[{\"instruction\": \"A\", \"output\": \"B\"}, {\"instruction\": \"C\", \"input\": \"D\", \"output\": \"E\"}]",
        );

        let examples = load_raw_examples(&path).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].input, "");
        assert_eq!(examples[1], RawExample::new("C", "D", "E"));
    }

    #[test]
    fn test_json_error_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "train.jsonl",
            "{\"instruction\": \"A\", \"output\": \"B\"}\n{\"instruction\": \"A\"}\n",
        );

        let err = load_raw_examples(&path).unwrap_err().to_string();
        assert!(err.contains("line 2"), "unexpected error: {err}");
    }

    #[test]
    fn test_csv_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "train.csv",
            "instruction,input,output\nTranslate,hello,bonjour\n\"Say, hi\",,salut\n",
        );

        let examples = load_raw_examples(&path).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0], RawExample::new("Translate", "hello", "bonjour"));
        assert_eq!(examples[1].instruction, "Say, hi");
        assert!(!examples[1].has_input());
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "train.txt", "hello");
        let err = load_raw_examples(&path).unwrap_err().to_string();
        assert!(err.contains("Unsupported dataset format"));
    }

    #[test]
    fn test_parquet_loading() {
        use arrow::array::StringBuilder;
        use arrow::datatypes::{DataType, Field, Schema};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::arrow_writer::ArrowWriter;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.parquet");

        let schema = Arc::new(Schema::new(vec![
            Field::new("instruction", DataType::Utf8, false),
            Field::new("input", DataType::Utf8, true),
            Field::new("output", DataType::Utf8, false),
        ]));

        let mut instructions = StringBuilder::new();
        instructions.append_value("Translate");
        instructions.append_value("Greet");
        let mut inputs = StringBuilder::new();
        inputs.append_value("cat");
        inputs.append_null();
        let mut outputs = StringBuilder::new();
        outputs.append_value("chat");
        outputs.append_value("Bonjour");

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(instructions.finish()),
                Arc::new(inputs.finish()),
                Arc::new(outputs.finish()),
            ],
        )
        .unwrap();

        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let examples = load_raw_examples(&path).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0], RawExample::new("Translate", "cat", "chat"));
        assert_eq!(examples[1].input, "");
    }

    #[test]
    fn test_parquet_missing_column() {
        use arrow::array::StringBuilder;
        use arrow::datatypes::{DataType, Field, Schema};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::arrow_writer::ArrowWriter;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.parquet");
        let schema = Arc::new(Schema::new(vec![Field::new(
            "instruction",
            DataType::Utf8,
            false,
        )]));
        let mut builder = StringBuilder::new();
        builder.append_value("Only an instruction");
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(builder.finish())]).unwrap();

        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let err = load_raw_examples(&path).unwrap_err().to_string();
        assert!(err.contains("'output' not found"), "unexpected error: {err}");
    }
}
