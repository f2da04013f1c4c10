//! On-disk cache of preprocessed datasets.
//!
//! Entries are keyed by a SHA-256 fingerprint of everything that determines
//! the tokenized output: dataset bytes, prompt templates, tokenizer and the
//! length setting. A changed input yields a new key, so entries never need
//! invalidation.

use crate::{PreprocessStats, PromptTemplate, TokenizedExample};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use vigogne_core::Result;

/// Name of the cache directory inside the output directory.
pub const CACHE_DIR_NAME: &str = ".cache";

/// A tokenized dataset with the settings it was produced with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessedDataset {
    /// Cache key.
    pub fingerprint: String,
    /// Maximum sequence length the examples were truncated to.
    pub model_max_length: usize,
    /// Preprocessing counters.
    pub stats: PreprocessStats,
    /// The examples, in file order.
    pub examples: Vec<TokenizedExample>,
}

/// Compute the cache key for a dataset file.
///
/// `length_setting` describes how the maximum length is resolved, e.g.
/// `"max_length=512"` or `"percentile=95"`.
pub fn fingerprint(
    dataset_path: &Path,
    template: &PromptTemplate,
    tokenizer_fingerprint: &str,
    length_setting: &str,
) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut reader = BufReader::new(File::open(dataset_path)?);
    std::io::copy(&mut reader, &mut hasher)?;

    for part in [
        template.prompt_input(),
        template.prompt_no_input(),
        tokenizer_fingerprint,
        length_setting,
    ] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Directory of cached [`PreprocessedDataset`]s.
#[derive(Debug, Clone)]
pub struct DatasetCache {
    dir: PathBuf,
}

impl DatasetCache {
    /// Cache rooted at `<output_dir>/.cache`.
    pub fn in_output_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(CACHE_DIR_NAME))
    }

    /// Cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Load an entry if present.
    pub fn load(&self, key: &str) -> Result<Option<PreprocessedDataset>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        let dataset: PreprocessedDataset = serde_json::from_reader(reader)?;
        tracing::info!(
            path = %path.display(),
            num_examples = dataset.examples.len(),
            "Loaded preprocessed dataset from cache"
        );
        Ok(Some(dataset))
    }

    /// Store an entry, replacing any previous one atomically.
    pub fn store(&self, dataset: &PreprocessedDataset) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.entry_path(&dataset.fingerprint);
        let tmp = self.dir.join(format!("{}.json.tmp", dataset.fingerprint));
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, dataset)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(path = %path.display(), "Cached preprocessed dataset");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigogne_core::IGNORE_INDEX;

    fn dataset(key: &str) -> PreprocessedDataset {
        PreprocessedDataset {
            fingerprint: key.to_string(),
            model_max_length: 16,
            stats: PreprocessStats::default(),
            examples: vec![TokenizedExample {
                input_ids: vec![5, 6, 7],
                labels: vec![IGNORE_INDEX, 6, 7],
            }],
        }
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DatasetCache::in_output_dir(dir.path());
        assert!(cache.load("abc").unwrap().is_none());

        let path = cache.store(&dataset("abc")).unwrap();
        assert!(path.starts_with(dir.path().join(CACHE_DIR_NAME)));

        let loaded = cache.load("abc").unwrap().unwrap();
        assert_eq!(loaded.model_max_length, 16);
        assert_eq!(loaded.examples, dataset("abc").examples);
    }

    #[test]
    fn test_fingerprint_depends_on_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.jsonl");
        std::fs::write(&path, "{\"instruction\": \"a\", \"output\": \"b\"}\n").unwrap();

        let french = PromptTemplate::french();
        let base = fingerprint(&path, &french, "tok", "percentile=95").unwrap();
        assert_eq!(base, fingerprint(&path, &french, "tok", "percentile=95").unwrap());
        assert_eq!(base.len(), 64);

        assert_ne!(base, fingerprint(&path, &PromptTemplate::english(), "tok", "percentile=95").unwrap());
        assert_ne!(base, fingerprint(&path, &french, "tok2", "percentile=95").unwrap());
        assert_ne!(base, fingerprint(&path, &french, "tok", "max_length=512").unwrap());

        std::fs::write(&path, "{\"instruction\": \"a\", \"output\": \"c\"}\n").unwrap();
        assert_ne!(base, fingerprint(&path, &french, "tok", "percentile=95").unwrap());
    }
}
