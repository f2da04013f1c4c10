//! End-to-end data preparation: load, size, tokenize, cache.

use crate::cache::{fingerprint, DatasetCache, PreprocessedDataset};
use crate::length::LengthEstimator;
use crate::preprocess::{build_pool, preprocess_corpus};
use crate::{
    load_raw_examples, DataCollator, LengthReport, PromptTemplate, RawExample, TextTokenizer,
};
use std::path::Path;
use std::time::Duration;
use vigogne_core::distributed::{main_process_first, DEFAULT_BARRIER_TIMEOUT};
use vigogne_core::{DataConfig, ProcessContext, Result, VigogneError};

/// Train and optional eval datasets sharing one maximum length.
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Training split.
    pub train: PreprocessedDataset,
    /// Evaluation split.
    pub eval: Option<PreprocessedDataset>,
    /// Length distribution of the training split, when it was estimated in this run.
    pub length_report: Option<LengthReport>,
}

impl PreparedData {
    /// Maximum sequence length of both splits.
    pub fn model_max_length(&self) -> usize {
        self.train.model_max_length
    }
}

/// Prepares datasets according to a [`DataConfig`].
pub struct DataPipeline<'a, T: TextTokenizer + ?Sized> {
    config: &'a DataConfig,
    tokenizer: &'a T,
    template: PromptTemplate,
    ctx: ProcessContext,
    cache: DatasetCache,
    barrier_timeout: Duration,
}

impl<'a, T: TextTokenizer + ?Sized> DataPipeline<'a, T> {
    /// Create a pipeline caching its results under `<output_dir>/.cache`.
    ///
    /// Fails if the configuration or its prompt template is invalid.
    pub fn new(
        config: &'a DataConfig,
        tokenizer: &'a T,
        ctx: ProcessContext,
        output_dir: &Path,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            template: PromptTemplate::from_config(&config.template)?,
            config,
            tokenizer,
            ctx,
            cache: DatasetCache::in_output_dir(output_dir),
            barrier_timeout: DEFAULT_BARRIER_TIMEOUT,
        })
    }

    /// Override how long non-main ranks wait for the main process.
    pub fn with_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    /// The prompt template in use.
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Collator matching the tokenizer's pad ID.
    pub fn collator(&self, pad_to_multiple_of: Option<usize>) -> DataCollator {
        DataCollator::new(self.tokenizer.pad_token_id()).with_pad_to_multiple_of(pad_to_multiple_of)
    }

    /// Run the full pipeline for the train and eval files.
    ///
    /// In distributed runs rank 0 does the work and the other ranks read its
    /// cached output.
    pub fn prepare(&self) -> Result<PreparedData> {
        let train_file = self
            .config
            .train_file
            .as_deref()
            .ok_or_else(|| VigogneError::Config("You have not specified any train file".into()))?;

        let length_setting = match self.config.model_max_length {
            Some(max) => format!("max_length={max}"),
            None => format!("percentile={}", self.config.model_max_length_percentile),
        };
        let (train, length_report) = self.prepare_split(Path::new(train_file), &length_setting, |examples| {
            match self.config.model_max_length {
                Some(max) => Ok((max, None)),
                None => {
                    let estimator = LengthEstimator::new(self.config.model_max_length_percentile)?;
                    let report = estimator.estimate(examples, &self.template, self.tokenizer)?;
                    Ok((report.model_max_length, Some(report.clone())))
                }
            }
        })?;
        if train.examples.is_empty() {
            return Err(VigogneError::Config(format!(
                "Training file {train_file} contains no examples"
            )));
        }

        let eval = match self.config.eval_file.as_deref() {
            Some(eval_file) => {
                let max = train.model_max_length;
                let (eval, _) = self.prepare_split(
                    Path::new(eval_file),
                    &format!("max_length={max}"),
                    |_| Ok((max, None)),
                )?;
                Some(eval)
            }
            None => None,
        };

        Ok(PreparedData {
            train,
            eval,
            length_report,
        })
    }

    fn prepare_split<F>(
        &self,
        path: &Path,
        length_setting: &str,
        resolve_max_length: F,
    ) -> Result<(PreprocessedDataset, Option<LengthReport>)>
    where
        F: FnOnce(&[RawExample]) -> Result<(usize, Option<LengthReport>)> + Send,
    {
        let key = fingerprint(
            path,
            &self.template,
            &self.tokenizer.fingerprint(),
            length_setting,
        )?;

        main_process_first(&self.ctx, self.cache.dir(), &key, self.barrier_timeout, || {
            // Other ranks only read what the main process stored.
            if !self.ctx.is_main_process() {
                return match self.cache.load(&key)? {
                    Some(dataset) => Ok((dataset, None)),
                    None => Err(VigogneError::Distributed(format!(
                        "Rank {} found no preprocessed dataset for {} from the main process",
                        self.ctx.rank,
                        path.display()
                    ))),
                };
            }

            if self.config.use_cache {
                if let Some(dataset) = self.cache.load(&key)? {
                    return Ok((dataset, None));
                }
            }

            let examples = load_raw_examples(path)?;
            let pool = build_pool(self.config.preprocessing_num_workers)?;
            let (model_max_length, report) = pool.install(|| resolve_max_length(&examples))?;
            let (tokenized, stats) = pool.install(|| {
                preprocess_corpus(&examples, &self.template, model_max_length, self.tokenizer)
            })?;

            let dataset = PreprocessedDataset {
                fingerprint: key.clone(),
                model_max_length,
                stats,
                examples: tokenized,
            };
            if self.config.use_cache || self.ctx.is_distributed() {
                self.cache.store(&dataset)?;
            }
            Ok((dataset, report))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WhitespaceTokenizer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigogne_core::TemplateConfig;

    fn write_jsonl(dir: &Path, name: &str, rows: &[(&str, &str, &str)]) -> String {
        let path = dir.join(name);
        let content: String = rows
            .iter()
            .map(|(i, x, o)| {
                serde_json::json!({"instruction": i, "input": x, "output": o}).to_string() + "\n"
            })
            .collect();
        std::fs::write(&path, content).unwrap();
        path.display().to_string()
    }

    fn config(dir: &Path) -> DataConfig {
        DataConfig {
            train_file: Some(write_jsonl(
                dir,
                "train.jsonl",
                &[("a", "", " b"), ("a b", "", " c"), ("a b c", "x", " d")],
            )),
            template: TemplateConfig::Custom {
                prompt_input: "{instruction} {input}".into(),
                prompt_no_input: "{instruction}".into(),
            },
            model_max_length_percentile: 50.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_prepare_estimates_length() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let tok = WhitespaceTokenizer::default();

        let pipeline =
            DataPipeline::new(&config, &tok, ProcessContext::single(), dir.path()).unwrap();
        let data = pipeline.prepare().unwrap();

        // Lengths 3, 4, 6 -> median 4.
        assert_eq!(data.model_max_length(), 4);
        assert_eq!(data.train.examples.len(), 3);
        assert_eq!(data.train.stats.num_truncated, 1);
        assert!(data.length_report.is_some());
        assert!(data.eval.is_none());
    }

    #[test]
    fn test_prepare_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let tok = WhitespaceTokenizer::default();
        let pipeline =
            DataPipeline::new(&config, &tok, ProcessContext::single(), dir.path()).unwrap();

        let first = pipeline.prepare().unwrap();
        let second = pipeline.prepare().unwrap();
        assert!(second.length_report.is_none());
        assert_eq!(first.train.examples, second.train.examples);
        assert_eq!(second.model_max_length(), 4);
    }

    #[test]
    fn test_eval_split_shares_max_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.model_max_length = Some(3);
        config.use_cache = false;
        config.eval_file = Some(write_jsonl(dir.path(), "eval.jsonl", &[("a b c d", "", " e")]));
        let tok = WhitespaceTokenizer::default();

        let data = DataPipeline::new(&config, &tok, ProcessContext::single(), dir.path())
            .unwrap()
            .prepare()
            .unwrap();
        let eval = data.eval.unwrap();
        assert_eq!(eval.model_max_length, 3);
        assert_eq!(eval.examples[0].len(), 3);
        assert!(!dir.path().join(crate::cache::CACHE_DIR_NAME).exists());
    }

    #[test]
    fn test_missing_train_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig::default();
        let tok = WhitespaceTokenizer::default();
        let err = DataPipeline::new(&config, &tok, ProcessContext::single(), dir.path())
            .err()
            .unwrap();
        assert!(err.to_string().contains("train file"));
    }

    struct CountingTokenizer {
        inner: WhitespaceTokenizer,
        calls: AtomicUsize,
    }

    impl CountingTokenizer {
        fn new() -> Self {
            Self {
                inner: WhitespaceTokenizer::default(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TextTokenizer for CountingTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.encode(text)
        }
        fn decode(&self, ids: &[u32]) -> Result<String> {
            self.inner.decode(ids)
        }
        fn eos_token(&self) -> &str {
            self.inner.eos_token()
        }
        fn pad_token_id(&self) -> u32 {
            self.inner.pad_token_id()
        }
        fn vocab_size(&self) -> usize {
            self.inner.vocab_size()
        }
        fn fingerprint(&self) -> String {
            self.inner.fingerprint()
        }
    }

    #[test]
    fn test_worker_never_tokenizes_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.use_cache = false;

        let main_tok = CountingTokenizer::new();
        let worker_tok = CountingTokenizer::new();
        let main = ProcessContext::new(0, 0, 2).unwrap();
        let worker = ProcessContext::new(1, 1, 2).unwrap();

        let expected = DataPipeline::new(&config, &main_tok, main, dir.path())
            .unwrap()
            .prepare()
            .unwrap();
        let got = DataPipeline::new(&config, &worker_tok, worker, dir.path())
            .unwrap()
            .with_barrier_timeout(Duration::from_secs(1))
            .prepare()
            .unwrap();

        assert!(main_tok.calls() > 0);
        assert_eq!(worker_tok.calls(), 0);
        assert_eq!(expected.train.examples, got.train.examples);
        assert_eq!(got.model_max_length(), expected.model_max_length());
    }

    #[test]
    fn test_worker_fails_when_main_output_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let tok = CountingTokenizer::new();

        let main = ProcessContext::new(0, 0, 2).unwrap();
        DataPipeline::new(&config, &tok, main, dir.path())
            .unwrap()
            .prepare()
            .unwrap();

        // Keep the completion markers, drop the stored datasets.
        let cache_dir = dir.path().join(crate::cache::CACHE_DIR_NAME);
        for entry in std::fs::read_dir(&cache_dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().is_some_and(|e| e == "json") {
                std::fs::remove_file(path).unwrap();
            }
        }

        let worker_tok = CountingTokenizer::new();
        let worker = ProcessContext::new(1, 1, 2).unwrap();
        let err = DataPipeline::new(&config, &worker_tok, worker, dir.path())
            .unwrap()
            .with_barrier_timeout(Duration::from_secs(1))
            .prepare()
            .unwrap_err();
        assert!(matches!(err, VigogneError::Distributed(_)));
        assert_eq!(worker_tok.calls(), 0);
    }

    #[test]
    fn test_worker_reads_main_process_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let tok = WhitespaceTokenizer::default();

        let main = ProcessContext::new(0, 0, 2).unwrap();
        let worker = ProcessContext::new(1, 1, 2).unwrap();
        let expected = DataPipeline::new(&config, &tok, main, dir.path())
            .unwrap()
            .prepare()
            .unwrap();
        let got = DataPipeline::new(&config, &tok, worker, dir.path())
            .unwrap()
            .with_barrier_timeout(Duration::from_secs(1))
            .prepare()
            .unwrap();
        assert_eq!(expected.train.examples, got.train.examples);
    }
}
