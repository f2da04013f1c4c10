//! Tokenization and prompt masking of instruction examples.

use crate::{PromptTemplate, RawExample, TextTokenizer};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vigogne_core::{Result, VigogneError, IGNORE_INDEX};

/// A tokenized example ready for collation.
///
/// `labels` has the same length as `input_ids`. Positions covered by the
/// prompt hold [`IGNORE_INDEX`], every other position mirrors `input_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedExample {
    /// Token IDs of prompt, response and EOS.
    pub input_ids: Vec<u32>,
    /// Loss targets.
    pub labels: Vec<i64>,
}

impl TokenizedExample {
    /// Sequence length.
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of positions that contribute to the loss.
    pub fn num_label_tokens(&self) -> usize {
        self.labels.iter().filter(|&&l| l != IGNORE_INDEX).count()
    }

    /// Number of masked prompt positions.
    pub fn prompt_len(&self) -> usize {
        self.labels.iter().take_while(|&&l| l == IGNORE_INDEX).count()
    }
}

/// Counters collected while preprocessing a corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessStats {
    /// Examples processed.
    pub num_examples: usize,
    /// Examples cut at the maximum length.
    pub num_truncated: usize,
    /// Examples left without any loss position.
    pub num_fully_masked: usize,
    /// Total tokens.
    pub num_tokens: usize,
    /// Total loss positions.
    pub num_label_tokens: usize,
}

impl PreprocessStats {
    fn record(&mut self, example: &TokenizedExample, truncated: bool) {
        let label_tokens = example.num_label_tokens();
        self.num_examples += 1;
        self.num_truncated += usize::from(truncated);
        self.num_fully_masked += usize::from(label_tokens == 0);
        self.num_tokens += example.len();
        self.num_label_tokens += label_tokens;
    }
}

/// Tokenize one example and mask its prompt.
///
/// The prompt and the full text are tokenized separately; the masked span is
/// the truncated prompt length. When truncation cuts into the prompt the
/// whole row is masked.
pub fn preprocess<T: TextTokenizer + ?Sized>(
    example: &RawExample,
    template: &PromptTemplate,
    model_max_length: usize,
    tokenizer: &T,
) -> Result<TokenizedExample> {
    preprocess_one(example, template, model_max_length, tokenizer).map(|(example, _)| example)
}

fn preprocess_one<T: TextTokenizer + ?Sized>(
    example: &RawExample,
    template: &PromptTemplate,
    model_max_length: usize,
    tokenizer: &T,
) -> Result<(TokenizedExample, bool)> {
    if model_max_length == 0 {
        return Err(VigogneError::InvalidArgument(
            "model_max_length must be > 0".into(),
        ));
    }

    let prompt = template.format(example);
    let prompt_len = tokenizer.tokenize(&prompt, Some(model_max_length))?.len();

    let full_text = format!("{prompt}{}{}", example.output, tokenizer.eos_token());
    let mut input_ids = tokenizer.encode(&full_text)?;
    let truncated = input_ids.len() > model_max_length;
    input_ids.truncate(model_max_length);

    let masked = prompt_len.min(input_ids.len());
    let labels = std::iter::repeat(IGNORE_INDEX)
        .take(masked)
        .chain(input_ids[masked..].iter().map(|&id| i64::from(id)))
        .collect();

    Ok((TokenizedExample { input_ids, labels }, truncated))
}

/// Preprocess a whole corpus in parallel, keeping input order.
///
/// Runs on the current rayon pool; wrap the call in
/// [`rayon::ThreadPool::install`] to bound the number of workers.
pub fn preprocess_corpus<T: TextTokenizer + ?Sized>(
    examples: &[RawExample],
    template: &PromptTemplate,
    model_max_length: usize,
    tokenizer: &T,
) -> Result<(Vec<TokenizedExample>, PreprocessStats)> {
    let results: Vec<(TokenizedExample, bool)> = examples
        .par_iter()
        .map(|example| preprocess_one(example, template, model_max_length, tokenizer))
        .collect::<Result<_>>()?;

    let mut stats = PreprocessStats::default();
    let tokenized = results
        .into_iter()
        .map(|(example, truncated)| {
            stats.record(&example, truncated);
            example
        })
        .collect();

    tracing::info!(
        num_examples = stats.num_examples,
        num_truncated = stats.num_truncated,
        num_tokens = stats.num_tokens,
        num_label_tokens = stats.num_label_tokens,
        model_max_length,
        "Preprocessed dataset"
    );
    if stats.num_fully_masked > 0 {
        tracing::warn!(
            num_fully_masked = stats.num_fully_masked,
            "Some examples have no response tokens left after truncation"
        );
    }

    Ok((tokenized, stats))
}

/// Build a rayon pool with the configured number of workers.
///
/// `None` uses rayon's default (one thread per core).
pub fn build_pool(num_workers: Option<usize>) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers.unwrap_or(0))
        .thread_name(|i| format!("vigogne-preprocess-{i}"))
        .build()
        .map_err(|e| VigogneError::InvalidArgument(format!("Failed to build worker pool: {e}")))
}
