//! Percentile-based estimation of the maximum sequence length.

use crate::{PromptTemplate, RawExample, TextTokenizer};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vigogne_core::{Result, VigogneError};

/// Percentile of `values` with linear interpolation between closest ranks.
///
/// Matches numpy's default (`linear`) method: the rank is
/// `q / 100 * (n - 1)`.
pub fn percentile(values: &[usize], q: f64) -> Result<f64> {
    if values.is_empty() {
        return Err(VigogneError::Config(
            "Cannot take a percentile of an empty corpus".into(),
        ));
    }
    check_percentile(q)?;

    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    Ok(sorted_percentile(&sorted, q))
}

fn check_percentile(q: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&q) {
        return Err(VigogneError::Config(format!(
            "Percentile must be in [0, 100], got {q}"
        )));
    }
    Ok(())
}

fn sorted_percentile(sorted: &[usize], q: f64) -> f64 {
    let rank = (q / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let t = rank - lo as f64;
    let a = sorted[lo] as f64;
    let b = sorted[hi] as f64;
    let diff = b - a;
    // Interpolate from the nearer end, like numpy's lerp.
    if t >= 0.5 {
        b - diff * (1.0 - t)
    } else {
        a + diff * t
    }
}

/// Untruncated token count of `prompt + output + eos` for every example.
///
/// Order of the returned lengths follows the input order.
pub fn example_lengths<T: TextTokenizer + ?Sized>(
    examples: &[RawExample],
    template: &PromptTemplate,
    tokenizer: &T,
) -> Result<Vec<usize>> {
    examples
        .par_iter()
        .map(|example| {
            let text = format!(
                "{}{}{}",
                template.format(example),
                example.output,
                tokenizer.eos_token()
            );
            Ok(tokenizer.encode(&text)?.len())
        })
        .collect()
}

/// Derive a maximum sequence length from the corpus.
///
/// Returns the `q`-th percentile of the example lengths, rounded up.
pub fn estimate_max_length<T: TextTokenizer + ?Sized>(
    examples: &[RawExample],
    template: &PromptTemplate,
    q: f64,
    tokenizer: &T,
) -> Result<usize> {
    Ok(LengthReport::compute(examples, template, q, tokenizer)?.model_max_length)
}

/// Length distribution of a corpus and the derived maximum length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LengthReport {
    /// Percentile used for the estimate.
    pub percentile: f64,
    /// Derived maximum sequence length.
    pub model_max_length: usize,
    /// Sorted example lengths.
    pub lengths: Vec<usize>,
}

impl LengthReport {
    /// Tokenize the corpus and compute the report.
    pub fn compute<T: TextTokenizer + ?Sized>(
        examples: &[RawExample],
        template: &PromptTemplate,
        q: f64,
        tokenizer: &T,
    ) -> Result<Self> {
        check_percentile(q)?;
        if examples.is_empty() {
            return Err(VigogneError::Config(
                "Cannot estimate model_max_length from an empty training set".into(),
            ));
        }

        let mut lengths = example_lengths(examples, template, tokenizer)?;
        lengths.sort_unstable();
        let model_max_length = sorted_percentile(&lengths, q).ceil() as usize;

        Ok(Self {
            percentile: q,
            model_max_length: model_max_length.max(1),
            lengths,
        })
    }

    /// Number of examples.
    pub fn num_examples(&self) -> usize {
        self.lengths.len()
    }

    /// Shortest example.
    pub fn min(&self) -> usize {
        self.lengths.first().copied().unwrap_or(0)
    }

    /// Longest example.
    pub fn max(&self) -> usize {
        self.lengths.last().copied().unwrap_or(0)
    }

    /// Mean example length.
    pub fn mean(&self) -> f64 {
        if self.lengths.is_empty() {
            return 0.0;
        }
        self.lengths.iter().sum::<usize>() as f64 / self.lengths.len() as f64
    }

    /// Any other percentile of the same distribution.
    pub fn at(&self, q: f64) -> Result<f64> {
        check_percentile(q)?;
        if self.lengths.is_empty() {
            return Err(VigogneError::Config("Empty length distribution".into()));
        }
        Ok(sorted_percentile(&self.lengths, q))
    }

    /// Number of examples longer than the derived maximum.
    pub fn num_truncated(&self) -> usize {
        self.lengths.len() - self.lengths.partition_point(|&l| l <= self.model_max_length)
    }
}

/// Computes the length report once per run and reuses it afterwards.
#[derive(Debug)]
pub struct LengthEstimator {
    percentile: f64,
    report: OnceCell<LengthReport>,
}

impl LengthEstimator {
    /// Create an estimator for the given percentile.
    pub fn new(percentile: f64) -> Result<Self> {
        check_percentile(percentile)?;
        Ok(Self {
            percentile,
            report: OnceCell::new(),
        })
    }

    /// Estimate the maximum length, tokenizing the corpus on the first call only.
    pub fn estimate<T: TextTokenizer + ?Sized>(
        &self,
        examples: &[RawExample],
        template: &PromptTemplate,
        tokenizer: &T,
    ) -> Result<&LengthReport> {
        self.report.get_or_try_init(|| {
            let report = LengthReport::compute(examples, template, self.percentile, tokenizer)?;
            tracing::info!(
                percentile = self.percentile,
                model_max_length = report.model_max_length,
                num_examples = report.num_examples(),
                "`model_max_length` set from the training example lengths"
            );
            Ok(report)
        })
    }

    /// The cached report, if already computed.
    pub fn report(&self) -> Option<&LengthReport> {
        self.report.get()
    }
}
