//! DataLoader for creating training batches.

use crate::{Batch, DataCollator, TokenizedExample};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use vigogne_core::{Result, TrainingConfig, VigogneError};

/// Configuration for the DataLoader.
#[derive(Debug, Clone)]
pub struct DataLoaderConfig {
    /// Batch size.
    pub batch_size: usize,
    /// Whether to shuffle the data.
    pub shuffle: bool,
    /// Random seed for shuffling.
    pub seed: u64,
    /// Whether to drop the last incomplete batch.
    pub drop_last: bool,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            shuffle: true,
            seed: 42,
            drop_last: false,
        }
    }
}

impl DataLoaderConfig {
    /// Shuffled training batches as configured for a run.
    pub fn for_training(config: &TrainingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            shuffle: config.shuffle,
            seed: config.seed,
            drop_last: config.drop_last,
        }
    }

    /// Evaluation batches, in file order.
    pub fn for_evaluation(config: &TrainingConfig) -> Self {
        Self {
            batch_size: config.eval_batch_size,
            shuffle: false,
            seed: config.seed,
            drop_last: false,
        }
    }
}

/// DataLoader that yields collated batches from a tokenized dataset.
#[derive(Debug)]
pub struct DataLoader {
    examples: Vec<TokenizedExample>,
    collator: DataCollator,
    config: DataLoaderConfig,
    indices: Vec<usize>,
    position: usize,
}

impl DataLoader {
    /// Create a new DataLoader.
    pub fn new(
        examples: Vec<TokenizedExample>,
        collator: DataCollator,
        config: DataLoaderConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(VigogneError::InvalidArgument(
                "batch_size must be > 0".into(),
            ));
        }
        let mut loader = Self {
            indices: (0..examples.len()).collect(),
            examples,
            collator,
            config,
            position: 0,
        };
        loader.reset(None);
        Ok(loader)
    }

    /// Rewind for a new epoch, reshuffling with `new_seed` (or the configured seed).
    pub fn reset(&mut self, new_seed: Option<u64>) {
        self.position = 0;
        if self.config.shuffle {
            let seed = new_seed.unwrap_or(self.config.seed);
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            self.indices.sort_unstable();
            self.indices.shuffle(&mut rng);
        }
    }

    /// Get the number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        let n = self.examples.len();
        if self.config.drop_last {
            n / self.config.batch_size
        } else {
            n.div_ceil(self.config.batch_size)
        }
    }

    /// Get the total number of examples.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Check if the loader is empty.
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// The collator used for every batch.
    pub fn collator(&self) -> &DataCollator {
        &self.collator
    }

    /// Get the next batch, or `None` at the end of the epoch.
    pub fn next_batch(&mut self) -> Option<Result<Batch>> {
        if self.position >= self.indices.len() {
            return None;
        }

        let batch_end = (self.position + self.config.batch_size).min(self.indices.len());
        if self.config.drop_last && batch_end - self.position < self.config.batch_size {
            return None;
        }

        let batch: Vec<&TokenizedExample> = self.indices[self.position..batch_end]
            .iter()
            .map(|&i| &self.examples[i])
            .collect();
        self.position = batch_end;

        Some(self.collator.collate(&batch))
    }
}

impl Iterator for DataLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}
