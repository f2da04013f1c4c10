//! The model side of training.
//!
//! Forward/backward passes, the optimizer and LoRA layer injection are
//! supplied by a [`CausalLmBackend`]. The driver hands it collated batches and
//! learning rates, and reads back losses and parameters.

use crate::Result;
use vigogne_core::LoraConfig;
use vigogne_data::Batch;
use vigogne_lora::{
    LinearModule, LoraModuleSpec, ModelPatcher, ParameterInfo, StateDict, TrainableSummary,
};

/// Loss of one forward pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// Mean cross-entropy over the batch's label tokens.
    pub loss: f64,
    /// Label tokens (labels other than [`IGNORE_INDEX`](vigogne_core::IGNORE_INDEX)) the mean was taken over.
    pub num_tokens: usize,
}

/// A causal language model that can be fine-tuned with LoRA.
///
/// Labels equal to [`IGNORE_INDEX`](vigogne_core::IGNORE_INDEX) must not contribute to the loss, and the
/// backend applies the usual causal shift itself. A batch without any label
/// token reports `num_tokens == 0` and must not produce a NaN gradient.
pub trait CausalLmBackend {
    /// Current vocabulary size of the input embeddings.
    fn vocab_size(&self) -> usize;

    /// Grow the input and output embeddings to `new_vocab_size` rows.
    ///
    /// New rows are initialized with the mean of the existing ones.
    fn resize_token_embeddings(&mut self, new_vocab_size: usize) -> Result<()>;

    /// The model's linear layers.
    fn linear_modules(&self) -> Vec<LinearModule>;

    /// Inject LoRA adapters and freeze every other parameter.
    fn apply_lora(&mut self, adapters: &[LoraModuleSpec]) -> Result<()>;

    /// All parameters with their trainability.
    fn parameters(&self) -> Vec<ParameterInfo>;

    /// Forward and backward pass, accumulating gradients.
    fn train_step(&mut self, batch: &Batch) -> Result<StepOutput>;

    /// Apply and clear the accumulated gradients.
    ///
    /// `max_grad_norm` of zero disables clipping.
    fn optimizer_step(&mut self, learning_rate: f64, max_grad_norm: f64) -> Result<()>;

    /// Forward pass without gradients.
    fn eval_step(&mut self, batch: &Batch) -> Result<StepOutput>;

    /// Live parameter tensors, PEFT-named (`base_model.model.<module>...`).
    fn state_dict(&self) -> StateDict;
}

/// Make a backend ready for LoRA training.
///
/// Resizes the embeddings when the tokenizer gained tokens, injects adapters
/// into the configured target modules and logs the trainable share.
pub fn prepare_model<B: CausalLmBackend + ?Sized>(
    backend: &mut B,
    lora: &LoraConfig,
    tokenizer_vocab_size: usize,
) -> Result<TrainableSummary> {
    if tokenizer_vocab_size > backend.vocab_size() {
        tracing::info!(
            from = backend.vocab_size(),
            to = tokenizer_vocab_size,
            "Resizing token embeddings"
        );
        backend.resize_token_embeddings(tokenizer_vocab_size)?;
    }

    let patcher = ModelPatcher::new(lora.clone())?;
    let adapters = patcher.plan(&backend.linear_modules())?;
    backend.apply_lora(&adapters)?;

    let summary = TrainableSummary::from_parameters(&backend.parameters());
    summary.log();
    Ok(summary)
}

/// Token-weighted running loss.
///
/// Batches are weighted by their label-token count, so a batch whose labels
/// are all [`IGNORE_INDEX`](vigogne_core::IGNORE_INDEX) contributes nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossAccumulator {
    weighted_sum: f64,
    num_tokens: usize,
}

impl LossAccumulator {
    /// Add one forward pass.
    pub fn add(&mut self, output: StepOutput) {
        if output.num_tokens > 0 && output.loss.is_finite() {
            self.weighted_sum += output.loss * output.num_tokens as f64;
            self.num_tokens += output.num_tokens;
        }
    }

    /// Label tokens seen so far.
    pub fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    /// Mean loss, or `None` when no label token was seen.
    pub fn mean(&self) -> Option<f64> {
        (self.num_tokens > 0).then(|| self.weighted_sum / self.num_tokens as f64)
    }

    /// Return the mean and start over.
    pub fn take(&mut self) -> Option<f64> {
        let mean = self.mean();
        *self = Self::default();
        mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_is_token_weighted() {
        let mut acc = LossAccumulator::default();
        acc.add(StepOutput { loss: 1.0, num_tokens: 1 });
        acc.add(StepOutput { loss: 4.0, num_tokens: 3 });
        assert_eq!(acc.mean(), Some(3.25));
        assert_eq!(acc.num_tokens(), 4);
    }

    #[test]
    fn test_zero_token_batches_ignored() {
        let mut acc = LossAccumulator::default();
        acc.add(StepOutput { loss: f64::NAN, num_tokens: 0 });
        assert_eq!(acc.mean(), None);

        acc.add(StepOutput { loss: 2.0, num_tokens: 5 });
        acc.add(StepOutput { loss: 0.0, num_tokens: 0 });
        assert_eq!(acc.take(), Some(2.0));
        assert_eq!(acc.mean(), None);
    }
}
