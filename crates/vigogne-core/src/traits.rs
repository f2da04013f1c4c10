//! Core trait definitions.

use crate::EvalMetrics;
use std::path::Path;

/// Callback trait for training events.
///
/// Every hook has an empty default so callbacks only implement what they
/// observe.
pub trait TrainingCallback: Send {
    /// Called at the start of training.
    fn on_train_start(&mut self) {}

    /// Called at the end of training.
    fn on_train_end(&mut self) {}

    /// Called at the start of each epoch.
    fn on_epoch_start(&mut self, _epoch: usize) {}

    /// Called at the end of each epoch.
    fn on_epoch_end(&mut self, _epoch: usize) {}

    /// Called after each optimizer step with the step loss and learning rate.
    fn on_step_end(&mut self, _step: usize, _loss: f64, _learning_rate: f64) {}

    /// Called after an evaluation pass.
    fn on_evaluate(&mut self, _step: usize, _metrics: &EvalMetrics) {}

    /// Called when an adapter checkpoint is saved.
    fn on_save(&mut self, _path: &Path) {}
}
