//! Training callbacks for monitoring and logging.
//!
//! - [`LoggingCallback`] - step and evaluation logging with tracing
//! - [`ProgressCallback`] - progress bar
//! - [`MetricsJsonCallback`] - JSONL metrics file, one event per line

use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use vigogne_core::{EvalMetrics, TrainingCallback};

/// Logs every `log_every` optimizer steps.
pub struct LoggingCallback {
    log_every: usize,
}

impl LoggingCallback {
    /// Create a new logging callback.
    pub fn new(log_every: usize) -> Self {
        Self {
            log_every: log_every.max(1),
        }
    }
}

impl TrainingCallback for LoggingCallback {
    fn on_epoch_start(&mut self, epoch: usize) {
        tracing::debug!(epoch, "Epoch start");
    }

    fn on_step_end(&mut self, step: usize, loss: f64, learning_rate: f64) {
        if step % self.log_every == 0 {
            tracing::info!(step, loss, learning_rate, "Training step");
        }
    }

    fn on_evaluate(&mut self, step: usize, metrics: &EvalMetrics) {
        tracing::info!(
            step,
            eval_loss = metrics.loss,
            perplexity = metrics.perplexity,
            num_tokens = metrics.num_tokens,
            "Evaluation"
        );
    }
}

/// Progress bar over optimizer steps.
pub struct ProgressCallback {
    progress: ProgressBar,
}

impl ProgressCallback {
    /// Create a new progress callback.
    pub fn new(total_steps: usize) -> Self {
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        let progress = ProgressBar::new(total_steps as u64);
        progress.set_style(style);
        Self { progress }
    }
}

impl TrainingCallback for ProgressCallback {
    fn on_train_start(&mut self) {
        self.progress.reset();
    }

    fn on_train_end(&mut self) {
        self.progress.finish_with_message("done");
    }

    fn on_step_end(&mut self, step: usize, loss: f64, learning_rate: f64) {
        self.progress.set_position(step as u64);
        self.progress
            .set_message(format!("loss: {loss:.4} lr: {learning_rate:.2e}"));
    }

    fn on_evaluate(&mut self, _step: usize, metrics: &EvalMetrics) {
        self.progress
            .println(format!("eval_loss: {:.4}", metrics.loss));
    }
}

/// Writes training events to a JSONL file.
///
/// ```json
/// {"event": "step", "step": 1, "epoch": 0, "loss": 2.3, "learning_rate": 0.0003, "timestamp": "..."}
/// {"event": "eval", "step": 200, "eval_loss": 1.9, "perplexity": 6.7, "timestamp": "..."}
/// ```
pub struct MetricsJsonCallback {
    writer: BufWriter<File>,
    path: PathBuf,
    current_epoch: usize,
    config: Option<serde_json::Value>,
}

impl MetricsJsonCallback {
    /// Create the metrics file, truncating an existing one.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            current_epoch: 0,
            config: None,
        })
    }

    /// Record the run configuration in the `train_start` event.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Path of the metrics file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_entry(&mut self, mut entry: serde_json::Value, flush: bool) {
        entry["timestamp"] = serde_json::json!(chrono::Utc::now().to_rfc3339());
        if let Ok(line) = serde_json::to_string(&entry) {
            if let Err(e) = writeln!(self.writer, "{line}") {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to write metrics");
            }
        }
        if flush {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to flush metrics");
        }
    }
}

impl TrainingCallback for MetricsJsonCallback {
    fn on_train_start(&mut self) {
        let mut entry = serde_json::json!({ "event": "train_start" });
        if let Some(config) = &self.config {
            entry["config"] = config.clone();
        }
        self.write_entry(entry, true);
    }

    fn on_train_end(&mut self) {
        self.write_entry(serde_json::json!({ "event": "train_end" }), true);
    }

    fn on_epoch_start(&mut self, epoch: usize) {
        self.current_epoch = epoch;
    }

    fn on_step_end(&mut self, step: usize, loss: f64, learning_rate: f64) {
        let entry = serde_json::json!({
            "event": "step",
            "step": step,
            "epoch": self.current_epoch,
            "loss": loss,
            "learning_rate": learning_rate,
        });
        self.write_entry(entry, step % 10 == 0);
    }

    fn on_evaluate(&mut self, step: usize, metrics: &EvalMetrics) {
        let entry = serde_json::json!({
            "event": "eval",
            "step": step,
            "eval_loss": metrics.loss,
            "perplexity": metrics.perplexity,
            "num_tokens": metrics.num_tokens,
        });
        self.write_entry(entry, true);
    }

    fn on_save(&mut self, path: &Path) {
        let entry = serde_json::json!({
            "event": "checkpoint_saved",
            "path": path.display().to_string(),
        });
        self.write_entry(entry, true);
    }
}

impl Drop for MetricsJsonCallback {
    fn drop(&mut self) {
        self.flush();
    }
}
