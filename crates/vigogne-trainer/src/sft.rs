//! Supervised fine-tuning loop.
//!
//! Drives a [`CausalLmBackend`] over collated batches with gradient
//! accumulation, a learning rate schedule, periodic evaluation and adapter
//! checkpoints.

use crate::{CausalLmBackend, CheckpointManager, CheckpointMetadata, LossAccumulator, Result};
use std::path::{Path, PathBuf};
use vigogne_core::{
    EvalMetrics, LearningRateScheduler, LoraConfig, TrainingCallback, TrainingConfig, VigogneError,
};
use vigogne_data::DataLoader;
use vigogne_lora::AdapterConfig;

/// Subdirectory of the output directory holding step checkpoints.
pub const CHECKPOINT_DIR_NAME: &str = "checkpoints";

/// Training progress.
#[derive(Debug, Clone, Default)]
pub struct TrainingState {
    /// Optimizer steps taken.
    pub step: usize,
    /// Current epoch.
    pub epoch: usize,
    /// Loss of the last optimizer step.
    pub loss: Option<f64>,
    /// Learning rate of the last optimizer step.
    pub learning_rate: f64,
    /// Label tokens trained on.
    pub tokens_processed: usize,
    /// Most recent evaluation.
    pub last_eval: Option<EvalMetrics>,
}

/// Supervised fine-tuning trainer.
pub struct SftTrainer<B> {
    backend: B,
    config: TrainingConfig,
    lora: LoraConfig,
    base_model: Option<String>,
    callbacks: Vec<Box<dyn TrainingCallback>>,
    state: TrainingState,
}

impl<B: CausalLmBackend> SftTrainer<B> {
    /// Create a trainer over a backend already prepared with
    /// [`prepare_model`](crate::prepare_model).
    pub fn new(backend: B, config: TrainingConfig, lora: LoraConfig) -> Result<Self> {
        config.validate()?;
        lora.validate()?;
        Ok(Self {
            backend,
            config,
            lora,
            base_model: None,
            callbacks: Vec::new(),
            state: TrainingState::default(),
        })
    }

    /// Record the base model in `adapter_config.json`.
    pub fn with_base_model(mut self, base_model: impl Into<String>) -> Self {
        self.base_model = Some(base_model.into());
        self
    }

    /// Register a callback.
    pub fn add_callback(&mut self, callback: Box<dyn TrainingCallback>) {
        self.callbacks.push(callback);
    }

    /// Current progress.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Consume the trainer, returning the backend.
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Number of optimizer steps a run over `train` takes.
    pub fn total_steps(&self, train: &DataLoader) -> usize {
        match self.config.max_steps {
            Some(max) => max,
            None => {
                let per_epoch = train
                    .num_batches()
                    .div_ceil(self.config.gradient_accumulation_steps);
                per_epoch * self.config.num_epochs
            }
        }
    }

    fn checkpoint_manager(&self) -> Result<CheckpointManager> {
        let adapter_config =
            AdapterConfig::from_lora_config(&self.lora, self.base_model.as_deref());
        let dir = Path::new(&self.config.output_dir).join(CHECKPOINT_DIR_NAME);
        Ok(CheckpointManager::new(dir, adapter_config, self.lora.bias)?
            .with_max_checkpoints(self.config.save_total_limit))
    }

    /// Train, then save the final adapter into the output directory.
    ///
    /// Returns the final state.
    pub fn train(
        &mut self,
        train: &mut DataLoader,
        mut eval: Option<&mut DataLoader>,
    ) -> Result<TrainingState> {
        if train.num_batches() == 0 {
            return Err(VigogneError::Config(
                "Training set yields no batches with this batch size".into(),
            )
            .into());
        }
        let total_steps = self.total_steps(train);
        let mut scheduler = LearningRateScheduler::from_config(&self.config, total_steps)?;
        let checkpoints = self.checkpoint_manager()?;
        let accumulation = self.config.gradient_accumulation_steps;

        tracing::info!(
            num_examples = train.len(),
            batches_per_epoch = train.num_batches(),
            gradient_accumulation_steps = accumulation,
            total_steps,
            warmup_steps = scheduler.warmup_steps(),
            "Starting training"
        );
        self.state = TrainingState::default();
        self.callbacks.iter_mut().for_each(|cb| cb.on_train_start());

        let mut window = LossAccumulator::default();
        'epochs: for epoch in 0.. {
            if self.config.max_steps.is_none() && epoch >= self.config.num_epochs {
                break;
            }
            self.state.epoch = epoch;
            train.reset(Some(self.config.seed.wrapping_add(epoch as u64)));
            self.callbacks.iter_mut().for_each(|cb| cb.on_epoch_start(epoch));

            let mut pending = 0;
            while let Some(batch) = train.next_batch() {
                let output = self.backend.train_step(&batch?)?;
                window.add(output);
                pending += 1;
                if pending == accumulation {
                    pending = 0;
                    self.update(&mut scheduler, &mut window, &checkpoints, eval.as_deref_mut())?;
                    if scheduler.is_complete() {
                        self.callbacks.iter_mut().for_each(|cb| cb.on_epoch_end(epoch));
                        break 'epochs;
                    }
                }
            }
            if pending > 0 {
                self.update(&mut scheduler, &mut window, &checkpoints, eval.as_deref_mut())?;
            }
            self.callbacks.iter_mut().for_each(|cb| cb.on_epoch_end(epoch));
            if scheduler.is_complete() {
                break;
            }
        }

        if let Some(loader) = eval {
            let metrics = self.evaluate(loader)?;
            self.report_eval(metrics);
        }

        let output_dir = PathBuf::from(&self.config.output_dir);
        checkpoints.save_final(&output_dir, &self.backend.state_dict())?;
        self.callbacks.iter_mut().for_each(|cb| cb.on_save(&output_dir));
        self.callbacks.iter_mut().for_each(|cb| cb.on_train_end());

        tracing::info!(
            steps = self.state.step,
            tokens = self.state.tokens_processed,
            output_dir = %output_dir.display(),
            "Training complete"
        );
        Ok(self.state.clone())
    }

    fn update(
        &mut self,
        scheduler: &mut LearningRateScheduler,
        window: &mut LossAccumulator,
        checkpoints: &CheckpointManager,
        eval: Option<&mut DataLoader>,
    ) -> Result<()> {
        let learning_rate = scheduler.current_lr();
        self.backend
            .optimizer_step(learning_rate, self.config.max_grad_norm)?;
        scheduler.step();

        self.state.step += 1;
        self.state.tokens_processed += window.num_tokens();
        self.state.learning_rate = learning_rate;
        self.state.loss = window.take();
        if self.state.loss.is_none() {
            tracing::debug!(step = self.state.step, "Optimizer step without label tokens");
        }

        let step = self.state.step;
        let loss = self.state.loss.unwrap_or(0.0);
        self.callbacks
            .iter_mut()
            .for_each(|cb| cb.on_step_end(step, loss, learning_rate));

        let mut eval_loss = None;
        if let (Some(every), Some(loader)) = (self.config.eval_steps, eval) {
            if every > 0 && step % every == 0 {
                let metrics = self.evaluate(loader)?;
                eval_loss = Some(metrics.loss);
                self.report_eval(metrics);
            }
        }

        if let Some(every) = self.config.save_steps {
            if every > 0 && step % every == 0 {
                let metadata = CheckpointMetadata::new(step, self.state.epoch, learning_rate)
                    .with_loss(self.state.loss)
                    .with_eval_loss(eval_loss)
                    .with_seed(self.config.seed);
                let path = checkpoints.save_checkpoint(&self.backend.state_dict(), &metadata)?;
                self.callbacks.iter_mut().for_each(|cb| cb.on_save(&path));
            }
        }
        Ok(())
    }

    fn report_eval(&mut self, metrics: EvalMetrics) {
        let step = self.state.step;
        self.callbacks
            .iter_mut()
            .for_each(|cb| cb.on_evaluate(step, &metrics));
        self.state.last_eval = Some(metrics);
    }

    /// Token-weighted loss over a whole evaluation set.
    pub fn evaluate(&mut self, loader: &mut DataLoader) -> Result<EvalMetrics> {
        loader.reset(None);
        let mut acc = LossAccumulator::default();
        while let Some(batch) = loader.next_batch() {
            acc.add(self.backend.eval_step(&batch?)?);
        }
        let loss = acc.mean().unwrap_or(f64::NAN);
        Ok(EvalMetrics::from_loss(loss, acc.num_tokens()))
    }
}
