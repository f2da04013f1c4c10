//! Learning rate schedules handed to the training backend.
//!
//! The backend owns the optimizer; the driver only decides which learning
//! rate each optimizer step uses.

use crate::{LrSchedulerType, Result, TrainingConfig, VigogneError};
use std::f64::consts::PI;

/// Learning rate scheduler that computes LR based on training progress.
#[derive(Debug, Clone)]
pub struct LearningRateScheduler {
    base_lr: f64,
    min_lr: f64,
    total_steps: usize,
    warmup_steps: usize,
    scheduler_type: LrSchedulerType,
    num_restarts: usize,
    current_step: usize,
}

impl LearningRateScheduler {
    /// Create a new learning rate scheduler.
    pub fn new(
        base_lr: f64,
        total_steps: usize,
        warmup_steps: usize,
        scheduler_type: LrSchedulerType,
    ) -> Self {
        Self {
            base_lr,
            min_lr: 0.0,
            total_steps,
            warmup_steps,
            scheduler_type,
            num_restarts: 1,
            current_step: 0,
        }
    }

    /// Build the schedule described by a training configuration.
    ///
    /// `warmup_ratio` takes precedence over `warmup_steps` when set.
    pub fn from_config(config: &TrainingConfig, total_steps: usize) -> Result<Self> {
        if total_steps == 0 {
            return Err(VigogneError::Config(
                "cannot schedule a run with zero optimizer steps".into(),
            ));
        }
        let warmup_steps = match config.warmup_ratio {
            Some(ratio) => (total_steps as f64 * ratio).ceil() as usize,
            None => config.warmup_steps,
        };
        Ok(Self::new(
            config.learning_rate,
            total_steps,
            warmup_steps.min(total_steps),
            config.lr_scheduler,
        ))
    }

    /// Set minimum learning rate.
    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    /// Set number of restarts for cosine with restarts.
    pub fn with_num_restarts(mut self, num_restarts: usize) -> Self {
        self.num_restarts = num_restarts;
        self
    }

    /// Get learning rate for a specific step.
    #[must_use]
    pub fn get_lr(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            let warmup_factor = step as f64 / self.warmup_steps.max(1) as f64;
            return self.min_lr + (self.base_lr - self.min_lr) * warmup_factor;
        }

        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps);
        let current_decay_step = step.saturating_sub(self.warmup_steps);

        if decay_steps == 0 {
            return self.base_lr;
        }

        let progress = (current_decay_step as f64 / decay_steps as f64).min(1.0);
        let span = self.base_lr - self.min_lr;

        match self.scheduler_type {
            LrSchedulerType::Constant => self.base_lr,
            LrSchedulerType::Linear => self.min_lr + span * (1.0 - progress),
            LrSchedulerType::Cosine => self.min_lr + span * 0.5 * (1.0 + (PI * progress).cos()),
            LrSchedulerType::CosineWithRestarts => {
                let cycle_length = decay_steps / self.num_restarts.max(1);
                let cycle_progress = if cycle_length > 0 {
                    (current_decay_step % cycle_length) as f64 / cycle_length as f64
                } else {
                    0.0
                };
                self.min_lr + span * 0.5 * (1.0 + (PI * cycle_progress).cos())
            }
            LrSchedulerType::Polynomial => self.min_lr + span * (1.0 - progress).powi(2),
        }
    }

    /// Get learning rate for current step.
    #[must_use]
    pub fn current_lr(&self) -> f64 {
        self.get_lr(self.current_step)
    }

    /// Advance the scheduler by one step.
    pub fn step(&mut self) {
        self.current_step += 1;
    }

    /// Set the current step (used when resuming).
    pub fn set_step(&mut self, step: usize) {
        self.current_step = step;
    }

    /// Get the current step.
    #[must_use]
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Total number of optimizer steps in the schedule.
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Number of warmup steps.
    #[must_use]
    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    /// Check if training is complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_step >= self.total_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_scheduler() {
        let scheduler = LearningRateScheduler::new(1e-4, 1000, 0, LrSchedulerType::Constant);

        assert!((scheduler.get_lr(0) - 1e-4).abs() < 1e-10);
        assert!((scheduler.get_lr(500) - 1e-4).abs() < 1e-10);
        assert!((scheduler.get_lr(999) - 1e-4).abs() < 1e-10);
    }

    #[test]
    fn test_linear_decay_reaches_zero() {
        let scheduler = LearningRateScheduler::new(1e-4, 1000, 0, LrSchedulerType::Linear);

        assert!((scheduler.get_lr(0) - 1e-4).abs() < 1e-10);
        assert!((scheduler.get_lr(500) - 5e-5).abs() < 1e-10);
        assert!(scheduler.get_lr(1000).abs() < 1e-10);
    }

    #[test]
    fn test_warmup() {
        let scheduler = LearningRateScheduler::new(1e-4, 1000, 100, LrSchedulerType::Cosine);

        assert_eq!(scheduler.get_lr(0), 0.0);
        assert!(scheduler.get_lr(50) < scheduler.get_lr(100));
        assert!((scheduler.get_lr(100) - 1e-4).abs() < 1e-10);
        assert!(scheduler.get_lr(999) < scheduler.get_lr(500));
    }

    #[test]
    fn test_from_config_warmup_ratio() {
        let config = TrainingConfig {
            warmup_ratio: Some(0.1),
            lr_scheduler: LrSchedulerType::Cosine,
            ..Default::default()
        };
        let scheduler = LearningRateScheduler::from_config(&config, 200).unwrap();
        assert_eq!(scheduler.warmup_steps(), 20);
        assert_eq!(scheduler.total_steps(), 200);
    }

    #[test]
    fn test_from_config_clamps_warmup() {
        // Default warmup (100) is longer than this tiny run.
        let scheduler =
            LearningRateScheduler::from_config(&TrainingConfig::default(), 10).unwrap();
        assert_eq!(scheduler.warmup_steps(), 10);
    }

    #[test]
    fn test_from_config_zero_steps() {
        assert!(LearningRateScheduler::from_config(&TrainingConfig::default(), 0).is_err());
    }

    #[test]
    fn test_step_tracking() {
        let mut scheduler = LearningRateScheduler::new(1e-3, 3, 0, LrSchedulerType::Linear);
        assert!(!scheduler.is_complete());
        scheduler.step();
        scheduler.step();
        scheduler.step();
        assert_eq!(scheduler.current_step(), 3);
        assert!(scheduler.is_complete());
    }
}
