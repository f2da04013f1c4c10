//! Adapter checkpoints written during training.
//!
//! Each checkpoint is a `step_<n>` directory holding the adapter-only
//! weights, `adapter_config.json` and a `metadata.json` with the training
//! progress. A `latest` file names the newest one.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use vigogne_core::LoraBias;
use vigogne_lora::{extract_adapter_state, load_adapter, save_adapter, AdapterConfig, StateDict};

const METADATA_FILE: &str = "metadata.json";
const LATEST_FILE: &str = "latest";
const STEP_PREFIX: &str = "step_";

/// Training state metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    /// Optimizer step.
    pub step: usize,
    /// Epoch.
    pub epoch: usize,
    /// Token-weighted training loss of the last step.
    pub loss: Option<f64>,
    /// Evaluation loss, when an evaluation ran at this step.
    pub eval_loss: Option<f64>,
    /// Learning rate of the last step.
    pub learning_rate: f64,
    /// Random seed.
    pub seed: u64,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl CheckpointMetadata {
    /// Metadata stamped with the current time.
    pub fn new(step: usize, epoch: usize, learning_rate: f64) -> Self {
        Self {
            step,
            epoch,
            loss: None,
            eval_loss: None,
            learning_rate,
            seed: 42,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Set the training loss.
    pub fn with_loss(mut self, loss: Option<f64>) -> Self {
        self.loss = loss;
        self
    }

    /// Set the evaluation loss.
    pub fn with_eval_loss(mut self, loss: Option<f64>) -> Self {
        self.eval_loss = loss;
        self
    }

    /// Set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// A checkpoint read back from disk.
#[derive(Debug, Clone)]
pub struct LoadedCheckpoint {
    /// Adapter configuration.
    pub config: AdapterConfig,
    /// Adapter weights.
    pub weights: StateDict,
    /// Progress at save time.
    pub metadata: CheckpointMetadata,
}

/// Saves adapter checkpoints and rotates old ones.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
    max_checkpoints: Option<usize>,
    adapter_config: AdapterConfig,
    bias: LoraBias,
}

impl CheckpointManager {
    /// Create a manager writing under `checkpoint_dir`.
    pub fn new(
        checkpoint_dir: impl AsRef<Path>,
        adapter_config: AdapterConfig,
        bias: LoraBias,
    ) -> Result<Self> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        fs::create_dir_all(&checkpoint_dir)?;
        Ok(Self {
            checkpoint_dir,
            max_checkpoints: None,
            adapter_config,
            bias,
        })
    }

    /// Keep at most `max` step checkpoints (`None` keeps all).
    pub fn with_max_checkpoints(mut self, max: Option<usize>) -> Self {
        self.max_checkpoints = max;
        self
    }

    /// Checkpoint directory.
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Save the adapter part of `model_state` as `step_<n>`.
    pub fn save_checkpoint(
        &self,
        model_state: &StateDict,
        metadata: &CheckpointMetadata,
    ) -> Result<PathBuf> {
        let step_dir = self
            .checkpoint_dir
            .join(format!("{STEP_PREFIX}{}", metadata.step));
        self.write(&step_dir, model_state)?;
        fs::write(
            step_dir.join(METADATA_FILE),
            serde_json::to_string_pretty(metadata)?,
        )?;
        fs::write(
            self.checkpoint_dir.join(LATEST_FILE),
            format!("{STEP_PREFIX}{}", metadata.step),
        )?;

        self.cleanup_old_checkpoints()?;
        tracing::info!(step = metadata.step, path = %step_dir.display(), "Saved checkpoint");
        Ok(step_dir)
    }

    /// Save the final adapter directly into `dir`.
    pub fn save_final(&self, dir: &Path, model_state: &StateDict) -> Result<()> {
        self.write(dir, model_state)
    }

    fn write(&self, dir: &Path, model_state: &StateDict) -> Result<()> {
        let adapter = extract_adapter_state(model_state, self.bias);
        if adapter.is_empty() {
            tracing::warn!(path = %dir.display(), "Model state has no LoRA parameters");
        }
        save_adapter(dir, &adapter, &self.adapter_config)?;
        Ok(())
    }

    fn cleanup_old_checkpoints(&self) -> Result<()> {
        let Some(max) = self.max_checkpoints else {
            return Ok(());
        };

        let checkpoints = self.list_checkpoints()?;
        let excess = checkpoints.len().saturating_sub(max);
        for (step, path) in checkpoints.into_iter().take(excess) {
            match fs::remove_dir_all(&path) {
                Ok(()) => tracing::debug!(step, "Removed old checkpoint"),
                Err(e) => tracing::warn!(step, error = %e, "Failed to remove old checkpoint"),
            }
        }
        Ok(())
    }

    /// Step checkpoints on disk, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut checkpoints: Vec<(usize, PathBuf)> = fs::read_dir(&self.checkpoint_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let step = name.strip_prefix(STEP_PREFIX)?.parse::<usize>().ok()?;
                Some((step, entry.path()))
            })
            .collect();

        checkpoints.sort_by_key(|(step, _)| *step);
        Ok(checkpoints)
    }

    /// Load a checkpoint directory.
    pub fn load_checkpoint(path: &Path) -> Result<LoadedCheckpoint> {
        let (config, weights) = load_adapter(path)?;
        let metadata: CheckpointMetadata =
            serde_json::from_str(&fs::read_to_string(path.join(METADATA_FILE))?)?;
        tracing::info!(step = metadata.step, path = %path.display(), "Loaded checkpoint");
        Ok(LoadedCheckpoint {
            config,
            weights,
            metadata,
        })
    }

    /// Load the newest checkpoint, if any.
    pub fn load_latest(&self) -> Result<Option<LoadedCheckpoint>> {
        let latest = self.checkpoint_dir.join(LATEST_FILE);
        if !latest.exists() {
            return Ok(None);
        }
        let path = self.checkpoint_dir.join(fs::read_to_string(latest)?.trim());
        if path.exists() {
            Self::load_checkpoint(&path).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigogne_core::LoraConfig;
    use vigogne_lora::ParamTensor;

    fn model_state() -> StateDict {
        StateDict::from([
            (
                "base_model.model.layers.0.q_proj.weight".to_string(),
                ParamTensor::zeros(vec![4, 4]),
            ),
            (
                "base_model.model.layers.0.q_proj.lora_A.default.weight".to_string(),
                ParamTensor::new(vec![2, 4], vec![0.5; 8]).unwrap(),
            ),
            (
                "base_model.model.layers.0.q_proj.lora_B.default.weight".to_string(),
                ParamTensor::zeros(vec![4, 2]),
            ),
        ])
    }

    fn manager(dir: &Path) -> CheckpointManager {
        let config = AdapterConfig::from_lora_config(&LoraConfig::default(), None);
        CheckpointManager::new(dir, config, LoraBias::None).unwrap()
    }

    #[test]
    fn test_checkpoint_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = manager(temp_dir.path());

        let metadata = CheckpointMetadata::new(50, 1, 1e-4).with_loss(Some(0.3));
        let path = manager.save_checkpoint(&model_state(), &metadata).unwrap();
        assert!(path.ends_with("step_50"));

        let loaded = CheckpointManager::load_checkpoint(&path).unwrap();
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.weights.len(), 2);
        assert!(loaded
            .weights
            .contains_key("base_model.model.layers.0.q_proj.lora_A.weight"));
    }

    #[test]
    fn test_checkpoint_latest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = manager(temp_dir.path());
        assert!(manager.load_latest().unwrap().is_none());

        for step in [10, 20, 30] {
            let meta = CheckpointMetadata::new(step, 0, 1e-4);
            manager.save_checkpoint(&model_state(), &meta).unwrap();
        }
        let latest = manager.load_latest().unwrap().unwrap();
        assert_eq!(latest.metadata.step, 30);
    }

    #[test]
    fn test_checkpoint_rotation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = manager(temp_dir.path()).with_max_checkpoints(Some(2));

        for step in [10, 20, 30, 40] {
            let meta = CheckpointMetadata::new(step, 0, 1e-4);
            manager.save_checkpoint(&model_state(), &meta).unwrap();
        }
        let steps: Vec<usize> = manager
            .list_checkpoints()
            .unwrap()
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(steps, vec![30, 40]);
    }

    #[test]
    fn test_save_final() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = manager(&temp_dir.path().join("checkpoints"));
        manager.save_final(temp_dir.path(), &model_state()).unwrap();
        assert!(temp_dir.path().join(vigogne_lora::ADAPTER_WEIGHTS_NAME).exists());
        assert!(temp_dir.path().join(vigogne_lora::ADAPTER_CONFIG_NAME).exists());
    }
}
