//! The YAML run configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use vigogne_core::{DataConfig, LoraConfig, ModelConfig, TemplateConfig, TrainingConfig};

/// Combined configuration for a fine-tuning run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullTrainingConfig {
    /// Base model.
    #[serde(default)]
    pub model: ModelConfig,

    /// LoRA configuration.
    #[serde(default)]
    pub lora: LoraConfig,

    /// Dataset and preprocessing.
    #[serde(default)]
    pub data: DataConfig,

    /// Training hyperparameters.
    #[serde(default)]
    pub training: TrainingConfig,
}

impl FullTrainingConfig {
    /// Read a YAML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Check every section.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.model_name_or_path.is_empty() {
            anyhow::bail!("Model is required. Use --model or set model.model_name_or_path.");
        }
        self.lora.validate()?;
        self.data.validate()?;
        self.training.validate()?;
        Ok(())
    }

    /// Configuration written by `vigogne init`.
    pub fn sample() -> Self {
        Self {
            model: ModelConfig {
                model_name_or_path: "decapoda-research/llama-7b-hf".to_string(),
                ..Default::default()
            },
            lora: LoraConfig::default(),
            data: DataConfig {
                train_file: Some("data/vigogne_data_cleaned.json".to_string()),
                eval_file: None,
                template: TemplateConfig::French,
                ..Default::default()
            },
            training: TrainingConfig {
                learning_rate: 3e-4,
                batch_size: 8,
                gradient_accumulation_steps: 16,
                num_epochs: 3,
                warmup_steps: 100,
                output_dir: "outputs/llama-7b-ft-vigogne-lora".to_string(),
                logging_steps: 10,
                eval_steps: Some(200),
                save_steps: Some(200),
                save_total_limit: Some(3),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigogne.yaml");
        std::fs::write(&path, serde_yaml::to_string(&FullTrainingConfig::sample()).unwrap())
            .unwrap();

        let config = FullTrainingConfig::load(&path).unwrap();
        assert!(config.model.is_llama());
        assert_eq!(config.lora.r, 8);
        assert_eq!(config.lora.target_modules, vec!["q_proj", "v_proj"]);
        assert_eq!(config.training.pad_to_multiple_of(), Some(8));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "model:\n  model_name_or_path: bigscience/bloom-7b1\ndata:\n  train_file: train.jsonl\n";
        let config: FullTrainingConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.data.model_max_length, None);
        assert_eq!(config.data.model_max_length_percentile, 95.0);
        assert!(config.data.use_cache);
        assert!(!config.model.is_llama());
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_model_rejected() {
        let config = FullTrainingConfig {
            data: DataConfig {
                train_file: Some("train.jsonl".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
