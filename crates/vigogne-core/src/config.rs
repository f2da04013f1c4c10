//! Configuration types for Vigogne.

use crate::{DeviceMap, Dtype, Quantization, Result, VigogneError, FP16_PAD_MULTIPLE};
use serde::{Deserialize, Serialize};

/// Base model loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier (HuggingFace repo ID or local path).
    #[serde(default)]
    pub model_name_or_path: String,

    /// Data type for the non-quantized weights.
    #[serde(default)]
    pub dtype: Dtype,

    /// Reduced-precision scheme for the frozen base weights.
    #[serde(default)]
    pub quantization: Quantization,

    /// Device placement.
    #[serde(default)]
    pub device_map: DeviceMap,

    /// Revision/branch to use.
    #[serde(default)]
    pub revision: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name_or_path: String::new(),
            dtype: Dtype::default(),
            quantization: Quantization::default(),
            device_map: DeviceMap::default(),
            revision: None,
        }
    }
}

impl ModelConfig {
    /// Whether the base model belongs to the llama family.
    ///
    /// Llama tokenizers ship without a pad token and need their special
    /// tokens registered explicitly.
    #[must_use]
    pub fn is_llama(&self) -> bool {
        self.model_name_or_path.to_lowercase().contains("llama")
    }
}

/// Bias handling mode for LoRA layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoraBias {
    /// Do not train any bias parameters.
    #[default]
    None,
    /// Train all bias parameters.
    All,
    /// Train only bias parameters of LoRA-patched modules.
    LoraOnly,
}

impl LoraBias {
    /// Name used in `adapter_config.json`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::All => "all",
            Self::LoraOnly => "lora_only",
        }
    }
}

/// LoRA configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraConfig {
    /// LoRA rank (r).
    #[serde(default = "default_lora_r")]
    pub r: usize,

    /// LoRA alpha (scaling numerator).
    #[serde(default = "default_lora_alpha")]
    pub alpha: f32,

    /// Dropout probability on the adapter input.
    #[serde(default = "default_lora_dropout")]
    pub dropout: f32,

    /// Names of the modules to apply LoRA to.
    #[serde(default = "default_target_modules")]
    pub target_modules: Vec<String>,

    /// Bias handling mode.
    #[serde(default)]
    pub bias: LoraBias,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            r: default_lora_r(),
            alpha: default_lora_alpha(),
            dropout: default_lora_dropout(),
            target_modules: default_target_modules(),
            bias: LoraBias::default(),
        }
    }
}

impl LoraConfig {
    /// Compute the LoRA scaling factor (`alpha / r`).
    #[must_use]
    pub fn scaling(&self) -> f32 {
        self.alpha / self.r as f32
    }

    /// Validate hyperparameters.
    pub fn validate(&self) -> Result<()> {
        if self.r == 0 {
            return Err(VigogneError::Config("LoRA rank must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(VigogneError::Config(format!(
                "LoRA dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.target_modules.is_empty() {
            return Err(VigogneError::Config(
                "At least one LoRA target module is required".into(),
            ));
        }
        Ok(())
    }
}

/// Prompt template selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateConfig {
    /// French instruction prompts.
    #[default]
    French,
    /// English (Alpaca) instruction prompts.
    English,
    /// User-supplied templates with `{instruction}` / `{input}` slots.
    Custom {
        /// Template used when the example has a non-empty input.
        prompt_input: String,
        /// Template used when the example has no input.
        prompt_no_input: String,
    },
}

/// Data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Path to the training file.
    #[serde(default)]
    pub train_file: Option<String>,

    /// Path to the evaluation file.
    #[serde(default)]
    pub eval_file: Option<String>,

    /// Maximum sequence length. Sequences are right-truncated to it.
    ///
    /// When absent it is derived from the training corpus using
    /// `model_max_length_percentile`.
    #[serde(default)]
    pub model_max_length: Option<usize>,

    /// Percentile of the example lengths used to derive `model_max_length`.
    #[serde(default = "default_percentile")]
    pub model_max_length_percentile: f64,

    /// Number of worker threads used for preprocessing.
    #[serde(default)]
    pub preprocessing_num_workers: Option<usize>,

    /// Prompt template.
    #[serde(default)]
    pub template: TemplateConfig,

    /// Reuse preprocessed datasets cached in the output directory.
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_file: None,
            eval_file: None,
            model_max_length: None,
            model_max_length_percentile: default_percentile(),
            preprocessing_num_workers: None,
            template: TemplateConfig::default(),
            use_cache: true,
        }
    }
}

impl DataConfig {
    /// Validate the data configuration.
    pub fn validate(&self) -> Result<()> {
        if self.train_file.as_deref().map_or(true, str::is_empty) {
            return Err(VigogneError::Config(
                "You have not specified any train file".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.model_max_length_percentile) {
            return Err(VigogneError::Config(format!(
                "model_max_length_percentile must be in [0, 100], got {}",
                self.model_max_length_percentile
            )));
        }
        if self.model_max_length == Some(0) {
            return Err(VigogneError::Config("model_max_length must be > 0".into()));
        }
        if self.preprocessing_num_workers == Some(0) {
            return Err(VigogneError::Config(
                "preprocessing_num_workers must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Learning rate.
    #[serde(default = "default_lr")]
    pub learning_rate: f64,

    /// Batch size per device.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Evaluation batch size per device.
    #[serde(default = "default_batch_size")]
    pub eval_batch_size: usize,

    /// Gradient accumulation steps.
    #[serde(default = "default_one")]
    pub gradient_accumulation_steps: usize,

    /// Number of training epochs.
    #[serde(default = "default_epochs")]
    pub num_epochs: usize,

    /// Maximum optimizer steps (overrides epochs if set).
    #[serde(default)]
    pub max_steps: Option<usize>,

    /// Warmup steps.
    #[serde(default = "default_warmup")]
    pub warmup_steps: usize,

    /// Warmup ratio (alternative to warmup_steps).
    #[serde(default)]
    pub warmup_ratio: Option<f64>,

    /// Weight decay.
    #[serde(default)]
    pub weight_decay: f64,

    /// Maximum gradient norm for clipping.
    #[serde(default = "default_grad_clip")]
    pub max_grad_norm: f64,

    /// Learning rate scheduler type.
    #[serde(default)]
    pub lr_scheduler: LrSchedulerType,

    /// Optimizer type.
    #[serde(default)]
    pub optimizer: OptimizerType,

    /// Random seed.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Log every N optimizer steps.
    #[serde(default = "default_logging_steps")]
    pub logging_steps: usize,

    /// Evaluate every N optimizer steps.
    #[serde(default)]
    pub eval_steps: Option<usize>,

    /// Save an adapter checkpoint every N optimizer steps.
    #[serde(default)]
    pub save_steps: Option<usize>,

    /// Maximum number of checkpoints kept on disk.
    #[serde(default)]
    pub save_total_limit: Option<usize>,

    /// Output directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Use fp16 mixed precision. Also aligns padded batch widths.
    #[serde(default = "default_true")]
    pub fp16: bool,

    /// Shuffle training examples every epoch.
    #[serde(default = "default_true")]
    pub shuffle: bool,

    /// Drop the last incomplete batch.
    #[serde(default)]
    pub drop_last: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_lr(),
            batch_size: default_batch_size(),
            eval_batch_size: default_batch_size(),
            gradient_accumulation_steps: default_one(),
            num_epochs: default_epochs(),
            max_steps: None,
            warmup_steps: default_warmup(),
            warmup_ratio: None,
            weight_decay: 0.0,
            max_grad_norm: default_grad_clip(),
            lr_scheduler: LrSchedulerType::default(),
            optimizer: OptimizerType::default(),
            seed: default_seed(),
            logging_steps: default_logging_steps(),
            eval_steps: None,
            save_steps: None,
            save_total_limit: None,
            output_dir: default_output_dir(),
            fp16: true,
            shuffle: true,
            drop_last: false,
        }
    }
}

impl TrainingConfig {
    /// Padding alignment for collated batches.
    #[must_use]
    pub fn pad_to_multiple_of(&self) -> Option<usize> {
        self.fp16.then_some(FP16_PAD_MULTIPLE)
    }

    /// Validate the training configuration.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.eval_batch_size == 0 {
            return Err(VigogneError::Config("batch size must be > 0".into()));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(VigogneError::Config(
                "gradient_accumulation_steps must be > 0".into(),
            ));
        }
        if self.logging_steps == 0 {
            return Err(VigogneError::Config("logging_steps must be > 0".into()));
        }
        if let Some(ratio) = self.warmup_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(VigogneError::Config(format!(
                    "warmup_ratio must be in [0, 1], got {ratio}"
                )));
            }
        }
        Ok(())
    }
}

/// Learning rate scheduler type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LrSchedulerType {
    /// Constant learning rate.
    Constant,
    /// Linear decay.
    #[default]
    Linear,
    /// Cosine annealing.
    Cosine,
    /// Cosine with restarts.
    CosineWithRestarts,
    /// Polynomial decay.
    Polynomial,
}

/// Optimizer requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerType {
    /// AdamW.
    #[default]
    AdamW,
    /// 8-bit AdamW.
    AdamW8bit,
    /// SGD with momentum.
    Sgd,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_lora_r() -> usize {
    8
}
fn default_lora_alpha() -> f32 {
    16.0
}
fn default_lora_dropout() -> f32 {
    0.05
}
fn default_target_modules() -> Vec<String> {
    vec!["q_proj".into(), "v_proj".into()]
}
fn default_percentile() -> f64 {
    95.0
}
fn default_lr() -> f64 {
    3e-4
}
fn default_batch_size() -> usize {
    8
}
fn default_one() -> usize {
    1
}
fn default_epochs() -> usize {
    3
}
fn default_warmup() -> usize {
    100
}
fn default_grad_clip() -> f64 {
    1.0
}
fn default_seed() -> u64 {
    42
}
fn default_logging_steps() -> usize {
    10
}
fn default_output_dir() -> String {
    "./output".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lora_defaults() {
        let config = LoraConfig::default();
        assert_eq!(config.r, 8);
        assert_eq!(config.target_modules, vec!["q_proj", "v_proj"]);
        assert!((config.scaling() - 2.0).abs() < 1e-6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lora_invalid_dropout() {
        let config = LoraConfig {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_data_config_requires_train_file() {
        let config = DataConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, VigogneError::Config(_)));

        let config = DataConfig {
            train_file: Some("data.jsonl".into()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_data_config_percentile_range() {
        let config = DataConfig {
            train_file: Some("data.jsonl".into()),
            model_max_length_percentile: 101.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pad_to_multiple_follows_fp16() {
        let mut config = TrainingConfig::default();
        assert_eq!(config.pad_to_multiple_of(), Some(8));
        config.fp16 = false;
        assert_eq!(config.pad_to_multiple_of(), None);
    }

    #[test]
    fn test_template_config_yaml() {
        let yaml = "kind: custom\nprompt_input: \"{instruction} {input}\"\nprompt_no_input: \"{instruction}\"\n";
        let template: TemplateConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(template, TemplateConfig::Custom { .. }));

        let template: TemplateConfig = serde_yaml::from_str("kind: english").unwrap();
        assert_eq!(template, TemplateConfig::English);
    }

    #[test]
    fn test_is_llama() {
        let config = ModelConfig {
            model_name_or_path: "decapoda-research/llama-7b-hf".into(),
            ..Default::default()
        };
        assert!(config.is_llama());
        assert!(!ModelConfig::default().is_llama());
    }
}
