//! Adapter-only checkpoints.
//!
//! A checkpoint is a directory with `adapter_model.safetensors` holding the
//! LoRA weights and `adapter_config.json` describing how they attach to the
//! base model. Names follow the PEFT convention
//! (`base_model.model.<module>.lora_A.weight`) so the adapter loads with
//! `peft.PeftModel.from_pretrained()`.

use crate::{LoraError, ParamTensor, StateDict};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use vigogne_core::{LoraBias, LoraConfig};

/// Adapter weights file name.
pub const ADAPTER_WEIGHTS_NAME: &str = "adapter_model.safetensors";

/// Adapter configuration file name.
pub const ADAPTER_CONFIG_NAME: &str = "adapter_config.json";

/// Contents of `adapter_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdapterConfig {
    /// Always `"LORA"`.
    pub peft_type: String,
    /// Always `"CAUSAL_LM"`.
    pub task_type: String,
    /// LoRA rank.
    pub r: usize,
    /// LoRA alpha.
    pub lora_alpha: f32,
    /// LoRA dropout.
    pub lora_dropout: f32,
    /// Targeted module names.
    pub target_modules: Vec<String>,
    /// Bias mode (`none`, `all`, `lora_only`).
    pub bias: String,
    /// Base model the adapter was trained on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_model_name_or_path: Option<String>,
    /// Whether the adapter is frozen for inference.
    #[serde(default)]
    pub inference_mode: bool,
    /// Whether base weights are stored transposed.
    #[serde(default)]
    pub fan_in_fan_out: bool,
}

impl AdapterConfig {
    /// Describe an adapter trained with `config` on top of `base_model`.
    pub fn from_lora_config(config: &LoraConfig, base_model: Option<&str>) -> Self {
        Self {
            peft_type: "LORA".to_string(),
            task_type: "CAUSAL_LM".to_string(),
            r: config.r,
            lora_alpha: config.alpha,
            lora_dropout: config.dropout,
            target_modules: config.target_modules.clone(),
            bias: config.bias.as_str().to_string(),
            base_model_name_or_path: base_model.map(String::from),
            inference_mode: true,
            fan_in_fan_out: false,
        }
    }
}

/// Strip the adapter name PEFT inserts into live parameter names
/// (`lora_A.default.weight` becomes `lora_A.weight`).
fn checkpoint_name(name: &str) -> String {
    name.replace(".default.", ".")
}

/// Select the parameters that belong in an adapter-only checkpoint.
///
/// - `None`: LoRA matrices only.
/// - `All`: LoRA matrices and every bias.
/// - `LoraOnly`: LoRA matrices and the biases of adapted modules.
pub fn extract_adapter_state(state: &StateDict, bias: LoraBias) -> StateDict {
    let is_lora = |name: &str| name.contains("lora_");
    let mut adapter = StateDict::new();

    for (name, tensor) in state {
        let keep = match bias {
            LoraBias::None | LoraBias::LoraOnly => is_lora(name),
            LoraBias::All => is_lora(name) || name.contains("bias"),
        };
        if keep {
            adapter.insert(checkpoint_name(name), tensor.clone());
        }
    }

    if bias == LoraBias::LoraOnly {
        for name in state.keys().filter(|n| is_lora(n)) {
            if let Some((module, _)) = name.split_once("lora_") {
                let bias_name = format!("{module}bias");
                if let Some(tensor) = state.get(&bias_name) {
                    adapter.insert(bias_name, tensor.clone());
                }
            }
        }
    }

    adapter
}

/// Write `adapter_model.safetensors` and `adapter_config.json` into `dir`.
pub fn save_adapter(dir: &Path, state: &StateDict, config: &AdapterConfig) -> Result<(), LoraError> {
    std::fs::create_dir_all(dir)?;

    let views = state
        .iter()
        .map(|(name, tensor)| {
            let view = TensorView::new(
                Dtype::F32,
                tensor.shape().to_vec(),
                bytemuck::cast_slice(tensor.data()),
            )?;
            Ok((name.as_str(), view))
        })
        .collect::<Result<Vec<_>, LoraError>>()?;

    let metadata = HashMap::from([("format".to_string(), "pt".to_string())]);
    safetensors::serialize_to_file(views, &Some(metadata), &dir.join(ADAPTER_WEIGHTS_NAME))?;
    std::fs::write(dir.join(ADAPTER_CONFIG_NAME), serde_json::to_string_pretty(config)?)?;

    tracing::info!(
        path = %dir.display(),
        num_tensors = state.len(),
        "Saved adapter"
    );
    Ok(())
}

/// Read an adapter checkpoint written by [`save_adapter`].
pub fn load_adapter(dir: &Path) -> Result<(AdapterConfig, StateDict), LoraError> {
    let config: AdapterConfig =
        serde_json::from_str(&std::fs::read_to_string(dir.join(ADAPTER_CONFIG_NAME))?)?;

    let bytes = std::fs::read(dir.join(ADAPTER_WEIGHTS_NAME))?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let mut state = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(LoraError::InvalidState(format!(
                "Tensor '{name}' has dtype {:?}, expected F32",
                view.dtype()
            )));
        }
        // The buffer is not guaranteed to be 4-byte aligned.
        let data = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        state.insert(name, ParamTensor::new(view.shape().to_vec(), data)?);
    }
    Ok((config, state))
}
