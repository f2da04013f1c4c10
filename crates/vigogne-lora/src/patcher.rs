//! Selection of the linear modules that receive LoRA adapters.

use vigogne_core::{LoraConfig, Result, VigogneError};

/// A linear layer of the base model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearModule {
    /// Fully qualified module name, e.g. `model.layers.0.self_attn.q_proj`.
    pub name: String,
    /// Input features.
    pub in_features: usize,
    /// Output features.
    pub out_features: usize,
}

impl LinearModule {
    /// Create a module description.
    pub fn new(name: impl Into<String>, in_features: usize, out_features: usize) -> Self {
        Self {
            name: name.into(),
            in_features,
            out_features,
        }
    }
}

/// Adapter to inject into one module.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraModuleSpec {
    /// Module name.
    pub name: String,
    /// Shape of the down projection `lora_A`, `[r, in_features]`.
    pub a_shape: [usize; 2],
    /// Shape of the up projection `lora_B`, `[out_features, r]`.
    pub b_shape: [usize; 2],
    /// Output scaling (`alpha / r`).
    pub scaling: f32,
    /// Dropout applied to the adapter input.
    pub dropout: f32,
}

impl LoraModuleSpec {
    /// Trainable parameters added by this adapter.
    pub fn num_parameters(&self) -> usize {
        self.a_shape[0] * self.a_shape[1] + self.b_shape[0] * self.b_shape[1]
    }
}

/// Decides which modules get LoRA layers.
#[derive(Debug, Clone)]
pub struct ModelPatcher {
    config: LoraConfig,
}

impl ModelPatcher {
    /// Create a new model patcher.
    pub fn new(config: LoraConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The LoRA configuration.
    pub fn config(&self) -> &LoraConfig {
        &self.config
    }

    /// Get target module names based on configuration.
    pub fn target_modules(&self) -> &[String] {
        &self.config.target_modules
    }

    /// Check if a module name should be patched.
    ///
    /// A target matches the full name or its last dotted components, so
    /// `q_proj` matches `model.layers.0.self_attn.q_proj` but not `qq_proj`.
    pub fn should_patch(&self, name: &str) -> bool {
        self.config.target_modules.iter().any(|target| {
            name == target
                || name
                    .strip_suffix(target.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Adapters for every matching module, in input order.
    ///
    /// Fails when no module matches any target.
    pub fn plan(&self, modules: &[LinearModule]) -> Result<Vec<LoraModuleSpec>> {
        let r = self.config.r;
        let specs: Vec<LoraModuleSpec> = modules
            .iter()
            .filter(|m| self.should_patch(&m.name))
            .map(|m| LoraModuleSpec {
                name: m.name.clone(),
                a_shape: [r, m.in_features],
                b_shape: [m.out_features, r],
                scaling: self.config.scaling(),
                dropout: self.config.dropout,
            })
            .collect();

        if specs.is_empty() {
            return Err(VigogneError::Config(format!(
                "Target modules {:?} not found in the base model",
                self.config.target_modules
            )));
        }
        tracing::debug!(num_modules = specs.len(), "Planned LoRA adapters");
        Ok(specs)
    }
}
