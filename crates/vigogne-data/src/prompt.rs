//! Instruction prompt templates.
//!
//! A template is plain text with two named slots, `{instruction}` and
//! `{input}`. Literal braces are written `{{` and `}}`. Interpolation is a
//! single pass: substituted values are never scanned again, so an instruction
//! containing `{input}` is copied verbatim.
//!
//! Every template ends with the response header. The response itself is
//! appended by the caller, never substituted.

use crate::RawExample;
use vigogne_core::{Result, TemplateConfig, VigogneError};

/// French prompt used when the example has an input.
pub const FRENCH_PROMPT_INPUT: &str = "Ci-dessous se trouve une instruction qui décrit une tâche, associée à une entrée qui fournit un contexte supplémentaire. Écrivez une réponse qui complète correctement la demande.\n\n### Instruction:\n{instruction}\n\n### Entrée:\n{input}\n\n### Réponse:\n";

/// French prompt used when the example has no input.
pub const FRENCH_PROMPT_NO_INPUT: &str = "Ci-dessous se trouve une instruction qui décrit une tâche. Écrivez une réponse qui complète correctement la demande.\n\n### Instruction:\n{instruction}\n\n### Réponse:\n";

/// English (Alpaca) prompt used when the example has an input.
pub const ENGLISH_PROMPT_INPUT: &str = "Below is an instruction that describes a task, paired with an input that provides further context. Write a response that appropriately completes the request.\n\n### Instruction:\n{instruction}\n\n### Input:\n{input}\n\n### Response:\n";

/// English (Alpaca) prompt used when the example has no input.
pub const ENGLISH_PROMPT_NO_INPUT: &str = "Below is an instruction that describes a task. Write a response that appropriately completes the request.\n\n### Instruction:\n{instruction}\n\n### Response:\n";

const INSTRUCTION_SLOT: &str = "instruction";
const INPUT_SLOT: &str = "input";

/// A validated pair of prompt templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    prompt_input: String,
    prompt_no_input: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::french()
    }
}

impl PromptTemplate {
    /// The French Vigogne prompts.
    pub fn french() -> Self {
        Self {
            prompt_input: FRENCH_PROMPT_INPUT.to_string(),
            prompt_no_input: FRENCH_PROMPT_NO_INPUT.to_string(),
        }
    }

    /// The English Alpaca prompts.
    pub fn english() -> Self {
        Self {
            prompt_input: ENGLISH_PROMPT_INPUT.to_string(),
            prompt_no_input: ENGLISH_PROMPT_NO_INPUT.to_string(),
        }
    }

    /// Build a template pair from user-supplied text.
    ///
    /// Both templates must contain `{instruction}`; the with-input template
    /// must also contain `{input}`. Unknown slots and unbalanced braces are
    /// rejected.
    pub fn custom(prompt_input: impl Into<String>, prompt_no_input: impl Into<String>) -> Result<Self> {
        let prompt_input = prompt_input.into();
        let prompt_no_input = prompt_no_input.into();

        let slots = validate(&prompt_input, "prompt_input")?;
        if !slots.iter().any(|s| s == INPUT_SLOT) {
            return Err(VigogneError::Config(
                "prompt_input template must contain an {input} slot".into(),
            ));
        }
        validate(&prompt_no_input, "prompt_no_input")?;

        Ok(Self {
            prompt_input,
            prompt_no_input,
        })
    }

    /// Build the template selected in the data configuration.
    pub fn from_config(config: &TemplateConfig) -> Result<Self> {
        match config {
            TemplateConfig::French => Ok(Self::french()),
            TemplateConfig::English => Ok(Self::english()),
            TemplateConfig::Custom {
                prompt_input,
                prompt_no_input,
            } => Self::custom(prompt_input.clone(), prompt_no_input.clone()),
        }
    }

    /// Render the prompt for an example.
    ///
    /// Examples with a non-empty input use the with-input template.
    pub fn format(&self, example: &RawExample) -> String {
        if example.has_input() {
            render(&self.prompt_input, example)
        } else {
            render(&self.prompt_no_input, example)
        }
    }

    /// Raw with-input template text.
    pub fn prompt_input(&self) -> &str {
        &self.prompt_input
    }

    /// Raw no-input template text.
    pub fn prompt_no_input(&self) -> &str {
        &self.prompt_no_input
    }
}

fn is_brace(c: char) -> bool {
    c == '{' || c == '}'
}

/// Check brace balance and slot names; returns the slots in order.
fn validate(template: &str, name: &str) -> Result<Vec<String>> {
    let malformed = |msg: String| VigogneError::Config(format!("Malformed {name} template: {msg}"));

    let mut slots = Vec::new();
    let mut rest = template;
    while let Some(pos) = rest.find(is_brace) {
        let tail = &rest[pos..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            return Err(malformed(format!("unmatched '}}' at byte {}", template.len() - tail.len())));
        }

        let body = &tail[1..];
        match body.find(is_brace) {
            Some(end) if body.as_bytes()[end] == b'}' => {
                let slot = &body[..end];
                if slot != INSTRUCTION_SLOT && slot != INPUT_SLOT {
                    return Err(malformed(format!("unknown slot {{{slot}}}")));
                }
                slots.push(slot.to_string());
                rest = &body[end + 1..];
            }
            _ => {
                return Err(malformed(format!(
                    "unclosed '{{' at byte {}",
                    template.len() - tail.len()
                )))
            }
        }
    }

    if !slots.iter().any(|s| s == INSTRUCTION_SLOT) {
        return Err(malformed("missing {instruction} slot".into()));
    }
    Ok(slots)
}

fn render(template: &str, example: &RawExample) -> String {
    let mut out =
        String::with_capacity(template.len() + example.instruction.len() + example.input.len());
    let mut rest = template;
    while let Some(pos) = rest.find(is_brace) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{instruction}") {
            out.push_str(&example.instruction);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{input}") {
            out.push_str(&example.input);
            rest = after;
        } else {
            // Templates are validated on construction; keep stray braces as text.
            out.push_str(&tail[..1]);
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
