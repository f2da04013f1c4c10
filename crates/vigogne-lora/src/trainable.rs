//! Trainable parameter accounting.

use std::fmt;

/// Size and trainability of one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    /// Parameter name.
    pub name: String,
    /// Number of elements.
    pub numel: usize,
    /// Whether the optimizer updates it.
    pub trainable: bool,
}

impl ParameterInfo {
    /// Create a parameter description.
    pub fn new(name: impl Into<String>, numel: usize, trainable: bool) -> Self {
        Self {
            name: name.into(),
            numel,
            trainable,
        }
    }
}

/// Trainable versus total parameter counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainableSummary {
    /// Parameters updated by the optimizer.
    pub trainable: usize,
    /// All parameters.
    pub total: usize,
}

impl TrainableSummary {
    /// Sum over a model's parameters.
    pub fn from_parameters<'a>(params: impl IntoIterator<Item = &'a ParameterInfo>) -> Self {
        params.into_iter().fold(Self::default(), |mut acc, p| {
            acc.total += p.numel;
            if p.trainable {
                acc.trainable += p.numel;
            }
            acc
        })
    }

    /// Share of trainable parameters, in percent.
    pub fn trainable_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.trainable as f64 / self.total as f64
        }
    }

    /// Log the summary.
    pub fn log(&self) {
        tracing::info!(
            trainable = self.trainable,
            total = self.total,
            percent = self.trainable_percent(),
            "{self}"
        );
    }
}

impl fmt::Display for TrainableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            self.trainable,
            self.total,
            self.trainable_percent()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let params = vec![
            ParameterInfo::new("embed_tokens.weight", 9_000, false),
            ParameterInfo::new("q_proj.lora_A.weight", 500, true),
            ParameterInfo::new("q_proj.lora_B.weight", 500, true),
        ];
        let summary = TrainableSummary::from_parameters(&params);
        assert_eq!(summary.trainable, 1_000);
        assert_eq!(summary.total, 10_000);
        assert!((summary.trainable_percent() - 10.0).abs() < 1e-12);
        assert_eq!(
            summary.to_string(),
            "trainable params: 1000 || all params: 10000 || trainable%: 10.0000"
        );
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(TrainableSummary::default().trainable_percent(), 0.0);
    }
}
