use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Generation options recognized by the loop. Sampling parameters pass
/// through to the model unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Cap on generated output tokens per completion.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Whether echoed input tokens are retained in the decoded output.
    #[serde(default)]
    pub include_input: bool,
    /// Number of independent completions to sample.
    #[serde(default = "default_n")]
    pub n: usize,
    /// Text markers that terminate generation early; output is truncated to
    /// just before the first matched marker.
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Wall-clock budget for one run; exceeded budgets surface as
    /// `ChatError::GenerationTimeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

fn default_max_length() -> usize {
    2048
}

fn default_n() -> usize {
    1
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            max_length: default_max_length(),
            include_input: false,
            n: default_n(),
            stop_sequences: Vec::new(),
            temperature: None,
            top_p: None,
            timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GenerationConfig::default();
        assert_eq!(config.max_length, 2048);
        assert_eq!(config.n, 1);
        assert!(!config.include_input);
        assert!(config.stop_sequences.is_empty());
    }

    #[test]
    fn test_deserializes_with_missing_fields() {
        let config: GenerationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_length, 2048);
        assert!(config.temperature.is_none());
    }
}
