//! Runtime configuration shared by pipelines and operators

use serde::{Deserialize, Serialize};

/// Default truncation applied to operator I/O log lines.
pub const DEFAULT_IO_LOG_TRUNCATE: usize = 1000;

/// Default chat model used by model operators.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Environment variable consulted for the model API key.
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Explicit configuration passed to components at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Log every operator's input and output at debug level
    pub io_logging: bool,
    /// Maximum characters of a logged value (0 disables truncation)
    pub io_log_truncate: usize,
    /// Model used when an operator does not name one
    pub default_model: String,
    /// Base URL of an OpenAI-compatible endpoint
    pub model_base_url: Option<String>,
    /// Environment variable holding the model API key
    pub model_api_key_env: String,
    /// Timeout for a single model request
    pub request_timeout_secs: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            io_logging: false,
            io_log_truncate: DEFAULT_IO_LOG_TRUNCATE,
            default_model: DEFAULT_MODEL.to_string(),
            model_base_url: None,
            model_api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl FlowConfig {
    /// Truncate `text` to the configured log length on a char boundary.
    pub fn truncate_for_log(&self, text: &str) -> String {
        if self.io_log_truncate == 0 || text.chars().count() <= self.io_log_truncate {
            return text.to_string();
        }
        let mut out: String = text.chars().take(self.io_log_truncate).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let config = FlowConfig {
            io_log_truncate: 2,
            ..FlowConfig::default()
        };
        assert_eq!(config.truncate_for_log("日本語"), "日本...");
        assert_eq!(config.truncate_for_log("ab"), "ab");
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: FlowConfig = serde_json::from_str(r#"{"io_logging": true}"#).unwrap();
        assert!(config.io_logging);
        assert_eq!(config.default_model, DEFAULT_MODEL);
    }
}
