//! Chat model invocation
//!
//! [`ModelInvoker`] reads a prompt from each record and writes the model's
//! reply back. Requests go through a [`ChatBackend`]; [`OpenAiBackend`] talks
//! to any OpenAI-compatible chat completions endpoint and [`MockBackend`]
//! answers from a fixed table.

use jsonflow_core::path::to_text;
use jsonflow_core::{Data, FlowConfig, FlowError, Operator, Record, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Tracing target for model calls.
pub const TRACING_TARGET: &str = "jsonflow_ops::model";

/// Endpoint used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Build a message.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Model name
    pub model: String,
    /// Conversation so far
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature
    pub temperature: f64,
    /// Completion length limit
    pub max_tokens: Option<u32>,
    /// Extra request parameters passed through verbatim
    pub params: Map<String, Value>,
}

impl ChatRequest {
    /// Request body in the chat completions wire format.
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), Value::String(self.model.clone()));
        body.insert("messages".into(), json!(self.messages));
        body.insert("temperature".into(), json!(self.temperature));
        if let Some(max_tokens) = self.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        for (key, value) in &self.params {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }

    /// Text of the last user message.
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map_or("", |m| m.content.as_str())
    }
}

/// Something that can answer chat requests.
pub trait ChatBackend: Send + Sync {
    /// Return the assistant reply for `request`.
    fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// OpenAI-compatible HTTP backend.
///
/// The HTTP client is created on first use, once per process.
pub struct OpenAiBackend {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Backend with an explicit key.
    pub fn new(api_key: impl Into<String>, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            timeout,
            client: OnceLock::new(),
        }
    }

    /// Backend configured from `config`; the key is read from the configured
    /// environment variable unless given explicitly.
    pub fn from_config(
        config: &FlowConfig,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => std::env::var(&config.model_api_key_env).map_err(|_| {
                FlowError::Config(format!(
                    "model API key not set: export {} or pass an explicit key",
                    config.model_api_key_env
                ))
            })?,
        };
        Ok(Self::new(
            api_key,
            base_url.or_else(|| config.model_base_url.clone()),
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    /// Chat completions endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        tracing::debug!(
            target: TRACING_TARGET,
            timeout_secs = self.timeout.as_secs(),
            "Creating model HTTP client"
        );
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| FlowError::Config(format!("failed to create HTTP client: {}", err)))?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl ChatBackend for OpenAiBackend {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let fail = |message: String| FlowError::operator("ModelInvoker", message);
        let response = self
            .client()?
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request.to_body())
            .send()
            .map_err(|err| fail(format!("request to {} failed: {}", self.base_url, err)))?;
        let status = response.status();
        let body: Value = response
            .json()
            .map_err(|err| fail(format!("invalid response body: {}", err)))?;
        if !status.is_success() {
            let detail = body
                .pointer("/error/message")
                .map(to_text)
                .unwrap_or_else(|| body.to_string());
            return Err(fail(format!("model API returned {}: {}", status, detail)));
        }
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| fail("response has no choices[0].message.content".to_string()))
    }
}

/// Offline backend answering from a prompt -> reply table.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    responses: HashMap<String, String>,
    fallback: Option<String>,
}

impl MockBackend {
    /// Backend answering `responses[prompt]`.
    pub fn new(responses: HashMap<String, String>) -> Self {
        Self {
            responses,
            fallback: None,
        }
    }

    /// Reply used for prompts missing from the table.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }
}

impl ChatBackend for MockBackend {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let prompt = request.prompt();
        self.responses
            .get(prompt)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                FlowError::operator("ModelInvoker", format!("no mock response for prompt '{}'", prompt))
            })
    }
}

fn default_prompt_field() -> String {
    "prompt".to_string()
}

fn default_response_field() -> String {
    "response".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

/// Model invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Model name; falls back to the configured default model
    #[serde(default)]
    pub model: Option<String>,
    /// Field holding the prompt
    #[serde(default = "default_prompt_field")]
    pub prompt_field: String,
    /// Field receiving the reply
    #[serde(default = "default_response_field")]
    pub response_field: String,
    /// Optional system message
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Completion length limit
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Extra request parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            model: None,
            prompt_field: default_prompt_field(),
            response_field: default_response_field(),
            system_prompt: None,
            temperature: default_temperature(),
            max_tokens: None,
            params: Map::new(),
        }
    }
}

/// Sends each record's prompt to a chat model.
///
/// Records without the prompt field pass through unchanged.
#[derive(Clone)]
pub struct ModelInvoker {
    backend: Arc<dyn ChatBackend>,
    model: String,
    opts: ModelOptions,
}

impl fmt::Debug for ModelInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInvoker")
            .field("model", &self.model)
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl ModelInvoker {
    /// Invoker using `backend`.
    pub fn new(backend: Arc<dyn ChatBackend>, opts: ModelOptions, config: &FlowConfig) -> Self {
        let model = opts
            .model
            .clone()
            .unwrap_or_else(|| config.default_model.clone());
        Self {
            backend,
            model,
            opts,
        }
    }

    /// Invoker talking to an OpenAI-compatible endpoint.
    pub fn openai(
        opts: ModelOptions,
        config: &FlowConfig,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let backend = OpenAiBackend::from_config(config, api_key, base_url)?;
        Ok(Self::new(Arc::new(backend), opts, config))
    }

    /// Model requests are sent to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the request for `prompt`.
    pub fn request(&self, prompt: String) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.opts.system_prompt {
            messages.push(ChatMessage::new("system", system.clone()));
        }
        messages.push(ChatMessage::new("user", prompt));
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.opts.temperature,
            max_tokens: self.opts.max_tokens,
            params: self.opts.params.clone(),
        }
    }
}

impl Operator for ModelInvoker {
    fn name(&self) -> &str {
        "ModelInvoker"
    }

    fn description(&self) -> String {
        format!("Invokes {} model", self.model)
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        let Some(prompt) = record.get(&self.opts.prompt_field).map(to_text) else {
            return Ok(Data::Record(record));
        };
        tracing::debug!(
            target: TRACING_TARGET,
            model = %self.model,
            prompt_chars = prompt.chars().count(),
            "Invoking model"
        );
        let reply = self.backend.complete(&self.request(prompt))?;
        record.insert(self.opts.response_field.clone(), Value::String(reply));
        Ok(Data::Record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonflow_core::record;

    fn mock() -> Arc<dyn ChatBackend> {
        let mut responses = HashMap::new();
        responses.insert("2+2?".to_string(), "4".to_string());
        Arc::new(MockBackend::new(responses))
    }

    #[test]
    fn writes_reply_to_response_field() {
        let op = ModelInvoker::new(mock(), ModelOptions::default(), &FlowConfig::default());
        let out = op.process_item(record(json!({"prompt": "2+2?"}))).unwrap();
        assert_eq!(out, Data::Record(record(json!({"prompt": "2+2?", "response": "4"}))));
        assert_eq!(op.model(), jsonflow_core::config::DEFAULT_MODEL);
    }

    #[test]
    fn records_without_prompt_pass_through() {
        let op = ModelInvoker::new(mock(), ModelOptions::default(), &FlowConfig::default());
        let input = record(json!({"text": "hi"}));
        assert_eq!(op.process_item(input.clone()).unwrap(), Data::Record(input));
    }

    #[test]
    fn unknown_prompt_fails_without_fallback() {
        let op = ModelInvoker::new(mock(), ModelOptions::default(), &FlowConfig::default());
        assert!(op.process_item(record(json!({"prompt": "?"}))).is_err());
        let fallback = Arc::new(MockBackend::default().with_fallback("n/a"));
        let op = ModelInvoker::new(fallback, ModelOptions::default(), &FlowConfig::default());
        let out = op.process_item(record(json!({"prompt": "?"}))).unwrap();
        assert_eq!(out.as_record().unwrap()["response"], "n/a");
    }

    #[test]
    fn request_body_carries_options() {
        let mut params = Map::new();
        params.insert("top_p".into(), json!(0.9));
        let opts = ModelOptions {
            model: Some("local-model".into()),
            system_prompt: Some("be brief".into()),
            max_tokens: Some(64),
            params,
            ..ModelOptions::default()
        };
        let op = ModelInvoker::new(mock(), opts, &FlowConfig::default());
        let body = op.request("hello".into()).to_body();
        assert_eq!(body["model"], "local-model");
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["top_p"], 0.9);
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = FlowConfig {
            model_api_key_env: "JSONFLOW_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..FlowConfig::default()
        };
        let err = OpenAiBackend::from_config(&config, None, None).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
        let backend = OpenAiBackend::from_config(&config, Some("k".into()), Some("http://localhost:9/v1/".into())).unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:9/v1/chat/completions");
    }
}
