use std::env;
use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::tools::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Openai,
    Anthropic,
    Gemini,
    Groq,
    Mistral,
    Deepseek,
    Fireworks,
    Together,
    Openrouter,
    Ollama,
}

impl Provider {
    pub const ALL: [Provider; 10] = [
        Self::Openai,
        Self::Anthropic,
        Self::Gemini,
        Self::Groq,
        Self::Mistral,
        Self::Deepseek,
        Self::Fireworks,
        Self::Together,
        Self::Openrouter,
        Self::Ollama,
    ];

    /// Routing prefix used in `provider/model` names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::Mistral => "mistral",
            Self::Deepseek => "deepseek",
            Self::Fireworks => "fireworks_ai",
            Self::Together => "together_ai",
            Self::Openrouter => "openrouter",
            Self::Ollama => "ollama",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == prefix)
    }

    /// OpenAI-compatible base URL, without a trailing slash.
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Openai => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::Deepseek => "https://api.deepseek.com/v1",
            Self::Fireworks => "https://api.fireworks.ai/inference/v1",
            Self::Together => "https://api.together.xyz/v1",
            Self::Openrouter => "https://openrouter.ai/api/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Mistral => Some("MISTRAL_API_KEY"),
            Self::Deepseek => Some("DEEPSEEK_API_KEY"),
            Self::Fireworks => Some("FIREWORKS_API_KEY"),
            Self::Together => Some("TOGETHERAI_API_KEY"),
            Self::Openrouter => Some("OPENROUTER_API_KEY"),
            Self::Ollama => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model name resolved to the provider that serves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub provider: Provider,
    /// Model id as the provider expects it (routing prefix removed).
    pub model: String,
}

impl ModelRoute {
    /// Resolves `provider/model` names and infers the provider for bare names.
    pub fn resolve(name: &str) -> Self {
        let name = name.trim();
        if let Some((prefix, rest)) = name.split_once('/') {
            if let Some(provider) = Provider::from_prefix(prefix) {
                return Self {
                    provider,
                    model: rest.to_string(),
                };
            }
        }

        let provider = if name.starts_with("claude-") {
            Provider::Anthropic
        } else if name.starts_with("gemini") {
            Provider::Gemini
        } else if name.starts_with("deepseek") {
            Provider::Deepseek
        } else if name.starts_with("mistral") || name.starts_with("codestral") {
            Provider::Mistral
        } else {
            Provider::Openai
        };

        Self {
            provider,
            model: name.to_string(),
        }
    }

    pub fn endpoint(&self, api_base: Option<&str>, path: &str) -> String {
        let base = api_base
            .map(|value| value.trim_end_matches('/'))
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.provider.base_url());
        format!("{base}/{}", path.trim_start_matches('/'))
    }
}

/// Reads the provider key; providers without a key variable yield `Ok(None)`.
pub fn api_key(provider: Provider) -> Result<Option<String>, ProviderError> {
    let Some(key_env) = provider.api_key_env() else {
        return Ok(None);
    };
    match env::var(key_env) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value)),
        _ => Err(ProviderError::MissingApiKey { provider, key_env }),
    }
}

pub fn is_api_key_present(provider: Provider) -> bool {
    match provider.api_key_env() {
        Some(key_env) => env::var(key_env)
            .ok()
            .is_some_and(|value| !value.trim().is_empty()),
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content: plain text or multi-part (text + image URLs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Parts(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// User message carrying a text part followed by an image URL part.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        let parts = vec![
            serde_json::json!({ "type": "text", "text": text.into() }),
            serde_json::json!({ "type": "image_url", "image_url": { "url": image_url.into() } }),
        ];
        Self {
            role: Role::User,
            content: Some(MessageContent::Parts(parts)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content
                .filter(|text| !text.is_empty())
                .map(MessageContent::Text),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        self.content.as_ref().and_then(MessageContent::as_text)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    pub timeout_secs: Option<u64>,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            retries: 0,
            retry_delay_ms: 500,
        }
    }
}

/// Provider-agnostic completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<Value>,
    pub tool_choice: Option<Value>,
    pub response_format: Option<Value>,
    /// Additional provider parameters merged into the request body.
    pub extra: serde_json::Map<String, Value>,
    pub api_base: Option<String>,
    pub options: RequestOptions,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: None,
            response_format: None,
            extra: serde_json::Map::new(),
            api_base: None,
            options: RequestOptions::default(),
        }
    }

    pub fn route(&self) -> ModelRoute {
        ModelRoute::resolve(&self.model)
    }

    /// Request body in chat-completions wire format.
    pub fn to_body(&self, stream: bool) -> Value {
        let route = self.route();
        let mut body = serde_json::Map::new();
        for (key, value) in &self.extra {
            body.insert(key.clone(), value.clone());
        }
        body.insert("model".to_string(), Value::String(route.model));
        body.insert(
            "messages".to_string(),
            serde_json::to_value(&self.messages).unwrap_or(Value::Array(Vec::new())),
        );
        if stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }
        if let Some(temperature) = self.temperature {
            body.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = self.max_tokens {
            body.insert("max_tokens".to_string(), Value::from(max_tokens));
        }
        if !self.tools.is_empty() {
            body.insert("tools".to_string(), Value::Array(self.tools.clone()));
        }
        if let Some(tool_choice) = &self.tool_choice {
            body.insert("tool_choice".to_string(), tool_choice.clone());
        }
        if let Some(response_format) = &self.response_format {
            body.insert("response_format".to_string(), response_format.clone());
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    /// Untouched provider response body; `Null` for streamed responses.
    pub raw: Value,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{key_env} is not set in the environment")]
    MissingApiKey {
        provider: Provider,
        key_env: &'static str,
    },
    #[error("{provider} request failed: {source}")]
    Request {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: Provider,
        status: StatusCode,
        body: String,
    },
    #[error("{provider} response could not be decoded: {message}")]
    Decode { provider: Provider, message: String },
    #[error("{provider} response did not contain message content")]
    EmptyResponse { provider: Provider },
    #[error("Audio file not found: {0}")]
    MissingFile(String),
}
