//! Multi-provider LLM integration.
//!
//! Every provider is reached through its OpenAI-compatible endpoint; model
//! names select the provider (`groq/llama3`, `claude-3-haiku-20240307`, ...).

/// Audio transcription requests.
pub mod audio;
/// The `ChatBackend` seam and fallback handling.
pub mod backend;
pub(crate) mod chat_runtime;
/// Embedding requests and similarity helpers.
pub mod embeddings;
/// Image generation requests.
pub mod images;
/// Built-in model catalogue.
pub mod models;
/// Chat-completions HTTP transport.
pub mod openai;
/// Provider routing, messages and request types.
pub mod provider;
/// Tool schema and invocation payload helpers.
pub mod tools;

pub use backend::{ChatBackend, complete_with_fallbacks};
pub use openai::HttpBackend;
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, ModelRoute, Provider, ProviderError,
    RequestOptions, Role, Usage,
};
