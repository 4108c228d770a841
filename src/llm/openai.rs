//! OpenAI-compatible chat-completions transport shared by every provider.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::backend::{ChatBackend, DeltaSink};
use crate::llm::chat_runtime::post_json_with_retry;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, ProviderError, Usage, api_key, is_api_key_present,
};
use crate::llm::tools::ToolCall;

pub const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Reqwest-backed [`ChatBackend`].
#[derive(Debug, Clone, Default)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let route = request.route();
        let provider = route.provider;
        let key = api_key(provider)?;
        let url = route.endpoint(request.api_base.as_deref(), CHAT_COMPLETIONS_PATH);
        tracing::debug!(
            %provider,
            model = %route.model,
            %url,
            stream,
            api_key_present = is_api_key_present(provider),
            messages = request.messages.len(),
            "sending chat completion"
        );

        post_json_with_retry(
            &self.client,
            &url,
            key.as_deref(),
            &request.to_body(stream),
            request.options,
        )
        .await
        .map_err(|failure| failure.into_provider_error(provider))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let provider = request.route().provider;
        let response = self.send(request, false).await?;
        let raw: Value = response
            .json()
            .await
            .map_err(|source| ProviderError::Request { provider, source })?;
        parse_completion(&raw).map_err(|message| ProviderError::Decode { provider, message })
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        on_delta: DeltaSink<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        let provider = request.route().provider;
        let response = self.send(request, true).await?;
        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut collected = CompletionResponse::default();
        let mut content = String::new();

        'outer: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|source| ProviderError::Request { provider, source })?;
            for event in decoder.push(&chunk) {
                let Some(event) = event else {
                    break 'outer;
                };
                let parsed: StreamChunk = serde_json::from_str(&event).map_err(|err| {
                    ProviderError::Decode {
                        provider,
                        message: err.to_string(),
                    }
                })?;
                if let Some(usage) = parsed.usage {
                    collected.usage = Some(usage);
                }
                for choice in parsed.choices {
                    if let Some(delta) = choice.delta.content.filter(|text| !text.is_empty()) {
                        content.push_str(&delta);
                        if on_delta(&delta).is_break() {
                            tracing::debug!("stream consumer stopped; closing the response");
                            break 'outer;
                        }
                    }
                    if choice.finish_reason.is_some() {
                        collected.finish_reason = choice.finish_reason;
                    }
                }
            }
        }

        collected.content = Some(content);
        Ok(collected)
    }
}

fn parse_completion(raw: &Value) -> Result<CompletionResponse, String> {
    let body: ChatCompletionResponse =
        serde_json::from_value(raw.clone()).map_err(|err| err.to_string())?;
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| "response has no choices".to_string())?;

    Ok(CompletionResponse {
        content: choice.message.content,
        tool_calls: choice.message.tool_calls,
        finish_reason: choice.finish_reason,
        usage: body.usage,
        raw: raw.clone(),
    })
}

/// Incremental server-sent-events decoder for `data:` lines.
///
/// Bytes are buffered until a full line arrives so multi-byte characters
/// split across network chunks decode intact.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Returns complete event payloads; `None` marks the `[DONE]` sentinel.
    fn push(&mut self, bytes: &[u8]) -> Vec<Option<String>> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(None);
            } else if !data.is_empty() {
                events.push(Some(data.to_string()));
            }
        }

        events
    }
}
