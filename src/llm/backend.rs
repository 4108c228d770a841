use std::ops::ControlFlow;

use async_trait::async_trait;

use crate::llm::provider::{CompletionRequest, CompletionResponse, ProviderError};

/// Receives streamed content deltas as they arrive. `Break` stops the stream.
pub type DeltaSink<'a> = &'a mut (dyn FnMut(&str) -> ControlFlow<()> + Send);

/// Chat-completions transport used by the ask pipeline and the agent loop.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest)
    -> Result<CompletionResponse, ProviderError>;

    /// Streams the completion, forwarding each content delta to `on_delta`.
    /// The returned response carries the content received before the stream
    /// ended or the sink broke off.
    async fn stream(
        &self,
        request: &CompletionRequest,
        on_delta: DeltaSink<'_>,
    ) -> Result<CompletionResponse, ProviderError>;
}

/// Tries `request.model` first, then each fallback model in order.
pub async fn complete_with_fallbacks(
    backend: &dyn ChatBackend,
    request: &CompletionRequest,
    fallbacks: &[String],
) -> Result<CompletionResponse, ProviderError> {
    let mut last_error = match backend.complete(request).await {
        Ok(response) => return Ok(response),
        Err(err) => err,
    };

    for model in fallbacks {
        tracing::warn!(failed = %request.model, next = %model, error = %last_error, "falling back to next model");
        let mut retry = request.clone();
        retry.model = model.clone();
        match backend.complete(&retry).await {
            Ok(response) => return Ok(response),
            Err(err) => last_error = err,
        }
    }

    Err(last_error)
}
