use serde::Deserialize;
use serde_json::json;

use crate::llm::chat_runtime::post_json_with_retry;
use crate::llm::provider::{ModelRoute, ProviderError, RequestOptions, api_key};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embeddings client for any OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct Embeddings {
    route: ModelRoute,
    api_base: Option<String>,
    client: reqwest::Client,
}

impl Embeddings {
    pub fn new(model: &str) -> Self {
        Self {
            route: ModelRoute::resolve(model),
            api_base: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: Option<String>) -> Self {
        self.api_base = api_base;
        self
    }

    /// Embeds a single query string and returns the dense vector.
    pub async fn embed_query(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_documents(&[input.to_string()]).await?;
        vectors.pop().ok_or(ProviderError::EmptyResponse {
            provider: self.route.provider,
        })
    }

    /// Embeds a batch; vectors are returned in input order.
    pub async fn embed_documents(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let provider = self.route.provider;
        let key = api_key(provider)?;
        let url = self.route.endpoint(self.api_base.as_deref(), "embeddings");
        let payload = json!({
            "model": self.route.model,
            "input": inputs,
        });
        tracing::debug!(%provider, model = %self.route.model, count = inputs.len(), "requesting embeddings");

        let response = post_json_with_retry(
            &self.client,
            &url,
            key.as_deref(),
            &payload,
            RequestOptions::default(),
        )
        .await
        .map_err(|failure| failure.into_provider_error(provider))?;

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|source| ProviderError::Request { provider, source })?;
        if body.data.len() != inputs.len() {
            return Err(ProviderError::Decode {
                provider,
                message: format!(
                    "expected {} embeddings, received {}",
                    inputs.len(),
                    body.data.len()
                ),
            });
        }
        body.data.sort_by_key(|item| item.index);
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

/// Cosine similarity; zero-length vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..len {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
