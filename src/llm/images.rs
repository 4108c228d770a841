use serde::Deserialize;
use serde_json::json;

use crate::llm::chat_runtime::post_json_with_retry;
use crate::llm::provider::{ModelRoute, ProviderError, RequestOptions, api_key};

pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub n: u32,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    b64_json: Option<String>,
}

/// Calls `/images/generations` and returns the first image URL.
/// Base64-only responses are returned as a PNG data URL.
pub async fn generate_image(
    client: &reqwest::Client,
    request: &ImageRequest,
) -> Result<String, ProviderError> {
    let route = ModelRoute::resolve(&request.model);
    let provider = route.provider;
    let key = api_key(provider)?;
    let url = route.endpoint(None, "images/generations");
    let payload = json!({
        "model": route.model,
        "prompt": request.prompt,
        "size": request.size,
        "quality": request.quality,
        "n": request.n,
    });
    tracing::info!(prompt = %request.prompt, "generating image");

    let response = post_json_with_retry(client, &url, key.as_deref(), &payload, RequestOptions::default())
        .await
        .map_err(|failure| failure.into_provider_error(provider))?;
    let body: ImagesResponse = response
        .json()
        .await
        .map_err(|source| ProviderError::Request { provider, source })?;

    let first = body
        .data
        .into_iter()
        .next()
        .ok_or(ProviderError::EmptyResponse { provider })?;
    match (first.url, first.b64_json) {
        (Some(url), _) => Ok(url),
        (None, Some(b64)) => Ok(format!("data:image/png;base64,{b64}")),
        (None, None) => Err(ProviderError::EmptyResponse { provider }),
    }
}
