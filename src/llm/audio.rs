use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::llm::provider::{ModelRoute, ProviderError, api_key};

pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Uploads an audio file to `/audio/transcriptions` and returns the text.
pub async fn transcribe(path: &Path, model: &str) -> Result<String, ProviderError> {
    if !path.is_file() {
        return Err(ProviderError::MissingFile(path.display().to_string()));
    }

    let route = ModelRoute::resolve(model);
    let provider = route.provider;
    let key = api_key(provider)?;
    let url = route.endpoint(None, "audio/transcriptions");

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| ProviderError::MissingFile(path.display().to_string()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    let form = Form::new()
        .text("model", route.model.clone())
        .part("file", Part::bytes(bytes).file_name(file_name));

    let mut request = reqwest::Client::new().post(&url).multipart(form);
    if let Some(key) = key {
        request = request.bearer_auth(key);
    }
    tracing::debug!(%provider, model = %route.model, path = %path.display(), "requesting transcription");

    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Request { provider, source })?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            provider,
            status,
            body,
        });
    }

    let body: TranscriptionResponse = response
        .json()
        .await
        .map_err(|source| ProviderError::Request { provider, source })?;
    Ok(body.text)
}
