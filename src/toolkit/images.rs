use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::join_all;
use serde_json::Value;

use super::ToolkitError;
use crate::llm::images::{DEFAULT_IMAGE_MODEL, ImageRequest, generate_image};

pub const VALID_SIZES: &[&str] = &["256x256", "512x512", "1024x1024", "1792x1024", "1024x1792"];
pub const VALID_QUALITIES: &[&str] = &["standard", "hd", "low", "medium", "high"];

#[derive(Debug, Clone)]
pub struct ImageOptions {
    pub model: String,
    pub size: String,
    pub quality: String,
    pub number: u32,
    /// Appended to every prompt.
    pub style: String,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_IMAGE_MODEL.to_string(),
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
            number: 1,
            style: String::new(),
        }
    }
}

impl ImageOptions {
    pub fn validate(&self) -> Result<(), ToolkitError> {
        if !VALID_SIZES.contains(&self.size.as_str()) {
            return Err(ToolkitError::InvalidOption(format!(
                "Invalid size '{}'. Valid options are {VALID_SIZES:?}.",
                self.size
            )));
        }
        if !VALID_QUALITIES.contains(&self.quality.as_str()) {
            return Err(ToolkitError::InvalidOption(format!(
                "Invalid quality '{}'. Valid options are {VALID_QUALITIES:?}.",
                self.quality
            )));
        }
        if self.number < 1 {
            return Err(ToolkitError::InvalidOption(
                "Number of images must be at least 1.".to_string(),
            ));
        }
        Ok(())
    }

    fn request_for(&self, prompt: &str) -> ImageRequest {
        let prompt = if self.style.is_empty() {
            prompt.to_string()
        } else {
            format!("{prompt} {}", self.style)
        };
        ImageRequest {
            model: self.model.clone(),
            prompt,
            size: self.size.clone(),
            quality: self.quality.clone(),
            n: self.number,
        }
    }
}

/// A JSON array yields one prompt per item; anything else is a single prompt.
pub fn parse_prompts(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => text,
                other => other.to_string(),
            })
            .collect(),
        Ok(Value::String(text)) => vec![text],
        _ => {
            tracing::info!("stdin is not a JSON array; using it as a single prompt");
            vec![raw.trim_end().to_string()]
        }
    }
}

/// Generates one image per prompt concurrently. Failed prompts map to `None`.
pub async fn generate_all(
    client: &reqwest::Client,
    prompts: &[String],
    options: &ImageOptions,
) -> Vec<Option<String>> {
    join_all(prompts.iter().map(|prompt| async move {
        match generate_image(client, &options.request_for(prompt)).await {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::error!(%prompt, error = %err, "error generating image");
                None
            }
        }
    }))
    .await
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, ToolkitError> {
    if let Some((_, data)) = url.split_once(";base64,") {
        return STANDARD
            .decode(data)
            .map_err(|err| ToolkitError::InvalidOption(format!("Invalid image data: {err}")));
    }
    let download_error = |source| ToolkitError::Download {
        url: url.to_string(),
        source,
    };
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(download_error)?;
    let bytes = response.bytes().await.map_err(download_error)?;
    Ok(bytes.to_vec())
}

/// Saves each generated image as `image_<i>.png` in `dir`.
pub async fn save_images(
    client: &reqwest::Client,
    urls: &[Option<String>],
    dir: &Path,
) -> Result<Vec<PathBuf>, ToolkitError> {
    fs::create_dir_all(dir).map_err(ToolkitError::io(dir))?;
    let mut saved = Vec::new();
    for (i, url) in urls.iter().enumerate() {
        let Some(url) = url else {
            continue;
        };
        let bytes = fetch_bytes(client, url).await?;
        let path = dir.join(format!("image_{i}.png"));
        fs::write(&path, bytes).map_err(ToolkitError::io(&path))?;
        tracing::info!(path = %path.display(), "image saved");
        saved.push(path);
    }
    Ok(saved)
}
