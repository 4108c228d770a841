//! Pipe utilities behind the `cllm-*` helper binaries.
//!
//! Every tool speaks the same JSON document shape on stdin/stdout:
//! `[{"page_content": "...", "metadata": {...}}, ...]`.

pub mod images;
pub mod load;
pub mod repeat;
pub mod split;
pub mod vector;

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::ProviderError;

#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("Invalid JSON input: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Invalid chunk settings: {0}")]
    InvalidChunking(String),
    #[error("Directory {0} does not exist.")]
    DirectoryNotFound(PathBuf),
    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },
    #[error("Vector index file {0} does not exist.")]
    IndexNotFound(PathBuf),
    #[error("A query is required for the read operation")]
    MissingQuery,
    #[error(
        "Vector index was built with embedding model '{index}', not '{requested}'. Use the same model or a new index."
    )]
    ModelMismatch { index: String, requested: String },
    #[error("Embedding dimension mismatch: index vectors have {expected} dimensions, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("{0}")]
    InvalidOption(String),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ToolkitError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ToolkitError::Io { path, source }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A chunk of text with free-form metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub page_content: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }
}

pub fn parse_documents(raw: &str) -> Result<Vec<Document>, ToolkitError> {
    Ok(serde_json::from_str(raw)?)
}

pub fn documents_to_json(documents: &[Document], pretty: bool) -> Result<String, ToolkitError> {
    let json = if pretty {
        serde_json::to_string_pretty(documents)?
    } else {
        serde_json::to_string(documents)?
    };
    Ok(json)
}
