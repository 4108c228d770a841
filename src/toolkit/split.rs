use serde_json::{Map, Value};
use text_splitter::{ChunkConfig, TextSplitter};

use super::{Document, ToolkitError};

pub const TEXT_CHUNK_SIZE: usize = 100;
pub const TEXT_CHUNK_OVERLAP: usize = 20;
pub const DOCUMENT_CHUNK_SIZE: usize = 1000;
pub const DOCUMENT_CHUNK_OVERLAP: usize = 10;

/// Character-counted recursive splitter (paragraphs, lines, words, chars).
pub struct Splitter {
    inner: TextSplitter<text_splitter::Characters>,
}

impl Splitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ToolkitError> {
        if chunk_size == 0 {
            return Err(ToolkitError::InvalidChunking(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        let config = ChunkConfig::new(chunk_size)
            .with_overlap(chunk_overlap)
            .map_err(|err| ToolkitError::InvalidChunking(err.to_string()))?;
        Ok(Self {
            inner: TextSplitter::new(config),
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.inner
            .chunks(text)
            .filter(|chunk| !chunk.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn split_with_metadata(&self, text: &str, metadata: &Map<String, Value>) -> Vec<Document> {
        self.split_text(text)
            .into_iter()
            .map(|chunk| Document::new(chunk, metadata.clone()))
            .collect()
    }

    /// Splits every document, copying its metadata onto each chunk.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        documents
            .iter()
            .flat_map(|doc| self.split_with_metadata(&doc.page_content, &doc.metadata))
            .collect()
    }
}
