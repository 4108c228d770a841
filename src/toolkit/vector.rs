//! Local similarity index stored as JSON at `<cllm_dir>/rag/<name>.json`.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Document, ToolkitError};
use crate::llm::embeddings::{DEFAULT_EMBEDDING_MODEL, Embeddings, cosine_similarity};

pub const RAG_DIR: &str = "rag";
pub const DEFAULT_RESULTS: usize = 5;
pub const NO_DOCUMENTS: &str = "No documents found.";

pub fn index_path(cllm_dir: &Path, name: &str) -> PathBuf {
    cllm_dir.join(RAG_DIR).join(format!("{name}.json"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    #[serde(flatten)]
    pub document: Document,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    pub model: String,
    pub documents: Vec<IndexedDocument>,
}

impl VectorIndex {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            documents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self, ToolkitError> {
        if !path.is_file() {
            return Err(ToolkitError::IndexNotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(ToolkitError::io(path))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Writes via a temporary file so a crash never leaves a truncated index.
    pub fn save(&self, path: &Path) -> Result<(), ToolkitError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ToolkitError::io(parent))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(self)?).map_err(ToolkitError::io(&tmp))?;
        fs::rename(&tmp, path).map_err(ToolkitError::io(path))
    }

    /// Vector length shared by every stored embedding.
    pub fn dimensions(&self) -> Option<usize> {
        self.documents.first().map(|entry| entry.embedding.len())
    }

    /// The embedding model to use against this index. Vectors from another
    /// model live in a different space, so a mismatch is rejected.
    pub fn resolve_model(&self, requested: Option<&str>) -> Result<String, ToolkitError> {
        match requested {
            Some(model) if model != self.model => Err(ToolkitError::ModelMismatch {
                index: self.model.clone(),
                requested: model.to_string(),
            }),
            _ => Ok(self.model.clone()),
        }
    }

    fn check_dimensions(expected: Option<usize>, vector: &[f32]) -> Result<(), ToolkitError> {
        match expected {
            Some(expected) if expected != vector.len() => Err(ToolkitError::DimensionMismatch {
                expected,
                found: vector.len(),
            }),
            _ => Ok(()),
        }
    }

    pub fn add(
        &mut self,
        documents: Vec<Document>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<(), ToolkitError> {
        let expected = self
            .dimensions()
            .or_else(|| embeddings.first().map(Vec::len));
        for vector in &embeddings {
            Self::check_dimensions(expected, vector)?;
        }
        self.documents.extend(
            documents
                .into_iter()
                .zip(embeddings)
                .map(|(document, embedding)| IndexedDocument {
                    document,
                    embedding,
                }),
        );
        Ok(())
    }

    /// Top `k` documents by cosine similarity, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Document>, ToolkitError> {
        Self::check_dimensions(self.dimensions(), query)?;
        let mut scored: Vec<(f32, &IndexedDocument)> = self
            .documents
            .iter()
            .map(|entry| (cosine_similarity(query, &entry.embedding), entry))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, entry)| entry.document.clone())
            .collect())
    }
}

/// Embeds `documents` and appends them to the index at `path`, creating it
/// when missing. A new index records `requested_model` (or the default
/// embedding model); an existing one keeps its own.
pub async fn save_documents(
    requested_model: Option<&str>,
    api_base: Option<String>,
    path: &Path,
    documents: Vec<Document>,
) -> Result<usize, ToolkitError> {
    let mut index = if path.is_file() {
        VectorIndex::load(path)?
    } else {
        VectorIndex::new(requested_model.unwrap_or(DEFAULT_EMBEDDING_MODEL))
    };
    let model = index.resolve_model(requested_model)?;
    let embeddings = Embeddings::new(&model).with_api_base(api_base);

    let texts: Vec<String> = documents
        .iter()
        .map(|doc| doc.page_content.clone())
        .collect();
    let vectors = embeddings.embed_documents(&texts).await?;
    index.add(documents, vectors)?;
    index.save(path)?;

    tracing::info!(path = %path.display(), %model, total = index.len(), "vector index saved");
    Ok(index.len())
}

/// Searches the index at `path` with the embedding model it was built with.
pub async fn search_documents(
    requested_model: Option<&str>,
    api_base: Option<String>,
    path: &Path,
    query: &str,
    k: usize,
) -> Result<Vec<Document>, ToolkitError> {
    let index = VectorIndex::load(path)?;
    let model = index.resolve_model(requested_model)?;
    if index.is_empty() {
        return Ok(Vec::new());
    }
    let vector = Embeddings::new(&model)
        .with_api_base(api_base)
        .embed_query(query)
        .await?;
    index.search(&vector, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use tempfile::tempdir;

    fn doc(text: &str) -> Document {
        Document::new(text, Map::new())
    }

    #[test]
    fn search_orders_by_similarity() {
        let mut index = VectorIndex::new("text-embedding-3-small");
        index.add(
            vec![doc("east"), doc("north"), doc("north-east")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]],
        )
        .expect("add");

        let hits = index.search(&[0.1, 1.0], 2).expect("search");
        let texts: Vec<_> = hits.iter().map(|d| d.page_content.as_str()).collect();
        assert_eq!(texts, vec!["north", "north-east"]);
        assert_eq!(index.search(&[1.0, 0.0], 10).expect("search").len(), 3);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let mut index = VectorIndex::new("text-embedding-3-small");
        index
            .add(vec![doc("a"), doc("b")], vec![vec![1.0, 0.0], vec![0.0, 1.0]])
            .expect("add");

        let err = index.search(&[1.0, 0.0, 0.0], 2).expect_err("3-dim query");
        assert!(matches!(
            err,
            ToolkitError::DimensionMismatch { expected: 2, found: 3 }
        ));

        let err = index
            .add(vec![doc("c")], vec![vec![0.5, 0.5, 0.5]])
            .expect_err("3-dim document");
        assert!(matches!(err, ToolkitError::DimensionMismatch { .. }));
        assert_eq!(index.len(), 2);

        let mut fresh = VectorIndex::new("m");
        let err = fresh
            .add(vec![doc("x"), doc("y")], vec![vec![1.0], vec![1.0, 2.0]])
            .expect_err("ragged batch");
        assert!(matches!(err, ToolkitError::DimensionMismatch { .. }));
        assert!(fresh.is_empty());
    }

    #[test]
    fn index_model_is_used_and_others_rejected() {
        let index = VectorIndex::new("text-embedding-3-large");
        assert_eq!(index.resolve_model(None).expect("default"), "text-embedding-3-large");
        assert_eq!(
            index.resolve_model(Some("text-embedding-3-large")).expect("same"),
            "text-embedding-3-large"
        );
        let err = index
            .resolve_model(Some("text-embedding-3-small"))
            .expect_err("other model");
        assert!(err.to_string().contains("'text-embedding-3-large', not 'text-embedding-3-small'"));
    }

    #[test]
    fn index_round_trips_through_disk() {
        let dir = tempdir().expect("tempdir");
        let path = index_path(dir.path(), "notes");
        assert!(path.ends_with("rag/notes.json"));

        let err = VectorIndex::load(&path).expect_err("missing");
        assert!(matches!(err, ToolkitError::IndexNotFound(_)));

        let mut index = VectorIndex::new("m");
        index.add(vec![doc("hello")], vec![vec![0.5, 0.5]]).expect("add");
        index.save(&path).expect("save");

        let loaded = VectorIndex::load(&path).expect("load");
        assert_eq!(loaded, index);
        assert!(!path.with_extension("json.tmp").exists());

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["documents"][0]["page_content"], "hello");
    }
}
