use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::split::Splitter;
use super::{Document, ToolkitError};

pub const DEFAULT_GLOB: &str = "**/*";

fn source_metadata(path: &Path) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        "source".to_string(),
        Value::String(path.display().to_string()),
    );
    metadata
}

/// Accepts a JSON array of paths or a single JSON string.
pub fn parse_file_list(raw: &str) -> Result<Vec<PathBuf>, ToolkitError> {
    let value: Value = serde_json::from_str(raw.trim())?;
    let paths = match value {
        Value::String(path) => vec![PathBuf::from(path)],
        other => serde_json::from_value::<Vec<String>>(other)?
            .into_iter()
            .map(PathBuf::from)
            .collect(),
    };
    Ok(paths)
}

/// Loads and splits the given files; any unreadable file is an error.
pub fn load_files(paths: &[PathBuf], splitter: &Splitter) -> Result<Vec<Document>, ToolkitError> {
    let mut documents = Vec::new();
    for path in paths {
        let text = fs::read_to_string(path).map_err(ToolkitError::io(path))?;
        documents.extend(splitter.split_with_metadata(&text, &source_metadata(path)));
    }
    Ok(documents)
}

/// Loads every file under `dir` matching `pattern`. Files that cannot be read
/// as UTF-8 text are skipped with a warning.
pub fn load_directory(
    dir: &Path,
    pattern: &str,
    splitter: &Splitter,
) -> Result<Vec<Document>, ToolkitError> {
    if !dir.is_dir() {
        return Err(ToolkitError::DirectoryNotFound(dir.to_path_buf()));
    }

    let full_pattern = dir.join(pattern).display().to_string();
    let entries = glob::glob(&full_pattern).map_err(|err| ToolkitError::InvalidGlob {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })?;

    let mut documents = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable path");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(text) => {
                documents.extend(splitter.split_with_metadata(&text, &source_metadata(&path)))
            }
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping file"),
        }
    }

    if documents.is_empty() {
        tracing::warn!(dir = %dir.display(), "No documents found in directory");
    }
    Ok(documents)
}
