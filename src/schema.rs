//! JSON Schema loading (inline, file, remote) and response validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{Cllmfile, ConfigLocations};

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_REMOTE_SCHEMA_BYTES: usize = 1024 * 1024;
const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(
        "No schema provided. Use --json-schema or --json-schema-file, or set json_schema in your Cllmfile."
    )]
    Missing,
    #[error("Invalid JSON in schema: {0}")]
    InvalidJson(String),
    #[error("Schema file not found: {0}")]
    FileNotFound(String),
    #[error("Error reading schema file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON schema: {0}")]
    InvalidSchema(String),
    #[error(
        "Insecure schema URL {0}. Use https:// or set CLLM_ALLOW_HTTP_SCHEMAS=1 to allow http://"
    )]
    InsecureUrl(String),
    #[error("Remote schema {url} exceeds the {limit} byte limit")]
    TooLarge { url: String, limit: usize },
    #[error("Schema {0} is not cached and CLLM_OFFLINE_MODE is enabled")]
    Offline(String),
    #[error("Failed to fetch schema {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("Response is not valid JSON: {0}")]
    ResponseNotJson(String),
    #[error("Response does not match schema:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

/// Where a schema comes from, in precedence order.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    Inline(String),
    Location(String),
    Value(Value),
}

/// CLI inline > CLI file > Cllmfile `json_schema` > Cllmfile `json_schema_file`.
pub fn select_source(
    cli_inline: Option<&str>,
    cli_file: Option<&str>,
    config: &Cllmfile,
) -> Option<SchemaSource> {
    if let Some(inline) = cli_inline {
        return Some(SchemaSource::Inline(inline.to_string()));
    }
    if let Some(file) = cli_file {
        return Some(SchemaSource::Location(file.to_string()));
    }
    match &config.json_schema {
        Some(Value::String(location)) => return Some(SchemaSource::Location(location.clone())),
        Some(Value::Null) | None => {}
        Some(value) => return Some(SchemaSource::Value(value.clone())),
    }
    config
        .json_schema_file
        .as_ref()
        .map(|file| SchemaSource::Location(file.clone()))
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct SchemaLoader {
    cwd: PathBuf,
    search_dirs: Vec<PathBuf>,
    cache_dir: Option<PathBuf>,
    allow_http: bool,
    offline: bool,
}

impl SchemaLoader {
    pub fn new(locations: &ConfigLocations) -> Self {
        let mut search_dirs = vec![locations.local_cllm_dir()];
        if let Some(base) = &locations.base {
            search_dirs.insert(0, base.clone());
        }
        Self {
            cwd: locations.cwd.clone(),
            search_dirs,
            cache_dir: locations
                .home_cllm_dir()
                .map(|dir| dir.join("cache").join("schemas")),
            allow_http: env_flag("CLLM_ALLOW_HTTP_SCHEMAS"),
            offline: env_flag("CLLM_OFFLINE_MODE"),
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Loads the schema and checks it against the meta-schema.
    pub async fn load(&self, source: &SchemaSource) -> Result<Value, SchemaError> {
        let schema = match source {
            SchemaSource::Inline(text) => serde_json::from_str(text)
                .map_err(|err| SchemaError::InvalidJson(err.to_string()))?,
            SchemaSource::Value(value) => value.clone(),
            SchemaSource::Location(location) if is_remote(location) => {
                self.load_remote(location).await?
            }
            SchemaSource::Location(location) => self.load_file(location)?,
        };
        check_schema(&schema)?;
        Ok(schema)
    }

    pub fn resolve_file(&self, location: &str) -> Option<PathBuf> {
        let path = Path::new(location);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        std::iter::once(&self.cwd)
            .chain(self.search_dirs.iter())
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
    }

    fn load_file(&self, location: &str) -> Result<Value, SchemaError> {
        let path = self
            .resolve_file(location)
            .ok_or_else(|| SchemaError::FileNotFound(location.to_string()))?;
        let raw = fs::read_to_string(&path).map_err(|source| SchemaError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|err| SchemaError::InvalidJson(err.to_string()))
    }

    fn cache_path(&self, url: &str) -> Option<PathBuf> {
        let digest = Sha256::digest(url.as_bytes());
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", hex::encode(digest))))
    }

    fn read_cache(&self, url: &str, allow_stale: bool) -> Option<Value> {
        let path = self.cache_path(url)?;
        let modified = fs::metadata(&path).and_then(|meta| meta.modified()).ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if !allow_stale && age > CACHE_TTL {
            return None;
        }
        let raw = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn write_cache(&self, url: &str, body: &str) {
        let Some(path) = self.cache_path(url) else {
            return;
        };
        let result = path
            .parent()
            .map(fs::create_dir_all)
            .transpose()
            .and_then(|_| fs::write(&path, body));
        if let Err(err) = result {
            tracing::debug!(path = %path.display(), error = %err, "could not write schema cache");
        }
    }

    async fn load_remote(&self, url: &str) -> Result<Value, SchemaError> {
        if url.starts_with("http://") && !self.allow_http {
            return Err(SchemaError::InsecureUrl(url.to_string()));
        }

        if let Some(cached) = self.read_cache(url, self.offline) {
            tracing::debug!(%url, "using cached schema");
            return Ok(cached);
        }
        if self.offline {
            return Err(SchemaError::Offline(url.to_string()));
        }

        match fetch_remote(url).await {
            Ok(body) => {
                let schema: Value = serde_json::from_str(&body)
                    .map_err(|err| SchemaError::InvalidJson(err.to_string()))?;
                self.write_cache(url, &body);
                Ok(schema)
            }
            Err(err @ SchemaError::TooLarge { .. }) => Err(err),
            Err(err) => match self.read_cache(url, true) {
                Some(stale) => {
                    tracing::warn!(%url, error = %err, "using stale cached schema");
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("https://") || location.starts_with("http://")
}

async fn fetch_remote(url: &str) -> Result<String, SchemaError> {
    let fetch_error = |message: String| SchemaError::Fetch {
        url: url.to_string(),
        message,
    };
    let response = reqwest::Client::new()
        .get(url)
        .timeout(REMOTE_TIMEOUT)
        .send()
        .await
        .map_err(|err| fetch_error(err.to_string()))?;
    if !response.status().is_success() {
        return Err(fetch_error(format!("HTTP {}", response.status())));
    }
    let too_large = || SchemaError::TooLarge {
        url: url.to_string(),
        limit: MAX_REMOTE_SCHEMA_BYTES,
    };
    if response
        .content_length()
        .is_some_and(|len| len as usize > MAX_REMOTE_SCHEMA_BYTES)
    {
        return Err(too_large());
    }
    let body = read_capped(response.bytes_stream(), MAX_REMOTE_SCHEMA_BYTES)
        .await
        .map_err(|err| match err {
            CappedRead::TooLarge => too_large(),
            CappedRead::Stream(message) => fetch_error(message),
        })?;
    String::from_utf8(body).map_err(|err| fetch_error(err.to_string()))
}

#[derive(Debug, PartialEq)]
enum CappedRead {
    TooLarge,
    Stream(String),
}

/// Collects a body stream, giving up as soon as it grows past `limit` bytes.
async fn read_capped<S, B, E>(chunks: S, limit: usize) -> Result<Vec<u8>, CappedRead>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut body = Vec::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|err| CappedRead::Stream(err.to_string()))?;
        let chunk = chunk.as_ref();
        if body.len() + chunk.len() > limit {
            return Err(CappedRead::TooLarge);
        }
        body.extend_from_slice(chunk);
    }
    Ok(body)
}

/// Checks a schema against the JSON Schema meta-schema.
pub fn check_schema(schema: &Value) -> Result<(), SchemaError> {
    jsonschema::validator_for(schema)
        .map(|_| ())
        .map_err(|err| SchemaError::InvalidSchema(err.to_string()))
}

/// Validates `instance`, reporting every violation.
pub fn validate_against_schema(instance: &Value, schema: &Value) -> Result<(), SchemaError> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|err| SchemaError::InvalidSchema(err.to_string()))?;
    let errors: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| {
            let path = err.instance_path.to_string();
            if path.is_empty() {
                err.to_string()
            } else {
                format!("{path}: {err}")
            }
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::Validation(errors))
    }
}

/// Parses a model response as JSON and validates it.
pub fn parse_and_validate(response: &str, schema: &Value) -> Result<Value, SchemaError> {
    let value: Value = serde_json::from_str(response.trim())
        .map_err(|err| SchemaError::ResponseNotJson(err.to_string()))?;
    validate_against_schema(&value, schema)?;
    Ok(value)
}

/// `response_format` payload requesting schema-conforming output.
pub fn response_format(schema: &Value) -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "response_schema",
            "schema": schema,
        }
    })
}

fn type_name(schema: &Value) -> String {
    match schema.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" | "),
        _ => "any".to_string(),
    }
}

/// Human-readable report printed by `--validate-schema`.
pub fn describe_schema(schema: &Value) -> String {
    let mut lines = vec!["✓ Schema is valid".to_string(), String::new()];
    lines.push("Schema details:".to_string());
    lines.push(format!("  Type: {}", type_name(schema)));

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        lines.push(format!("  Properties: {}", properties.len()));
        for (name, definition) in properties {
            let status = if required.contains(&name.as_str()) {
                "required"
            } else {
                "optional"
            };
            lines.push(format!("    - {name}: {} ({status})", type_name(definition)));
        }
    }

    if let Some(items) = schema.get("items") {
        lines.push(format!("  Items: {}", type_name(items)));
    }

    lines.push(String::new());
    lines.push("Schema validation successful".to_string());
    lines.join("\n")
}
