//! File-backed multi-turn conversation storage.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::ConfigLocations;
use crate::llm::provider::{ChatMessage, Role, Usage};

pub const CONVERSATIONS_DIR: &str = "conversations";

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Conversation ID cannot be empty")]
    EmptyId,
    #[error(
        "Invalid conversation ID: '{0}'. Only alphanumeric characters, hyphens, and underscores are allowed."
    )]
    InvalidId(String),
    #[error("Conversation '{0}' already exists")]
    AlreadyExists(String),
    #[error("Conversation '{0}' not found")]
    NotFound(String),
    #[error("Malformed conversation file '{id}': {message}")]
    Malformed { id: String, message: String },
    #[error("Failed to save conversation '{id}': {source}")]
    Save {
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to access conversations in {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("--read-only requires --conversation")]
    ReadOnlyWithoutConversation,
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        let now = now_timestamp();
        Self {
            id: id.into(),
            model: model.into(),
            messages: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
            metadata: Map::new(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = now_timestamp();
    }

    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.touch();
    }

    pub fn has_system_message(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|message| message.role == Role::System)
    }

    /// True when the stored system message already carries context blocks.
    pub fn has_context_in_system_message(&self) -> bool {
        if !self.has_system_message() {
            return false;
        }
        let content = self.messages[0].text_content().unwrap_or_default();
        content.contains("--- Context:") && content.contains("--- End Context ---")
    }

    /// Replaces the leading system message or inserts one.
    pub fn set_system_message(&mut self, content: impl Into<String>) {
        let message = ChatMessage::system(content);
        if self.has_system_message() {
            self.messages[0] = message;
        } else {
            self.messages.insert(0, message);
        }
        self.touch();
    }

    pub fn total_tokens(&self) -> u64 {
        match self.metadata.get("total_tokens") {
            Some(Value::Number(number)) => number
                .as_u64()
                .or_else(|| number.as_f64().map(|value| value.max(0.0) as u64))
                .unwrap_or(0),
            Some(Value::Bool(flag)) => u64::from(*flag),
            Some(Value::String(text)) => text.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn set_total_tokens(&mut self, total: u64) {
        self.metadata
            .insert("total_tokens".to_string(), Value::from(total));
    }

    pub fn record_usage(&mut self, usage: Option<&Usage>) {
        if let Some(tokens) = usage.and_then(|usage| usage.total_tokens) {
            let total = self.total_tokens() + u64::from(tokens);
            self.set_total_tokens(total);
        }
    }
}

/// Row shown by `cllm conversations list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub model: String,
    pub message_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

/// Which setting chose the conversations directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSource {
    CliFlag,
    Environment,
    Cllmfile,
    CustomCllmPath,
    LocalProject,
    Home,
}

impl StoreSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::CliFlag => "--conversations-path CLI flag",
            Self::Environment => "CLLM_CONVERSATIONS_PATH environment variable",
            Self::Cllmfile => "conversations_path in Cllmfile.yml",
            Self::CustomCllmPath => "custom .cllm path",
            Self::LocalProject => "local .cllm directory",
            Self::Home => "home .cllm directory",
        }
    }
}

/// CLI > `CLLM_CONVERSATIONS_PATH` > Cllmfile > custom `.cllm` > `./.cllm` > `~/.cllm`.
pub fn resolve_store_dir(
    cli_path: Option<&Path>,
    env_path: Option<&str>,
    config_path: Option<&str>,
    locations: &ConfigLocations,
) -> (PathBuf, StoreSource) {
    let absolutize = |path: &Path| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            locations.cwd.join(path)
        }
    };

    if let Some(path) = cli_path {
        return (absolutize(path), StoreSource::CliFlag);
    }
    if let Some(path) = env_path.map(str::trim).filter(|path| !path.is_empty()) {
        return (absolutize(Path::new(path)), StoreSource::Environment);
    }
    if let Some(path) = config_path.map(str::trim).filter(|path| !path.is_empty()) {
        return (absolutize(Path::new(path)), StoreSource::Cllmfile);
    }
    if let Some(base) = &locations.base {
        return (base.join(CONVERSATIONS_DIR), StoreSource::CustomCllmPath);
    }
    let local = locations.local_cllm_dir();
    if local.is_dir() {
        return (local.join(CONVERSATIONS_DIR), StoreSource::LocalProject);
    }
    match locations.home_cllm_dir() {
        Some(home) => (home.join(CONVERSATIONS_DIR), StoreSource::Home),
        None => (local.join(CONVERSATIONS_DIR), StoreSource::LocalProject),
    }
}

pub fn validate_id(id: &str) -> Result<(), ConversationError> {
    if id.is_empty() {
        return Err(ConversationError::EmptyId);
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConversationError::InvalidId(id.to_string()));
    }
    Ok(())
}

pub fn generate_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("conv-{}", &hex[..8])
}

/// JSON files under one directory, one per conversation.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
    source: StoreSource,
}

impl ConversationStore {
    pub fn new(dir: PathBuf, source: StoreSource) -> Self {
        Self { dir, source }
    }

    pub fn from_env(
        cli_path: Option<&Path>,
        config_path: Option<&str>,
        locations: &ConfigLocations,
    ) -> Self {
        let env_path = env::var("CLLM_CONVERSATIONS_PATH").ok();
        let (dir, source) =
            resolve_store_dir(cli_path, env_path.as_deref(), config_path, locations);
        Self::new(dir, source)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source(&self) -> StoreSource {
        self.source
    }

    fn file_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// New unsaved conversation; the system message becomes the first message.
    pub fn create(
        &self,
        id: Option<&str>,
        model: &str,
        system_message: Option<&str>,
    ) -> Result<Conversation, ConversationError> {
        let id = match id {
            Some(id) => {
                validate_id(id)?;
                id.to_string()
            }
            None => generate_id(),
        };
        if self.exists(&id) {
            return Err(ConversationError::AlreadyExists(id));
        }

        let mut conversation = Conversation::new(id, model);
        if let Some(system) = system_message.filter(|text| !text.is_empty()) {
            conversation.set_system_message(system);
        }
        Ok(conversation)
    }

    pub fn exists(&self, id: &str) -> bool {
        validate_id(id).is_ok() && self.file_path(id).is_file()
    }

    pub fn load(&self, id: &str) -> Result<Conversation, ConversationError> {
        validate_id(id)?;
        let path = self.file_path(id);
        if !path.is_file() {
            return Err(ConversationError::NotFound(id.to_string()));
        }
        let raw = fs::read_to_string(&path).map_err(|source| ConversationError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|err| ConversationError::Malformed {
            id: id.to_string(),
            message: err.to_string(),
        })
    }

    /// Writes to a temporary file and renames it over the target.
    pub fn save(&self, conversation: &Conversation) -> Result<(), ConversationError> {
        validate_id(&conversation.id)?;
        let save_error = |source| ConversationError::Save {
            id: conversation.id.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(save_error)?;

        let path = self.file_path(&conversation.id);
        let temp = path.with_extension("tmp");
        let body = serde_json::to_string_pretty(conversation)
            .map_err(|err| save_error(std::io::Error::other(err)))?;

        if let Err(err) = fs::write(&temp, body).and_then(|_| fs::rename(&temp, &path)) {
            let _ = fs::remove_file(&temp);
            return Err(save_error(err));
        }
        tracing::debug!(id = %conversation.id, path = %path.display(), "conversation saved");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), ConversationError> {
        validate_id(id)?;
        let path = self.file_path(id);
        if !path.is_file() {
            return Err(ConversationError::NotFound(id.to_string()));
        }
        fs::remove_file(&path).map_err(|source| ConversationError::Io { path, source })
    }

    /// Summaries sorted by `updated_at`, newest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<ConversationSummary>, ConversationError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ConversationError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut summaries: Vec<ConversationSummary> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                let raw = fs::read_to_string(&path).ok()?;
                let data: Value = serde_json::from_str(&raw).ok()?;
                let text = |key: &str| {
                    data.get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                Some(ConversationSummary {
                    id: text("id"),
                    model: text("model"),
                    message_count: data
                        .get("messages")
                        .and_then(Value::as_array)
                        .map_or(0, Vec::len),
                    created_at: text("created_at"),
                    updated_at: text("updated_at"),
                })
            })
            .collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
