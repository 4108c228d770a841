//! Command entry points shared by the `cllm` binary and the toolkit binaries.

pub mod ask;
pub mod config;
pub mod conversations;
pub mod image;
pub mod init;
pub mod load;
pub mod prompt;
pub mod repeat;
pub mod split;
pub mod transcribe;
pub mod vector;

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::Args;
use thiserror::Error;

use crate::agent::AgentError;
use crate::config::ConfigError;
use crate::context::ContextError;
use crate::conversation::ConversationError;
use crate::init::InitError;
use crate::llm::ProviderError;
use crate::llm::tools::ImageError;
use crate::logging::{self, LogSettings};
use crate::schema::SchemaError;
use crate::templates::TemplateError;
use crate::toolkit::ToolkitError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Context error: {0}")]
    Context(#[from] ContextError),
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
    #[error("{}", schema_message(.0))]
    Schema(#[from] SchemaError),
    #[error("Error: {0}")]
    Conversation(#[from] ConversationError),
    #[error("Error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Error: {0}")]
    Agent(#[from] AgentError),
    #[error("Error: {0}")]
    Image(#[from] ImageError),
    #[error("Error: {0}")]
    Init(#[from] InitError),
    #[error("Error: {0}")]
    Toolkit(#[from] ToolkitError),
    #[error("Error: {0}")]
    Usage(String),
    #[error("Error: failed to {action}: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: io::Error,
    },
}

fn schema_message(err: &SchemaError) -> String {
    match err {
        SchemaError::Missing => format!("Error: {err}"),
        _ => format!("Schema error: {err}"),
    }
}

impl CliError {
    pub(crate) fn io(action: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| CliError::Io { action, source }
    }
}

/// Logging switches accepted by every binary.
#[derive(Debug, Args, Clone, Default)]
pub struct LogArgs {
    #[arg(
        long,
        global = true,
        help = "Enable debug logging (may include sensitive data)"
    )]
    pub debug: bool,
    #[arg(long = "json-logs", global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,
    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        help = "Write logs to PATH instead of stderr"
    )]
    pub log_file: Option<PathBuf>,
}

impl LogArgs {
    pub fn settings(&self) -> LogSettings {
        LogSettings {
            debug: self.debug,
            json: self.json_logs,
            log_file: self.log_file.clone(),
        }
    }

    /// Installs logging for commands that do not read a Cllmfile.
    pub fn init(&self) -> Result<(), CliError> {
        let settings = LogSettings::resolve(self.settings(), LogSettings::default());
        logging::init(&settings).map_err(CliError::Usage)
    }
}

/// Reads all of stdin, or `None` when stdin is an interactive terminal.
pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut buffer = String::new();
    stdin
        .read_to_string(&mut buffer)
        .map_err(CliError::io("read stdin"))?;
    Ok(Some(buffer))
}

pub fn read_stdin() -> Result<String, CliError> {
    Ok(read_piped_stdin()?.unwrap_or_default())
}
