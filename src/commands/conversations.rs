use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Subcommand};

use super::CliError;
use crate::config::ConfigLocations;
use crate::conversation::{Conversation, ConversationStore, ConversationSummary};

#[derive(Debug, Args, Clone)]
pub struct ConversationsArgs {
    #[arg(
        long = "conversations-path",
        global = true,
        value_name = "PATH",
        help = "Directory for conversation files"
    )]
    pub conversations_path: Option<PathBuf>,
    #[arg(long = "cllm-path", global = true, value_name = "PATH", help = "Custom .cllm directory")]
    pub cllm_path: Option<PathBuf>,
    #[command(subcommand)]
    command: ConversationsCommand,
}

#[derive(Debug, Subcommand, Clone)]
enum ConversationsCommand {
    #[command(about = "List stored conversations, newest first")]
    List,
    #[command(about = "Print a conversation as JSON")]
    Show { id: String },
    #[command(about = "Delete a conversation")]
    Delete { id: String },
}

pub fn render_list(store: &ConversationStore, summaries: &[ConversationSummary]) -> String {
    if summaries.is_empty() {
        return format!("No conversations found in {}", store.dir().display());
    }
    let mut lines = vec![format!(
        "Conversations in {} ({}):",
        store.dir().display(),
        store.source().label()
    )];
    for summary in summaries {
        lines.push(format!(
            "  {}  {}  {} messages  updated {}",
            summary.id, summary.model, summary.message_count, summary.updated_at
        ));
    }
    lines.join("\n")
}

fn render_conversation(conversation: &Conversation) -> Result<String, CliError> {
    serde_json::to_string_pretty(conversation).map_err(|err| CliError::Usage(err.to_string()))
}

pub fn run_with(
    args: ConversationsArgs,
    store: &ConversationStore,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let text = match args.command {
        ConversationsCommand::List => render_list(store, &store.list()?),
        ConversationsCommand::Show { id } => render_conversation(&store.load(&id)?)?,
        ConversationsCommand::Delete { id } => {
            store.delete(&id)?;
            format!("Deleted conversation '{id}'")
        }
    };
    writeln!(out, "{text}").map_err(CliError::io("write output"))
}

pub fn run(args: ConversationsArgs) -> Result<(), CliError> {
    let locations = ConfigLocations::from_env(args.cllm_path.as_deref())?;
    let config = locations.load_config(None)?;
    let config_path = config.get("conversations_path").and_then(|value| value.as_str());
    let store = ConversationStore::from_env(args.conversations_path.as_deref(), config_path, &locations);
    run_with(args, &store, &mut io::stdout())
}
