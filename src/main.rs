use std::io;
use std::process;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};
use cllm::LONG_VERSION;
use cllm::commands::ask::{self, AskArgs};
use cllm::commands::config::{self, ConfigArgs};
use cllm::commands::conversations::{self, ConversationsArgs};
use cllm::commands::init::{self, InitArgs};
use cllm::commands::{CliError, LogArgs};

const ROOT_HELP_EXAMPLES: &str = "Examples:\n  cllm \"Explain retries in one sentence\"\n  git diff | cllm --config code-review\n  cllm --exec \"git status\" \"What should I commit next?\"\n  cllm --json-schema-file schemas/person.json \"Extract: Ada Lovelace, 36\"\n  cllm --conversation bugfix \"Where is the bug?\"\n  cllm init --template summarize\n  cllm completion bash > ~/.local/share/bash-completion/completions/cllm";

#[derive(Debug, Parser)]
#[command(
    name = "cllm",
    version,
    long_version = LONG_VERSION,
    about = "Command-line interface for chaining LLM calls in bash",
    after_help = ROOT_HELP_EXAMPLES,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(flatten)]
    ask: AskArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create a .cllm directory with a starter Cllmfile")]
    Init(InitArgs),
    #[command(about = "List, show or delete stored conversations")]
    Conversations(ConversationsArgs),
    #[command(about = "Check local configuration")]
    Config(ConfigArgs),
    #[command(about = "Generate shell completion script")]
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn print_completion(shell: CompletionShell) {
    let mut cmd = Cli::command();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, "cllm", &mut io::stdout()),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, "cllm", &mut io::stdout()),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, "cllm", &mut io::stdout()),
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let Some(command) = cli.command else {
        return ask::run(cli.ask, &cli.log).await;
    };
    cli.log.init()?;
    match command {
        Commands::Init(args) => init::run(args),
        Commands::Conversations(args) => conversations::run(args),
        Commands::Config(args) => config::run(args),
        Commands::Completion { shell } => {
            print_completion(shell);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}
