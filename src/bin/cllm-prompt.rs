use std::process;

use clap::Parser;
use cllm::LONG_VERSION;
use cllm::commands::LogArgs;
use cllm::commands::prompt::{self, PromptArgs};

#[derive(Debug, Parser)]
#[command(
    name = "cllm-prompt",
    version,
    long_version = LONG_VERSION,
    about = "Render a prompt template from the .cllm templates directory"
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(flatten)]
    args: PromptArgs,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = cli.log.init().and_then(|()| prompt::run(cli.args)) {
        eprintln!("{err}");
        process::exit(1);
    }
}
