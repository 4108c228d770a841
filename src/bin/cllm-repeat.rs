use std::process;

use clap::Parser;
use cllm::LONG_VERSION;
use cllm::commands::LogArgs;
use cllm::commands::repeat::{self, RepeatArgs};

#[derive(Debug, Parser)]
#[command(
    name = "cllm-repeat",
    version,
    long_version = LONG_VERSION,
    about = "Run cllm once per item of a JSON array read on stdin"
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(flatten)]
    args: RepeatArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.log.init() {
        Ok(()) => repeat::run(cli.args).await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
