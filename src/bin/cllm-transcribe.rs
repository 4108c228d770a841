use std::process;

use clap::Parser;
use cllm::LONG_VERSION;
use cllm::commands::LogArgs;
use cllm::commands::transcribe::{self, TranscribeArgs};

#[derive(Debug, Parser)]
#[command(
    name = "cllm-transcribe",
    version,
    long_version = LONG_VERSION,
    about = "Transcribe an audio file to text"
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(flatten)]
    args: TranscribeArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.log.init() {
        Ok(()) => transcribe::run(cli.args).await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
