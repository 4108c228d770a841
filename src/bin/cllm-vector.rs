use std::process;

use clap::Parser;
use cllm::LONG_VERSION;
use cllm::commands::LogArgs;
use cllm::commands::vector::{self, VectorArgs};

#[derive(Debug, Parser)]
#[command(
    name = "cllm-vector",
    version,
    long_version = LONG_VERSION,
    about = "Save documents to or search a local vector index"
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(flatten)]
    args: VectorArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.log.init() {
        Ok(()) => vector::run(cli.args).await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
