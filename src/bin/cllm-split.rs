use std::process;

use clap::Parser;
use cllm::LONG_VERSION;
use cllm::commands::LogArgs;
use cllm::commands::split::{self, SplitArgs};

#[derive(Debug, Parser)]
#[command(
    name = "cllm-split",
    version,
    long_version = LONG_VERSION,
    about = "Split text or JSON documents into chunk documents"
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(flatten)]
    args: SplitArgs,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = cli.log.init().and_then(|()| split::run(cli.args)) {
        eprintln!("{err}");
        process::exit(1);
    }
}
