use std::process;

use clap::Parser;
use cllm::LONG_VERSION;
use cllm::commands::LogArgs;
use cllm::commands::load::{self, LoadArgs};

#[derive(Debug, Parser)]
#[command(
    name = "cllm-load",
    version,
    long_version = LONG_VERSION,
    about = "Load files or a directory into chunk documents"
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(flatten)]
    args: LoadArgs,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = cli.log.init().and_then(|()| load::run(cli.args)) {
        eprintln!("{err}");
        process::exit(1);
    }
}
