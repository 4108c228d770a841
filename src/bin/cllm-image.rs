use std::process;

use clap::Parser;
use cllm::LONG_VERSION;
use cllm::commands::LogArgs;
use cllm::commands::image::{self, ImageArgs};

#[derive(Debug, Parser)]
#[command(
    name = "cllm-image",
    version,
    long_version = LONG_VERSION,
    about = "Generate images from prompts read on stdin"
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(flatten)]
    args: ImageArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.log.init() {
        Ok(()) => image::run(cli.args).await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
