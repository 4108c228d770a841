use std::io::{self, Write};

use clap::Args;

use super::{CliError, read_stdin};
use crate::toolkit::repeat::{cllm_program, parse_items, repeat};

#[derive(Debug, Args, Clone, Default)]
pub struct RepeatArgs {
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "CLLM_ARGS",
        help = "Arguments passed to every cllm run"
    )]
    pub args: Vec<String>,
}

pub async fn run(args: RepeatArgs) -> Result<(), CliError> {
    let items = parse_items(&read_stdin()?)?;
    let program = cllm_program();
    tracing::debug!(%program, items = items.len(), "repeating");
    let results = repeat(&program, &args.args, &items).await;
    let json = serde_json::to_string(&results).map_err(|err| CliError::Usage(err.to_string()))?;
    writeln!(io::stdout(), "{json}").map_err(CliError::io("write output"))
}
