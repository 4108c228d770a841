use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde_json::Value;

use super::CliError;
use crate::agent::CommandPolicy;
use crate::config::{Cllmfile, ConfigLocations};
use crate::context::parse_context_commands;

#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand, Clone)]
enum ConfigSubcommand {
    #[command(about = "Load and validate the effective Cllmfile configuration")]
    Check {
        #[arg(short = 'c', long, value_name = "NAME", help = "Named configuration to check")]
        config: Option<String>,
        #[arg(long = "cllm-path", value_name = "PATH", help = "Custom .cllm directory")]
        cllm_path: Option<PathBuf>,
    },
}

/// Loads the configuration and checks the sections that are otherwise only
/// parsed lazily. Returns the files that were read.
pub fn check(locations: &ConfigLocations, name: Option<&str>) -> Result<Vec<String>, CliError> {
    let map = locations.load_config(name)?;
    let config = Cllmfile::from_map(&map)?;
    parse_context_commands(Some(&Value::Array(config.context_commands.clone())))?;
    CommandPolicy::from_config(config.dynamic_commands.as_ref())?;
    Ok(locations.config_sources(name))
}

fn write_report(sources: &[String], out: &mut dyn Write) -> io::Result<()> {
    if sources.is_empty() {
        return writeln!(out, "config OK: no configuration files found (defaults apply)");
    }
    writeln!(out, "config OK:")?;
    for source in sources {
        writeln!(out, "  - {source}")?;
    }
    Ok(())
}

pub fn run(args: ConfigArgs) -> Result<(), CliError> {
    match args.command {
        ConfigSubcommand::Check { config, cllm_path } => {
            let locations = ConfigLocations::from_env(cllm_path.as_deref())?;
            let sources = check(&locations, config.as_deref())?;
            write_report(&sources, &mut io::stdout()).map_err(CliError::io("write output"))
        }
    }
}
