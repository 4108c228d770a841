use std::env;
use std::io;
use std::path::PathBuf;

use clap::Args;

use super::CliError;
use crate::init::{self, InitRequest};

#[derive(Debug, Args, Clone, Default)]
pub struct InitArgs {
    #[arg(long, help = "Initialize ~/.cllm")]
    pub global: bool,
    #[arg(long, help = "Initialize ./.cllm (default)")]
    pub local: bool,
    #[arg(long = "cllm-path", value_name = "PATH", help = "Initialize a custom .cllm directory")]
    pub cllm_path: Option<PathBuf>,
    #[arg(long, value_name = "NAME", help = "Start from a bundled Cllmfile template")]
    pub template: Option<String>,
    #[arg(long, help = "Overwrite existing files")]
    pub force: bool,
    #[arg(long = "list-templates", help = "List bundled templates and exit")]
    pub list_templates: bool,
}

impl InitArgs {
    fn request(&self) -> InitRequest {
        InitRequest {
            global: self.global,
            local: self.local,
            cllm_path: self.cllm_path.clone(),
            template: self.template.clone(),
            force: self.force,
        }
    }
}

pub fn run(args: InitArgs) -> Result<(), CliError> {
    if args.list_templates {
        print!("{}", init::render_template_list());
        return Ok(());
    }

    let cwd = env::current_dir().map_err(CliError::io("read current directory"))?;
    let home = dirs::home_dir();
    let mut stdout = io::stdout().lock();
    init::initialize(&args.request(), home.as_deref(), &cwd, &mut stdout)?;
    Ok(())
}
