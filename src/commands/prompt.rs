use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Args;

use super::{CliError, read_piped_stdin};
use crate::config::ConfigLocations;
use crate::templates::{
    PromptInputs, TEMPLATES_DIR, TemplateContext, build_template_context, list_templates,
    parse_var_assignment, render_prompt_template,
};

pub const DEFAULT_TEMPLATE: &str = "default";

#[derive(Debug, Args, Clone, Default)]
pub struct PromptArgs {
    #[arg(help = "Input for the prompt (PROMPT_INPUT)")]
    pub input: Option<String>,
    #[arg(short = 't', long, default_value = DEFAULT_TEMPLATE, help = "Template name")]
    pub template: String,
    #[arg(short = 'l', long, help = "List available templates")]
    pub list: bool,
    #[arg(long = "prompt-role", visible_alias = "pr", help = "Role prompt (PROMPT_ROLE)")]
    pub role: Option<String>,
    #[arg(
        long = "prompt-instructions",
        visible_alias = "pi",
        help = "Instructions prompt (PROMPT_INSTRUCTIONS)"
    )]
    pub instructions: Option<String>,
    #[arg(long = "prompt-context", visible_alias = "pc", help = "Context prompt (PROMPT_CONTEXT)")]
    pub context: Option<String>,
    #[arg(long = "prompt-output", visible_alias = "po", help = "Output prompt (PROMPT_OUTPUT)")]
    pub output: Option<String>,
    #[arg(long = "prompt-example", visible_alias = "pe", help = "Example prompt (PROMPT_EXAMPLE)")]
    pub example: Option<String>,
    #[arg(long = "cllm-dir", value_name = "PATH", help = "Path to the .cllm directory")]
    pub cllm_dir: Option<PathBuf>,
    #[arg(long = "var", value_name = "KEY=VALUE", help = "Extra template variable (repeatable)")]
    pub vars: Vec<String>,
}

fn render_list(cllm_dir: &Path) -> String {
    let names = list_templates(&cllm_dir.join(TEMPLATES_DIR));
    let mut lines = vec!["Available templates:".to_string()];
    if names.is_empty() {
        lines.push(format!("  (none in {})", cllm_dir.join(TEMPLATES_DIR).display()));
    }
    lines.extend(names.into_iter().map(|name| format!("  - {name}")));
    lines.join("\n")
}

pub fn run_with(
    args: PromptArgs,
    cllm_dir: &Path,
    stdin: Option<String>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let text = if args.list {
        render_list(cllm_dir)
    } else {
        let mut cli_vars = TemplateContext::new();
        for raw in &args.vars {
            let (name, value) = parse_var_assignment(raw)?;
            cli_vars.insert(name, value);
        }
        let variables = build_template_context(&cli_vars, &Default::default(), &HashMap::new())?;
        let inputs = PromptInputs {
            input: args.input,
            stdin: stdin.map(|text| text.trim().to_string()),
            role: args.role,
            instructions: args.instructions,
            context: args.context,
            output: args.output,
            example: args.example,
        };
        render_prompt_template(&args.template, cllm_dir, &inputs.into_context(&variables))?
    };
    writeln!(out, "{text}").map_err(CliError::io("write output"))
}

pub fn run(args: PromptArgs) -> Result<(), CliError> {
    let cllm_dir = match &args.cllm_dir {
        Some(dir) => dir.clone(),
        None => ConfigLocations::from_env(None)?.resolve_cllm_dir(),
    };
    let stdin = if args.list { None } else { read_piped_stdin()? };
    run_with(args, &cllm_dir, stdin, &mut io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_template(dir: &Path, name: &str, body: &str) {
        let path = dir.join(TEMPLATES_DIR).join(format!("{name}.tpl"));
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, body).expect("write template");
    }

    #[test]
    fn renders_prompt_fields_and_stdin() {
        let dir = tempdir().expect("tempdir");
        write_template(
            dir.path(),
            "default",
            "{% if PROMPT_ROLE %}You are {{ PROMPT_ROLE }}.\n{% endif %}{{ PROMPT_INPUT }}\n{{ PROMPT_STDIN }}",
        );

        let args = PromptArgs {
            input: Some("Summarize:".to_string()),
            template: DEFAULT_TEMPLATE.to_string(),
            role: Some("an editor".to_string()),
            ..PromptArgs::default()
        };
        let mut out = Vec::new();
        run_with(args, dir.path(), Some("the text\n".to_string()), &mut out).expect("render");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "You are an editor.\nSummarize:\nthe text\n"
        );
    }

    #[test]
    fn lists_nested_templates() {
        let dir = tempdir().expect("tempdir");
        write_template(dir.path(), "default", "x");
        write_template(dir.path(), "code/review", "y");

        let args = PromptArgs {
            list: true,
            ..PromptArgs::default()
        };
        let mut out = Vec::new();
        run_with(args, dir.path(), None, &mut out).expect("list");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "Available templates:\n  - code/review\n  - default\n"
        );
    }

    #[test]
    fn unknown_template_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let args = PromptArgs {
            template: "missing".to_string(),
            ..PromptArgs::default()
        };
        let err = run_with(args, dir.path(), None, &mut Vec::new()).expect_err("missing");
        assert!(err.to_string().starts_with("Template error: Template 'missing' not found"));
    }
}
