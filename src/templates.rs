//! Prompt and command templating.
//!
//! Commands and named prompt templates are rendered with a strict-undefined
//! minijinja environment. Variables resolve CLI > environment > Cllmfile.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde_json::{Map, Value};
use thiserror::Error;

pub const TEMPLATES_DIR: &str = "templates";
pub const TEMPLATE_EXTENSION: &str = "tpl";

/// Resolved template variables.
pub type TemplateContext = Map<String, Value>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(
        "Required variable '{0}' not provided via --var flag or environment\n\n  Declare it in your command:\n    cllm ... --var {0}=value\n\n  Or set it as environment variable:\n    export {0}=value"
    )]
    MissingRequired(String),
    #[error(
        "Template syntax error in {target}: {message} (line {line})\n\n  Check your template syntax:\n    - Variables: {{{{ VAR_NAME }}}}\n    - Conditionals: {{% if CONDITION %}}...{{% endif %}}\n    - Filters: {{{{ VAR | filter }}}}"
    )]
    Syntax {
        target: &'static str,
        message: String,
        line: usize,
    },
    #[error(
        "Undefined variable in {target}: {message}\n\n  Add missing variable:\n    cllm ... --var VARIABLE_NAME=value\n\n  Or declare it in Cllmfile.yml:\n    variables:\n      VARIABLE_NAME: default_value"
    )]
    Undefined {
        target: &'static str,
        message: String,
    },
    #[error("Error rendering template: {0}")]
    Render(String),
    #[error("Template '{name}' not found in {}", dir.display())]
    NotFound { name: String, dir: PathBuf },
    #[error("Invalid --var format: '{0}'. Expected KEY=VALUE")]
    InvalidAssignment(String),
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_filter("shellquote", shellquote_filter);
    env
}

fn shellquote_filter(value: minijinja::Value) -> String {
    match value.as_str() {
        Some(text) => shell_quote(text),
        None => shell_quote(&value.to_string()),
    }
}

/// POSIX single-quote escaping: safe strings pass through untouched.
pub fn shell_quote(text: &str) -> String {
    if text.is_empty() {
        return "''".to_string();
    }
    let safe = text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        return text.to_string();
    }
    format!("'{}'", text.replace('\'', "'\"'\"'"))
}

fn map_render_error(err: minijinja::Error, target: &'static str) -> TemplateError {
    let message = err
        .detail()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    match err.kind() {
        ErrorKind::SyntaxError => TemplateError::Syntax {
            target,
            message,
            line: err.line().unwrap_or(0),
        },
        ErrorKind::UndefinedError => TemplateError::Undefined { target, message },
        _ => TemplateError::Render(err.to_string()),
    }
}

/// Best-effort conversion of string values to booleans or numbers.
pub fn coerce_scalar(value: &str) -> Value {
    match value.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(number) = value.parse::<i64>() {
            return Value::from(number);
        }
    }

    let candidate = value.replacen('.', "", 1).replacen('-', "", 1);
    let numeric = !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit());
    if numeric && value.matches('.').count() <= 1 {
        if let Some(number) = value
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            return Value::Number(number);
        }
    }

    Value::String(value.to_string())
}

/// Parses `KEY=VALUE` from `--var`, coercing the value.
pub fn parse_var_assignment(raw: &str) -> Result<(String, Value), TemplateError> {
    let (key, value) = raw
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| TemplateError::InvalidAssignment(raw.to_string()))?;
    Ok((key.trim().to_string(), coerce_scalar(value)))
}

/// Resolves variables. A `null` config value marks a required variable.
/// Environment values only apply to variables the config declares.
pub fn build_template_context(
    cli_vars: &TemplateContext,
    config_vars: &Map<String, Value>,
    env_vars: &HashMap<String, String>,
) -> Result<TemplateContext, TemplateError> {
    let mut context = TemplateContext::new();

    for (name, config_value) in config_vars {
        let resolved = if let Some(cli) = cli_vars.get(name) {
            cli.clone()
        } else if let Some(env_value) = env_vars.get(name) {
            coerce_scalar(env_value)
        } else if config_value.is_null() {
            return Err(TemplateError::MissingRequired(name.clone()));
        } else {
            config_value.clone()
        };
        context.insert(name.clone(), resolved);
    }

    for (name, value) in cli_vars {
        context.insert(name.clone(), value.clone());
    }

    Ok(context)
}

/// Renders a context command and trims surrounding whitespace.
pub fn render_command_template(
    template: &str,
    context: &TemplateContext,
) -> Result<String, TemplateError> {
    let env = environment();
    env.render_str(template, context)
        .map(|rendered| rendered.trim().to_string())
        .map_err(|err| map_render_error(err, "command template"))
}

fn is_safe_template_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Renders `<cllm_dir>/templates/<name>.tpl`. Templates may `include` siblings.
pub fn render_prompt_template(
    name: &str,
    cllm_dir: &Path,
    context: &TemplateContext,
) -> Result<String, TemplateError> {
    let dir = cllm_dir.join(TEMPLATES_DIR);
    let file_name = format!("{name}.{TEMPLATE_EXTENSION}");
    if !is_safe_template_name(name) || !dir.join(&file_name).is_file() {
        return Err(TemplateError::NotFound {
            name: name.to_string(),
            dir,
        });
    }

    let mut env = environment();
    let loader_dir = dir.clone();
    env.set_loader(move |requested: &str| {
        if !is_safe_template_name(requested) {
            return Ok(None);
        }
        match fs::read_to_string(loader_dir.join(requested)) {
            Ok(source) => Ok(Some(source)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("could not read template {requested}: {err}"),
            )),
        }
    });

    let template = env
        .get_template(&file_name)
        .map_err(|err| map_render_error(err, "prompt template"))?;
    template
        .render(context)
        .map_err(|err| map_render_error(err, "prompt template"))
}

/// Values exposed to prompt templates under the `PROMPT_*` names.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    pub input: Option<String>,
    pub stdin: Option<String>,
    pub role: Option<String>,
    pub instructions: Option<String>,
    pub context: Option<String>,
    pub output: Option<String>,
    pub example: Option<String>,
}

impl PromptInputs {
    /// Adds the `PROMPT_*` keys (null when absent) on top of `variables`.
    pub fn into_context(self, variables: &TemplateContext) -> TemplateContext {
        let mut context = variables.clone();
        let entries = [
            ("PROMPT_INPUT", self.input),
            ("PROMPT_STDIN", self.stdin),
            ("PROMPT_ROLE", self.role),
            ("PROMPT_INSTRUCTIONS", self.instructions),
            ("PROMPT_CONTEXT", self.context),
            ("PROMPT_OUTPUT", self.output),
            ("PROMPT_EXAMPLE", self.example),
        ];
        for (key, value) in entries {
            context.insert(key.to_string(), value.map(Value::String).unwrap_or(Value::Null));
        }
        context
    }
}

/// Template names under `dir`, relative and without the extension.
pub fn list_templates(dir: &Path) -> Vec<String> {
    let pattern = dir.join("**").join(format!("*.{TEMPLATE_EXTENSION}"));
    let Ok(paths) = glob::glob(&pattern.to_string_lossy()) else {
        return Vec::new();
    };

    let mut names: Vec<String> = paths
        .filter_map(Result::ok)
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let relative = path.strip_prefix(dir).ok()?.with_extension("");
            Some(relative.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    names.sort();
    names
}

/// Sorted `- name: value` lines used in error messages.
pub fn available_variables_description(context: &TemplateContext) -> String {
    if context.is_empty() {
        return "  No variables defined".to_string();
    }

    let mut names: Vec<&String> = context.keys().collect();
    names.sort();
    let mut lines = vec!["  Available variables:".to_string()];
    for name in names {
        let value = match &context[name.as_str()] {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let value = if value.chars().count() > 50 {
            let head: String = value.chars().take(47).collect();
            format!("{head}...")
        } else {
            value
        };
        lines.push(format!("    - {name}: {value}"));
    }
    lines.join("\n")
}
