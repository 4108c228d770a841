//! Shell command execution and context-block injection.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;

use crate::templates::{
    TemplateContext, TemplateError, available_variables_description, render_command_template,
};

pub const DEFAULT_CONTEXT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context_commands must be a list")]
    NotAList,
    #[error("context_commands[{0}] must be a dictionary")]
    NotAMapping(usize),
    #[error("context_commands[{index}]: ContextCommand missing required field: '{field}'")]
    MissingField { index: usize, field: &'static str },
    #[error("context_commands[{index}]: {message}")]
    InvalidField { index: usize, message: String },
    #[error("In context command '{name}': {source}{available}")]
    Template {
        name: String,
        #[source]
        source: TemplateError,
        available: String,
    },
    #[error("Context command '{name}' failed: {message}")]
    CommandFailed { name: String, message: String },
}

/// How a failed context command is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Include an error block in the prompt.
    #[default]
    Warn,
    /// Drop the command's output.
    Ignore,
    /// Abort before calling the model.
    Fail,
}

impl TryFrom<&str> for FailureMode {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "ignore" => Ok(Self::Ignore),
            "fail" => Ok(Self::Fail),
            _ => Err(format!(
                "Invalid on_failure value: '{value}'. Must be one of: warn, ignore, fail"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextCommand {
    pub name: String,
    pub command: String,
    pub on_failure: FailureMode,
    pub timeout_secs: u64,
}

impl ContextCommand {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            on_failure: FailureMode::default(),
            timeout_secs: DEFAULT_CONTEXT_TIMEOUT_SECS,
        }
    }

    fn from_value(index: usize, value: &Value) -> Result<Self, ContextError> {
        let map = value.as_object().ok_or(ContextError::NotAMapping(index))?;
        let text_field = |field: &'static str| -> Result<String, ContextError> {
            match map.get(field) {
                None | Some(Value::Null) => Err(ContextError::MissingField { index, field }),
                Some(Value::String(text)) => Ok(text.clone()),
                Some(other) => Ok(other.to_string()),
            }
        };

        let name = text_field("name")?;
        let command = text_field("command")?;
        let on_failure = match map.get("on_failure") {
            None | Some(Value::Null) => FailureMode::default(),
            Some(Value::String(text)) => FailureMode::try_from(text.as_str())
                .map_err(|message| ContextError::InvalidField { index, message })?,
            Some(other) => {
                return Err(ContextError::InvalidField {
                    index,
                    message: format!(
                        "Invalid on_failure value: '{other}'. Must be one of: warn, ignore, fail"
                    ),
                });
            }
        };
        let timeout_secs = match map.get("timeout") {
            None | Some(Value::Null) => DEFAULT_CONTEXT_TIMEOUT_SECS,
            Some(value) => value.as_u64().ok_or_else(|| ContextError::InvalidField {
                index,
                message: format!("timeout must be a positive integer, got {value}"),
            })?,
        };

        Ok(Self {
            name,
            command,
            on_failure,
            timeout_secs,
        })
    }
}

/// Parses the `context_commands` list from a Cllmfile.
pub fn parse_context_commands(value: Option<&Value>) -> Result<Vec<ContextCommand>, ContextError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = value.as_array().ok_or(ContextError::NotAList)?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| ContextCommand::from_value(index, item))
        .collect()
}

/// Commands passed with `--exec`, labelled `CLI Command N`.
pub fn cli_commands(commands: &[String]) -> Vec<ContextCommand> {
    commands
        .iter()
        .enumerate()
        .map(|(i, command)| ContextCommand::new(format!("CLI Command {}", i + 1), command.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub name: String,
    /// Trimmed stdout followed by stderr.
    pub output: String,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Runs `command` through `sh -c`, killing it once `timeout` elapses.
pub async fn run_shell(
    name: &str,
    command: &str,
    timeout: Duration,
    cwd: Option<&Path>,
) -> CommandResult {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    let failure = |message: String| CommandResult {
        name: name.to_string(),
        output: String::new(),
        success: false,
        error_message: Some(message),
    };

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => return failure(format!("Execution error: {err}")),
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return failure(format!("Execution error: {err}")),
        Err(_) => {
            tracing::warn!(%name, timeout_secs = timeout.as_secs(), "command timed out");
            return failure(format!(
                "Command timed out after {} seconds",
                timeout.as_secs()
            ));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut combined = stdout.into_owned();
    if !stderr.trim().is_empty() {
        combined.push('\n');
        combined.push_str(&stderr);
    }
    let combined = combined.trim().to_string();

    tracing::debug!(%name, status = ?output.status.code(), bytes = combined.len(), "command finished");
    if output.status.success() {
        CommandResult {
            name: name.to_string(),
            output: combined,
            success: true,
            error_message: None,
        }
    } else {
        let code = output
            .status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        CommandResult {
            name: name.to_string(),
            output: combined,
            success: false,
            error_message: Some(format!("Command exited with code {code}")),
        }
    }
}

/// Runs all commands concurrently; results keep the input order.
pub async fn execute_commands(commands: &[ContextCommand], cwd: Option<&Path>) -> Vec<CommandResult> {
    join_all(commands.iter().map(|cmd| {
        run_shell(
            &cmd.name,
            &cmd.command,
            Duration::from_secs(cmd.timeout_secs),
            cwd,
        )
    }))
    .await
}

pub fn format_context_block(result: &CommandResult) -> String {
    let body = if result.output.is_empty() {
        "(no output)"
    } else {
        result.output.as_str()
    };
    format!("--- Context: {} ---\n{body}\n--- End Context ---", result.name)
}

pub fn format_error_block(result: &CommandResult) -> String {
    let error = result.error_message.as_deref().unwrap_or("Unknown error");
    let partial = if result.output.is_empty() {
        String::new()
    } else {
        format!("\nPartial output:\n{}", result.output)
    };
    format!(
        "--- Context Error: {} ---\n{error}{partial}\n--- End Context ---",
        result.name
    )
}

/// Renders, runs and prepends context blocks to `prompt`.
pub async fn inject_context(
    prompt: &str,
    commands: &[ContextCommand],
    template_context: &TemplateContext,
    cwd: Option<PathBuf>,
) -> Result<String, ContextError> {
    if commands.is_empty() {
        return Ok(prompt.to_string());
    }

    let mut rendered = Vec::with_capacity(commands.len());
    for cmd in commands {
        let command = render_command_template(&cmd.command, template_context).map_err(|source| {
            ContextError::Template {
                name: cmd.name.clone(),
                source,
                available: format!(
                    "\n\n{}",
                    available_variables_description(template_context)
                ),
            }
        })?;
        rendered.push(ContextCommand {
            command,
            ..cmd.clone()
        });
    }

    let results = execute_commands(&rendered, cwd.as_deref()).await;

    let mut blocks = Vec::new();
    for (cmd, result) in rendered.iter().zip(&results) {
        if result.success {
            blocks.push(format_context_block(result));
            continue;
        }
        match cmd.on_failure {
            FailureMode::Fail => {
                return Err(ContextError::CommandFailed {
                    name: cmd.name.clone(),
                    message: result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string()),
                });
            }
            FailureMode::Warn => blocks.push(format_error_block(result)),
            FailureMode::Ignore => {
                tracing::debug!(name = %cmd.name, "ignoring failed context command");
            }
        }
    }

    if blocks.is_empty() {
        return Ok(prompt.to_string());
    }
    Ok(format!("{}\n\n{prompt}", blocks.join("\n\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_commands_with_defaults() {
        let value = json!([
            { "name": "Date", "command": "date" },
            { "name": "Status", "command": "git status", "on_failure": "FAIL", "timeout": 3 }
        ]);
        let commands = parse_context_commands(Some(&value)).expect("valid commands");
        assert_eq!(commands[0].on_failure, FailureMode::Warn);
        assert_eq!(commands[0].timeout_secs, 10);
        assert_eq!(commands[1].on_failure, FailureMode::Fail);
        assert_eq!(commands[1].timeout_secs, 3);
    }

    #[test]
    fn parse_errors_name_the_index() {
        let missing = json!([{ "name": "ok", "command": "true" }, { "name": "x" }]);
        assert_eq!(
            parse_context_commands(Some(&missing))
                .expect_err("missing command")
                .to_string(),
            "context_commands[1]: ContextCommand missing required field: 'command'"
        );

        let bad_mode = json!([{ "name": "x", "command": "true", "on_failure": "explode" }]);
        assert_eq!(
            parse_context_commands(Some(&bad_mode))
                .expect_err("bad mode")
                .to_string(),
            "context_commands[0]: Invalid on_failure value: 'explode'. Must be one of: warn, ignore, fail"
        );

        assert!(matches!(
            parse_context_commands(Some(&json!({ "name": "x" }))),
            Err(ContextError::NotAList)
        ));
    }

    #[test]
    fn cli_commands_are_numbered() {
        let commands = cli_commands(&["ls".to_string(), "pwd".to_string()]);
        assert_eq!(commands[0].name, "CLI Command 1");
        assert_eq!(commands[1].name, "CLI Command 2");
        assert_eq!(commands[1].command, "pwd");
    }

    #[test]
    fn blocks_use_fixed_markers() {
        let ok = CommandResult {
            name: "Date".into(),
            output: String::new(),
            success: true,
            error_message: None,
        };
        assert_eq!(
            format_context_block(&ok),
            "--- Context: Date ---\n(no output)\n--- End Context ---"
        );

        let failed = CommandResult {
            name: "Tests".into(),
            output: "1 failed".into(),
            success: false,
            error_message: Some("Command exited with code 1".into()),
        };
        assert_eq!(
            format_error_block(&failed),
            "--- Context Error: Tests ---\nCommand exited with code 1\nPartial output:\n1 failed\n--- End Context ---"
        );
    }

    #[tokio::test]
    async fn shell_output_combines_streams() {
        let result = run_shell(
            "combo",
            "echo out; echo err 1>&2",
            Duration::from_secs(5),
            None,
        )
        .await;
        assert!(result.success);
        assert_eq!(result.output, "out\n\nerr");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let result = run_shell("fail", "echo partial; exit 3", Duration::from_secs(5), None).await;
        assert!(!result.success);
        assert_eq!(result.output, "partial");
        assert_eq!(
            result.error_message.as_deref(),
            Some("Command exited with code 3")
        );
    }

    #[tokio::test]
    async fn slow_commands_time_out() {
        let result = run_shell("slow", "sleep 5", Duration::from_secs(1), None).await;
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Command timed out after 1 seconds")
        );
    }

    #[tokio::test]
    async fn inject_context_prepends_blocks_in_order() {
        let mut commands = vec![
            ContextCommand::new("First", "echo {{ WORD }}"),
            ContextCommand::new("Second", "exit 1"),
            ContextCommand::new("Third", "exit 1"),
        ];
        commands[2].on_failure = FailureMode::Ignore;
        let mut vars = TemplateContext::new();
        vars.insert("WORD".into(), json!("hello"));

        let prompt = inject_context("Question?", &commands, &vars, None)
            .await
            .expect("context injected");
        assert_eq!(
            prompt,
            "--- Context: First ---\nhello\n--- End Context ---\n\n\
             --- Context Error: Second ---\nCommand exited with code 1\n--- End Context ---\n\n\
             Question?"
        );
    }

    #[tokio::test]
    async fn fail_mode_aborts() {
        let mut command = ContextCommand::new("Build", "exit 2");
        command.on_failure = FailureMode::Fail;
        let err = inject_context("q", &[command], &TemplateContext::new(), None)
            .await
            .expect_err("fail mode");
        assert_eq!(
            err.to_string(),
            "Context command 'Build' failed: Command exited with code 2"
        );
    }

    #[tokio::test]
    async fn template_errors_list_available_variables() {
        let command = ContextCommand::new("Show", "cat {{ FILE }}");
        let mut vars = TemplateContext::new();
        vars.insert("OTHER".into(), json!("x"));
        let err = inject_context("q", &[command], &vars, None)
            .await
            .expect_err("undefined variable");
        let message = err.to_string();
        assert!(message.starts_with("In context command 'Show': Undefined variable"));
        assert!(message.contains("    - OTHER: x"));
    }

    #[tokio::test]
    async fn no_commands_leaves_prompt_unchanged() {
        let prompt = inject_context("q", &[], &TemplateContext::new(), None)
            .await
            .expect("no-op");
        assert_eq!(prompt, "q");
    }
}
