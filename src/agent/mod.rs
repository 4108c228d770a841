//! Tool-calling loop that lets the model run validated shell commands.

pub mod policy;

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::context::run_shell;
use crate::llm::backend::{ChatBackend, complete_with_fallbacks};
use crate::llm::provider::{ChatMessage, CompletionRequest, ProviderError, Usage};
use crate::llm::tools::{ParamKind, ToolDefinition, ToolParam};

pub use policy::{CommandPolicy, SAFE_DEFAULT_COMMANDS};

pub const COMMAND_TOOL_NAME: &str = "execute_bash_command";
pub const DENIED_BY_USER: &str = "Command execution denied by user.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid dynamic_commands configuration: {0}")]
    InvalidPolicy(String),
    #[error("LLM API call failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("LLM returned empty response")]
    EmptyResponse,
    #[error("Unexpected finish reason: {0}")]
    UnexpectedFinish(String),
    #[error(
        "Maximum command execution limit reached ({0} commands). The LLM may be stuck in a loop or the task requires more commands than allowed. Increase max_commands in your configuration if needed."
    )]
    MaxCommandsReached(usize),
}

/// Builds the `execute_bash_command` tool declaration for `policy`.
pub fn command_tool(policy: &CommandPolicy) -> ToolDefinition {
    let mut description = String::from(
        "Execute a bash command to gather information needed to answer the user's question.\n\n",
    );

    match policy
        .available_commands
        .as_ref()
        .filter(|commands| !commands.is_empty())
    {
        Some(commands) => {
            description.push_str("Available commands:\n");
            for entry in commands {
                let summary = entry
                    .description
                    .as_deref()
                    .unwrap_or("No description provided");
                description.push_str(&format!("- `{}`: {summary}\n", entry.command));
            }
            description.push_str(
                "\nYou can also use variations of these commands with different arguments if needed.\n\n",
            );
        }
        None => description.push_str(
            "\nCommon use cases:\n\
             - Check file contents (cat, head, tail, grep)\n\
             - Examine git status or diffs (git status, git diff, git log)\n\
             - Run tests or builds (npm test, pytest, make)\n\
             - Check system information (ls, find, ps, df)\n\n",
        ),
    }

    description.push_str(
        "\nDo NOT use this for:\n\
         - Destructive operations (rm, mv, dd)\n\
         - Privilege escalation (sudo, su)\n\
         - Network operations (curl, wget) unless explicitly allowed\n\
         - Writing or modifying files (>, >>, vim, nano)\n\n\
         The command will be validated against allowlists/denylists before execution.\n",
    );

    ToolDefinition::new(COMMAND_TOOL_NAME, description)
        .param(ToolParam::required("command", ParamKind::String).describe(
            "The bash command to execute (e.g., 'git status', 'npm test', 'cat error.log')",
        ))
        .param(ToolParam::required("reason", ParamKind::String).describe(
            "Brief explanation of why this command is needed to answer the user's question",
        ))
}

/// Asks the user before a command runs.
pub trait Confirm: Send {
    fn confirm(&mut self, command: &str, reason: &str) -> bool;
}

/// Interactive `[y/N]` prompt on stderr/stdin.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&mut self, command: &str, reason: &str) -> bool {
        eprintln!("\n[Command Request]");
        eprintln!("Command: {command}");
        eprintln!("Reason: {reason}");
        eprint!("\nAllow execution? [y/N]: ");
        let _ = io::stderr().flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => {
                eprintln!();
                false
            }
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        }
    }
}

pub struct AgentOptions<'a> {
    pub policy: CommandPolicy,
    pub verbose: bool,
    /// `None` runs commands without asking.
    pub confirm: Option<&'a mut dyn Confirm>,
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub content: String,
    pub commands_executed: usize,
    pub usage: Usage,
}

fn add_usage(total: &mut Usage, usage: Option<&Usage>) {
    let Some(usage) = usage else {
        return;
    };
    let add = |acc: &mut Option<u32>, value: Option<u32>| {
        if let Some(value) = value {
            *acc = Some(acc.unwrap_or(0) + value);
        }
    };
    add(&mut total.prompt_tokens, usage.prompt_tokens);
    add(&mut total.completion_tokens, usage.completion_tokens);
    add(&mut total.total_tokens, usage.total_tokens);
}

async fn execute_single_command(command: &str, timeout_secs: u64) -> String {
    let result = run_shell(
        "Dynamic Command",
        command,
        Duration::from_secs(timeout_secs),
        None,
    )
    .await;
    if !result.success {
        let error = result.error_message.as_deref().unwrap_or("Unknown error");
        if result.output.is_empty() {
            return format!("Error: {error}");
        }
        return format!("Error: {error}\n\nPartial output:\n{}", result.output);
    }
    if result.output.is_empty() {
        "(no output)".to_string()
    } else {
        result.output
    }
}

/// Runs the completion/tool loop until the model answers. `request` supplies
/// the model, messages and sampling parameters; tools are added here.
pub async fn run_agent(
    backend: &dyn ChatBackend,
    mut request: CompletionRequest,
    mut options: AgentOptions<'_>,
) -> Result<AgentOutcome, AgentError> {
    let max_commands = options.policy.max_commands;
    request.tools = vec![command_tool(&options.policy).to_json()];
    request.tool_choice = Some(json!("auto"));

    let mut outcome = AgentOutcome::default();

    while outcome.commands_executed < max_commands {
        let response = complete_with_fallbacks(backend, &request, &options.fallbacks).await?;
        add_usage(&mut outcome.usage, response.usage.as_ref());

        // A `tool_calls` finish without any calls is treated as a final turn.
        let wants_tools = !response.tool_calls.is_empty()
            && (response.finish_reason.as_deref() == Some("tool_calls")
                || response.content.as_deref().is_none_or(str::is_empty));

        if !wants_tools {
            return match response.content.filter(|content| !content.is_empty()) {
                Some(content) => {
                    outcome.content = content;
                    Ok(outcome)
                }
                None => match response.finish_reason.as_deref() {
                    Some("stop") | None => Err(AgentError::EmptyResponse),
                    Some(other) => Err(AgentError::UnexpectedFinish(other.to_string())),
                },
            };
        }

        request.messages.push(ChatMessage::assistant_tool_calls(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in &response.tool_calls {
            let args = match call.args() {
                Ok(args) => args,
                Err(err) => {
                    request.messages.push(ChatMessage::tool_result(
                        &call.id,
                        format!("Failed to parse tool call arguments: {err}"),
                    ));
                    continue;
                }
            };
            let command = args
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let reason = args
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("No reason provided")
                .to_string();

            if options.verbose {
                eprintln!("\n[Executing: {command}]");
                eprintln!("Reason: {reason}\n");
            }

            if let Err(reason) = options.policy.validate(&command) {
                tracing::info!(%command, "command rejected by policy");
                request.messages.push(ChatMessage::tool_result(
                    &call.id,
                    format!("Command validation failed: {reason}"),
                ));
                continue;
            }

            if let Some(confirm) = options.confirm.as_deref_mut() {
                if !confirm.confirm(&command, &reason) {
                    outcome.content = DENIED_BY_USER.to_string();
                    return Ok(outcome);
                }
            }

            tracing::debug!(%command, "executing model-requested command");
            let output = execute_single_command(&command, options.policy.timeout).await;
            if options.verbose {
                eprintln!("Output:\n{output}\n");
            }
            request
                .messages
                .push(ChatMessage::tool_result(&call.id, output));

            outcome.commands_executed += 1;
            if outcome.commands_executed >= max_commands {
                break;
            }
        }
    }

    Err(AgentError::MaxCommandsReached(max_commands))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::backend::fake::{FakeBackend, text};
    use crate::llm::provider::{CompletionResponse, Role};
    use crate::llm::tools::ToolCall;

    fn tool_response(calls: &[(&str, &str)]) -> CompletionResponse {
        CompletionResponse {
            content: None,
            tool_calls: calls
                .iter()
                .enumerate()
                .map(|(i, (command, reason))| {
                    ToolCall::new(
                        format!("call_{i}"),
                        COMMAND_TOOL_NAME,
                        &json!({ "command": command, "reason": reason }),
                    )
                })
                .collect(),
            finish_reason: Some("tool_calls".to_string()),
            usage: Some(Usage {
                total_tokens: Some(10),
                ..Usage::default()
            }),
            raw: Value::Null,
        }
    }

    fn options<'a>(policy: CommandPolicy) -> AgentOptions<'a> {
        AgentOptions {
            policy,
            verbose: false,
            confirm: None,
            fallbacks: Vec::new(),
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("gpt-4o", vec![ChatMessage::user("What branch am I on?")])
    }

    #[test]
    fn tool_description_mentions_available_commands() {
        let policy = CommandPolicy::from_config(Some(&json!({
            "available_commands": [{ "command": "git status", "description": "Show status" }]
        })))
        .expect("policy");
        let tool = command_tool(&policy).to_json();
        let description = tool["function"]["description"].as_str().expect("text");
        assert!(description.contains("- `git status`: Show status"));
        assert!(description.contains("Do NOT use this for:"));
        assert_eq!(
            tool["function"]["parameters"]["required"],
            json!(["command", "reason"])
        );

        let default_tool = command_tool(&CommandPolicy::default()).to_json();
        assert!(
            default_tool["function"]["description"]
                .as_str()
                .expect("text")
                .contains("Common use cases:")
        );
    }

    #[tokio::test]
    async fn executes_allowed_commands_and_returns_answer() {
        let backend = FakeBackend::with_responses(vec![
            tool_response(&[("echo main", "check branch")]),
            text("You are on main."),
        ]);

        let outcome = run_agent(&backend, request(), options(CommandPolicy::default()))
            .await
            .expect("agent finishes");
        assert_eq!(outcome.content, "You are on main.");
        assert_eq!(outcome.commands_executed, 1);
        assert_eq!(outcome.usage.total_tokens, Some(10));

        let requests = backend.recorded();
        assert_eq!(requests[0].tool_choice, Some(json!("auto")));
        let second = &requests[1].messages;
        assert_eq!(second[1].role, Role::Assistant);
        assert_eq!(second[2].role, Role::Tool);
        assert_eq!(second[2].tool_call_id.as_deref(), Some("call_0"));
        assert_eq!(second[2].text_content(), Some("main"));
    }

    #[tokio::test]
    async fn tool_calls_finish_without_calls_ends_the_loop() {
        let empty_calls = || CompletionResponse {
            finish_reason: Some("tool_calls".to_string()),
            ..CompletionResponse::default()
        };
        let backend = FakeBackend::with_responses(vec![empty_calls(), empty_calls()]);
        let err = run_agent(&backend, request(), options(CommandPolicy::default()))
            .await
            .expect_err("no calls and no content");
        assert!(matches!(err, AgentError::UnexpectedFinish(ref reason) if reason == "tool_calls"));
        assert_eq!(backend.recorded().len(), 1);

        let backend = FakeBackend::with_responses(vec![CompletionResponse {
            content: Some("Nothing to run.".to_string()),
            ..empty_calls()
        }]);
        let outcome = run_agent(&backend, request(), options(CommandPolicy::default()))
            .await
            .expect("content is the answer");
        assert_eq!(outcome.content, "Nothing to run.");
        assert_eq!(outcome.commands_executed, 0);
    }

    #[tokio::test]
    async fn rejected_commands_are_reported_to_the_model() {
        let backend = FakeBackend::with_responses(vec![
            tool_response(&[("rm -rf /tmp/x", "cleanup")]),
            text("I cannot do that."),
        ]);

        let outcome = run_agent(&backend, request(), options(CommandPolicy::default()))
            .await
            .expect("agent finishes");
        assert_eq!(outcome.commands_executed, 0);

        let tool_message = &backend.recorded()[1].messages[2];
        assert!(
            tool_message
                .text_content()
                .expect("text")
                .starts_with("Command validation failed: Command 'rm -rf /tmp/x'")
        );
    }

    #[tokio::test]
    async fn denial_ends_the_run() {
        struct Deny;
        impl Confirm for Deny {
            fn confirm(&mut self, _: &str, _: &str) -> bool {
                false
            }
        }

        let backend = FakeBackend::with_responses(vec![tool_response(&[("pwd", "where")])]);
        let mut deny = Deny;
        let mut opts = options(CommandPolicy::default());
        opts.confirm = Some(&mut deny);

        let outcome = run_agent(&backend, request(), opts)
            .await
            .expect("denied run");
        assert_eq!(outcome.content, DENIED_BY_USER);
    }

    #[tokio::test]
    async fn command_limit_is_enforced() {
        let backend = FakeBackend::with_responses(vec![
            tool_response(&[("pwd", "a"), ("pwd", "b")]),
            tool_response(&[("pwd", "c")]),
        ]);
        let policy = CommandPolicy {
            max_commands: 2,
            ..CommandPolicy::default()
        };

        let err = run_agent(&backend, request(), options(policy))
            .await
            .expect_err("limit reached");
        assert!(matches!(err, AgentError::MaxCommandsReached(2)));
        assert_eq!(backend.recorded().len(), 1);
    }

    #[tokio::test]
    async fn empty_final_answer_is_an_error() {
        let mut empty = text("");
        empty.content = None;
        let backend = FakeBackend::with_responses(vec![empty]);
        let err = run_agent(&backend, request(), options(CommandPolicy::default()))
            .await
            .expect_err("empty answer");
        assert!(matches!(err, AgentError::EmptyResponse));
    }
}
