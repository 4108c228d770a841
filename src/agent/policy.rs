//! Allow/deny rules for model-requested shell commands.

use glob::Pattern;
use serde::Deserialize;
use serde_json::Value;

use super::AgentError;

pub const DEFAULT_MAX_COMMANDS: usize = 10;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Read-only commands permitted when no allow rules are configured.
pub const SAFE_DEFAULT_COMMANDS: &[&str] = &[
    "git status*",
    "git log*",
    "git diff*",
    "git show*",
    "git branch*",
    "ls*",
    "cat *",
    "head *",
    "tail *",
    "grep *",
    "find *",
    "npm test*",
    "pytest*",
    "make test*",
    "df*",
    "ps*",
    "whoami",
    "pwd",
    "echo *",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AvailableCommand {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// The `dynamic_commands` section of a Cllmfile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommandPolicy {
    pub available_commands: Option<Vec<AvailableCommand>>,
    pub allow: Option<Vec<String>>,
    pub deny: Vec<String>,
    pub max_commands: usize,
    pub timeout: u64,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            available_commands: None,
            allow: None,
            deny: Vec::new(),
            max_commands: DEFAULT_MAX_COMMANDS,
            timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

/// fnmatch-style match over the whole command string.
fn fnmatch(command: &str, pattern: &str) -> bool {
    Pattern::new(pattern)
        .map(|pattern| pattern.matches(command))
        .unwrap_or(false)
}

impl CommandPolicy {
    pub fn from_config(value: Option<&Value>) -> Result<Self, AgentError> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|err| AgentError::InvalidPolicy(err.to_string())),
        }
    }

    fn has_explicit_rules(&self) -> bool {
        self.available_commands.is_some() || self.allow.is_some()
    }

    fn matching_deny(&self, command: &str) -> Option<&str> {
        self.deny
            .iter()
            .find(|pattern| fnmatch(command, pattern))
            .map(String::as_str)
    }

    /// Deny wins, then `available_commands`, then `allow`, then safe defaults.
    pub fn is_allowed(&self, command: &str) -> bool {
        if self.matching_deny(command).is_some() {
            return false;
        }

        if let Some(available) = &self.available_commands {
            let listed = available.iter().any(|entry| {
                command == entry.command || fnmatch(command, &format!("{}*", entry.command))
            });
            if listed {
                return true;
            }
        }

        if let Some(allow) = &self.allow {
            if allow.iter().any(|pattern| fnmatch(command, pattern)) {
                return true;
            }
        }

        if self.has_explicit_rules() {
            return false;
        }

        SAFE_DEFAULT_COMMANDS
            .iter()
            .any(|pattern| fnmatch(command, pattern))
    }

    pub fn disallowed_reason(&self, command: &str) -> String {
        if let Some(pattern) = self.matching_deny(command) {
            return format!("Command '{command}' matches denylist pattern: {pattern}");
        }
        if self.has_explicit_rules() {
            return format!(
                "Command '{command}' is not in the configured allowed commands. See dynamic_commands.available_commands or dynamic_commands.allow in your Cllmfile.yml"
            );
        }
        format!(
            "Command '{command}' is not in the safe default command list. To allow this command, add it to dynamic_commands.allow or dynamic_commands.available_commands in your Cllmfile.yml"
        )
    }

    pub fn validate(&self, command: &str) -> Result<(), String> {
        if self.is_allowed(command) {
            Ok(())
        } else {
            Err(self.disallowed_reason(command))
        }
    }
}
