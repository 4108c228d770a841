use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ISOLATED_ENV: &[&str] = &[
    "CLLM_PATH",
    "CLLM_CONVERSATIONS_PATH",
    "CLLM_DEBUG",
    "CLLM_JSON_LOGS",
    "CLLM_LOG_FILE",
    "CLLM_LOGLEVEL",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GROQ_API_KEY",
];

/// A scratch home and working directory so no real `~/.cllm` is read.
struct Sandbox {
    home: TempDir,
    cwd: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            home: TempDir::new().expect("home dir"),
            cwd: TempDir::new().expect("working dir"),
        }
    }

    fn cllm(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cllm"));
        for key in ISOLATED_ENV {
            cmd.env_remove(key);
        }
        cmd.env("HOME", self.home.path()).current_dir(self.cwd.path());
        cmd
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.cwd.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, contents).expect("write fixture");
    }

    fn path(&self, relative: &str) -> std::path::PathBuf {
        self.cwd.path().join(relative)
    }
}

fn parse_stdout_json(output: &[u8]) -> Value {
    let text = String::from_utf8(output.to_vec()).expect("stdout should be utf-8");
    serde_json::from_str(text.trim()).expect("stdout should contain valid JSON")
}

fn dry_run(sandbox: &Sandbox, args: &[&str]) -> Value {
    let assert = sandbox
        .cllm()
        .arg("--dry-run")
        .args(args)
        .write_stdin("")
        .assert()
        .success();
    parse_stdout_json(&assert.get_output().stdout)
}

#[test]
fn dry_run_succeeds_without_api_key() {
    let sandbox = Sandbox::new();
    let body = dry_run(&sandbox, &["-m", "groq/llama3-8b-8192", "2+2?"]);

    assert_eq!(body["dry_run"], Value::Bool(true));
    assert_eq!(body["provider"], "groq");
    assert_eq!(body["model"], "llama3-8b-8192");
    assert_eq!(body["api_key_present"], Value::Bool(false));
    assert_eq!(
        body["endpoint"],
        "https://api.groq.com/openai/v1/chat/completions"
    );
}

#[test]
fn default_model_is_used_without_configuration() {
    let sandbox = Sandbox::new();
    let body = dry_run(&sandbox, &["hello"]);
    assert_eq!(body["provider"], "openai");
    assert_eq!(body["model"], "gpt-3.5-turbo");
    assert_eq!(body["stream"], Value::Bool(false));
}

#[test]
fn argument_prompt_has_priority_over_stdin() {
    let sandbox = Sandbox::new();
    let assert = sandbox
        .cllm()
        .args(["--dry-run", "argument prompt"])
        .write_stdin("stdin prompt")
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    let messages = body["messages"].as_array().expect("messages should be an array");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "argument prompt");
}

#[test]
fn stdin_is_the_prompt_when_no_argument_is_given() {
    let sandbox = Sandbox::new();
    let assert = sandbox
        .cllm()
        .arg("--dry-run")
        .write_stdin("  piped prompt\n")
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["messages"][0]["content"], "piped prompt");
}

#[test]
fn missing_prompt_is_an_error() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .write_stdin("")
        .assert()
        .failure()
        .stderr(contains("No prompt provided. Use 'cllm --help' for usage."));
}

#[test]
fn cllmfile_settings_and_cli_precedence() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "Cllmfile.yml",
        "model: claude-3-haiku-20240307\ntemperature: 0.5\nmax_tokens: 64\ndefault_system_message: \"Be terse.\"\ntop_p: 0.9\n",
    );

    let body = dry_run(&sandbox, &["hello"]);
    assert_eq!(body["provider"], "anthropic");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "Be terse.");
    assert_eq!(body["request"]["temperature"], json!(0.5));
    assert_eq!(body["request"]["max_tokens"], Value::from(64));
    assert_eq!(body["request"]["top_p"], json!(0.9));

    let body = dry_run(&sandbox, &["-m", "gpt-4o", "-t", "1.5", "--max-tokens", "128", "hello"]);
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["request"]["temperature"], json!(1.5));
    assert_eq!(body["request"]["max_tokens"], Value::from(128));
}

#[test]
fn local_cllm_dir_overrides_home_and_named_configs_load() {
    let sandbox = Sandbox::new();
    fs::create_dir_all(sandbox.home.path().join(".cllm")).expect("home .cllm");
    fs::write(
        sandbox.home.path().join(".cllm/Cllmfile.yml"),
        "model: gpt-4\nmax_tokens: 10\n",
    )
    .expect("home config");
    sandbox.write(".cllm/Cllmfile.yml", "model: gpt-4o-mini\n");
    sandbox.write(".cllm/summarize.Cllmfile.yml", "model: gpt-4o\n");

    let body = dry_run(&sandbox, &["hello"]);
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["request"]["max_tokens"], Value::from(10));

    let body = dry_run(&sandbox, &["--config", "summarize", "hello"]);
    assert_eq!(body["model"], "gpt-4o");

    sandbox
        .cllm()
        .args(["--config", "nope", "--dry-run", "hello"])
        .assert()
        .failure()
        .stderr(contains("Configuration error: Configuration 'nope' not found"));
}

#[test]
fn environment_variables_are_interpolated() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "Cllmfile.yml",
        "default_system_message: \"You help team ${CLLM_TEST_TEAM}.\"\n",
    );

    let assert = sandbox
        .cllm()
        .env("CLLM_TEST_TEAM", "platform")
        .args(["--dry-run", "hi"])
        .write_stdin("")
        .assert()
        .success();
    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["messages"][0]["content"], "You help team platform.");
}

#[test]
fn show_config_lists_sources_and_effective_values() {
    let sandbox = Sandbox::new();
    sandbox.write("Cllmfile.yml", "model: gpt-4o\n");

    sandbox
        .cllm()
        .args(["--show-config", "-t", "0.5"])
        .assert()
        .success()
        .stdout(
            contains("Configuration sources (in order of precedence):")
                .and(contains("Cllmfile.yml"))
                .and(contains("Effective configuration:"))
                .and(contains("\"temperature\": 0.5")),
        );
}

#[test]
fn list_models_prints_catalogue() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .arg("--list-models")
        .assert()
        .success()
        .stdout(contains("Available Models").and(contains("gpt-4o")));
}

#[test]
fn validate_schema_reports_missing_and_valid_schemas() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .arg("--validate-schema")
        .assert()
        .failure()
        .stderr(contains("Error: No schema provided"));

    sandbox.write(
        ".cllm/schemas/person.json",
        r#"{"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}"#,
    );
    sandbox
        .cllm()
        .args(["--validate-schema", "--json-schema-file", "schemas/person.json"])
        .assert()
        .success()
        .stdout(contains("✓ Schema is valid").and(contains("name")));

    sandbox
        .cllm()
        .args(["--validate-schema", "--json-schema", "{not json"])
        .assert()
        .failure()
        .stderr(contains("Schema error: Invalid JSON in schema"));
}

#[test]
fn schema_sets_response_format_in_dry_run() {
    let sandbox = Sandbox::new();
    let body = dry_run(
        &sandbox,
        &["--json-schema", r#"{"type": "object"}"#, "--stream", "extract"],
    );
    assert_eq!(body["stream"], Value::Bool(false));
    assert_eq!(body["request"]["response_format"]["type"], "json_schema");
    assert_eq!(
        body["request"]["response_format"]["json_schema"]["schema"],
        json!({"type": "object"})
    );
}

#[test]
fn raw_does_not_disable_streaming() {
    let sandbox = Sandbox::new();
    let body = dry_run(&sandbox, &["--stream", "--raw", "tell a story"]);
    assert_eq!(body["stream"], Value::Bool(true));
    assert_eq!(body["request"]["stream"], Value::Bool(true));
}

#[test]
fn exec_output_is_injected_as_context() {
    let sandbox = Sandbox::new();
    let body = dry_run(&sandbox, &["--exec", "echo from-shell", "Summarize"]);
    let content = body["messages"][0]["content"].as_str().expect("content");
    assert!(content.starts_with("--- Context: CLI Command 1 ---\nfrom-shell\n--- End Context ---"));
    assert!(content.ends_with("Summarize"));
}

#[test]
fn config_context_commands_can_be_skipped() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "Cllmfile.yml",
        "context_commands:\n  - name: Marker\n    command: echo marker\n",
    );

    let body = dry_run(&sandbox, &["question"]);
    let content = body["messages"][0]["content"].as_str().expect("content");
    assert!(content.contains("--- Context: Marker ---\nmarker"));

    let body = dry_run(&sandbox, &["--no-context-exec", "question"]);
    assert_eq!(body["messages"][0]["content"], "question");
}

#[test]
fn templates_render_with_variables() {
    let sandbox = Sandbox::new();
    sandbox.write(
        ".cllm/templates/review.tpl",
        "Review this for {{ LANGUAGE }}:\n{{ PROMPT_STDIN }}",
    );

    let assert = sandbox
        .cllm()
        .args(["--dry-run", "--template", "review", "--var", "LANGUAGE=rust"])
        .write_stdin("fn main() {}")
        .assert()
        .success();
    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(
        body["messages"][0]["content"],
        "Review this for rust:\nfn main() {}"
    );
}

#[test]
fn image_flag_attaches_image_part() {
    let sandbox = Sandbox::new();
    let body = dry_run(
        &sandbox,
        &["-i", "https://example.com/cat.png", "What is this?"],
    );
    let parts = &body["messages"][0]["content"];
    assert_eq!(parts[0], json!({"type": "text", "text": "What is this?"}));
    assert_eq!(parts[1]["image_url"]["url"], "https://example.com/cat.png");

    sandbox
        .cllm()
        .args(["--dry-run", "-i", "missing.png", "What is this?"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(contains("Image file not found: missing.png"));
}

#[test]
fn allow_commands_adds_tool_to_request() {
    let sandbox = Sandbox::new();
    let body = dry_run(&sandbox, &["--allow-commands", "What is in this directory?"]);
    assert_eq!(body["agent_mode"], Value::Bool(true));
    assert_eq!(
        body["request"]["tools"][0]["function"]["name"],
        "execute_bash_command"
    );
    assert_eq!(body["request"]["tool_choice"], "auto");
}

#[test]
fn read_only_requires_conversation() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .args(["--read-only", "hello"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(contains("Error: --read-only requires --conversation"));
}

#[test]
fn invalid_conversation_id_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .args(["--conversation", "../escape", "hello"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(contains("Invalid conversation ID: '../escape'"));
}

#[test]
fn dry_run_with_conversation_does_not_save() {
    let sandbox = Sandbox::new();
    let conversations = sandbox.path("convs");
    let body = dry_run(
        &sandbox,
        &[
            "--conversation",
            "chat-1",
            "--conversations-path",
            conversations.to_str().expect("utf-8 path"),
            "hello",
        ],
    );
    assert_eq!(body["conversation"], "chat-1");
    assert!(!conversations.join("chat-1.json").exists());
}

#[test]
fn debug_does_not_leak_api_key() {
    let sandbox = Sandbox::new();
    let secret = "sk-test-secret-value";

    let assert = sandbox
        .cllm()
        .env("OPENAI_API_KEY", secret)
        .args(["--debug", "--dry-run", "hello"])
        .write_stdin("")
        .assert()
        .success()
        .stderr(contains("Debug mode enabled").and(contains(secret).not()));
    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["api_key_present"], Value::Bool(true));
    assert!(!String::from_utf8_lossy(&assert.get_output().stdout).contains(secret));
}

#[test]
fn log_file_receives_logs() {
    let sandbox = Sandbox::new();
    let log = sandbox.path("logs/cllm.log");
    sandbox
        .cllm()
        .args(["--debug", "--log-file", log.to_str().expect("utf-8 path"), "--dry-run", "hi"])
        .write_stdin("")
        .assert()
        .success();
    assert!(log.is_file());
}

#[test]
fn version_prints_build_metadata() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("commit:").and(contains("built:")));
}

#[test]
fn init_creates_local_directory_and_gitignore() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Initializing local .cllm directory").and(contains("Next steps:")));

    assert!(sandbox.path(".cllm/Cllmfile.yml").is_file());
    assert!(sandbox.path(".cllm/conversations").is_dir());
    let gitignore = fs::read_to_string(sandbox.path(".gitignore")).expect("gitignore");
    assert!(gitignore.contains(".cllm/conversations/"));

    sandbox
        .cllm()
        .arg("init")
        .assert()
        .failure()
        .stderr(contains("already exists. Use --force to reinitialize."));

    sandbox
        .cllm()
        .args(["init", "--force", "--template", "code-review"])
        .assert()
        .success();
    assert!(sandbox.path(".cllm/code-review.Cllmfile.yml").is_file());
    let gitignore = fs::read_to_string(sandbox.path(".gitignore")).expect("gitignore");
    assert_eq!(gitignore.matches(".cllm/conversations/").count(), 1);
}

#[test]
fn init_lists_and_validates_templates() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .args(["init", "--list-templates"])
        .assert()
        .success()
        .stdout(contains("code-review").and(contains("summarize")));

    sandbox
        .cllm()
        .args(["init", "--template", "nope"])
        .assert()
        .failure()
        .stderr(contains("Template 'nope' not found"));
    assert!(!sandbox.path(".cllm").exists());
}

#[test]
fn init_global_uses_home() {
    let sandbox = Sandbox::new();
    sandbox.cllm().args(["init", "--global"]).assert().success();
    assert!(sandbox.home.path().join(".cllm/Cllmfile.yml").is_file());
    assert!(!sandbox.path(".gitignore").exists());
}

#[test]
fn conversations_subcommand_lists_and_deletes() {
    let sandbox = Sandbox::new();
    let dir = sandbox.path("convs");
    let dir_arg = dir.to_str().expect("utf-8 path");

    sandbox
        .cllm()
        .args(["conversations", "--conversations-path", dir_arg, "list"])
        .assert()
        .success()
        .stdout(contains("No conversations found"));

    write_conversation(&dir, "notes");
    sandbox
        .cllm()
        .args(["conversations", "list", "--conversations-path", dir_arg])
        .assert()
        .success()
        .stdout(contains("notes"));

    sandbox
        .cllm()
        .args(["conversations", "delete", "notes", "--conversations-path", dir_arg])
        .assert()
        .success()
        .stdout(contains("Deleted conversation 'notes'"));
    assert!(!dir.join("notes.json").exists());
}

fn write_conversation(dir: &Path, id: &str) {
    fs::create_dir_all(dir).expect("conversation dir");
    let body = json!({
        "id": id,
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "hi"}],
        "created_at": "2026-01-01T00:00:00.000000Z",
        "updated_at": "2026-01-01T00:00:00.000000Z",
        "metadata": {}
    });
    fs::write(dir.join(format!("{id}.json")), body.to_string()).expect("write conversation");
}

#[test]
fn config_check_validates_files() {
    let sandbox = Sandbox::new();
    sandbox.write("Cllmfile.yml", "model: gpt-4o\n");
    sandbox
        .cllm()
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(contains("config OK"));

    sandbox.write("Cllmfile.yml", "model: [unclosed\n");
    sandbox
        .cllm()
        .args(["config", "check"])
        .assert()
        .failure()
        .stderr(contains("Configuration error: Error parsing YAML file"));
}

#[test]
fn completion_scripts_are_generated() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(contains("_cllm").and(contains("complete")));

    sandbox
        .cllm()
        .args(["completion", "fish"])
        .assert()
        .success()
        .stdout(contains("complete -c cllm"));
}

#[test]
fn help_includes_examples_and_subcommands() {
    let sandbox = Sandbox::new();
    sandbox
        .cllm()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            contains("Examples:")
                .and(contains("completion"))
                .and(contains("Generate shell completion script")),
        );
}
