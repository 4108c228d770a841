use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::{Value, json};
use std::fs;
use tempfile::tempdir;

fn tool(name: &str) -> Command {
    let path = match name {
        "cllm-prompt" => assert_cmd::cargo::cargo_bin!("cllm-prompt"),
        "cllm-split" => assert_cmd::cargo::cargo_bin!("cllm-split"),
        "cllm-load" => assert_cmd::cargo::cargo_bin!("cllm-load"),
        "cllm-vector" => assert_cmd::cargo::cargo_bin!("cllm-vector"),
        "cllm-image" => assert_cmd::cargo::cargo_bin!("cllm-image"),
        "cllm-transcribe" => assert_cmd::cargo::cargo_bin!("cllm-transcribe"),
        "cllm-repeat" => assert_cmd::cargo::cargo_bin!("cllm-repeat"),
        other => panic!("unknown tool {other}"),
    };
    let mut cmd = Command::new(path);
    cmd.env_remove("CLLM_PATH")
        .env_remove("CLLM_BIN")
        .env_remove("CLLM_DEBUG")
        .env_remove("OPENAI_API_KEY");
    cmd
}

fn parse_stdout_json(output: &[u8]) -> Value {
    let text = String::from_utf8(output.to_vec()).expect("stdout should be utf-8");
    serde_json::from_str(text.trim()).expect("stdout should contain valid JSON")
}

#[test]
fn split_text_attaches_metadata() {
    let assert = tool("cllm-split")
        .args(["-s", "20", "-o", "0", "-m", r#"{"source": "notes"}"#])
        .write_stdin("alpha beta gamma delta epsilon zeta eta theta iota kappa")
        .assert()
        .success();

    let chunks = parse_stdout_json(&assert.get_output().stdout);
    let chunks = chunks.as_array().expect("array of chunks");
    assert!(chunks.len() > 1);
    for chunk in chunks {
        assert_eq!(chunk["metadata"]["source"], "notes");
        assert!(chunk["page_content"].as_str().expect("text").chars().count() <= 20);
    }
}

#[test]
fn split_documents_mode_reads_json() {
    let input = json!([
        {"page_content": "short", "metadata": {"page": 1}},
        {"page_content": "another short one", "metadata": {"page": 2}}
    ]);
    let assert = tool("cllm-split")
        .arg("--documents")
        .write_stdin(input.to_string())
        .assert()
        .success();

    let chunks = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(chunks, input);

    tool("cllm-split")
        .arg("--documents")
        .write_stdin("not json")
        .assert()
        .failure()
        .stderr(contains("Error: Invalid JSON input"));
}

#[test]
fn load_reads_file_list_and_directory() {
    let dir = tempdir().expect("tempdir");
    let notes = dir.path().join("notes.md");
    fs::write(&notes, "# Notes\nremember the milk").expect("write notes");
    fs::write(dir.path().join("skip.txt"), "other").expect("write other");

    let list = json!([notes.display().to_string()]).to_string();
    let assert = tool("cllm-load").arg(&list).assert().success();
    let docs = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(docs[0]["page_content"], "# Notes\nremember the milk");
    assert_eq!(docs[0]["metadata"]["source"], notes.display().to_string());

    let output = dir.path().join("docs.json");
    let assert = tool("cllm-load")
        .arg("-d")
        .arg(dir.path())
        .args(["-g", "*.md", "-f"])
        .arg(&output)
        .assert()
        .success();
    let docs = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(docs.as_array().expect("docs").len(), 1);
    assert!(output.is_file());

    tool("cllm-load")
        .args(["-d", "/definitely/not/here"])
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}

#[test]
fn repeat_runs_once_per_item() {
    let assert = tool("cllm-repeat")
        .env("CLLM_BIN", "cat")
        .write_stdin(r#"["{\"answer\": 1}", "plain text"]"#)
        .assert()
        .success();

    let results = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(results, json!([{"answer": 1}, "plain text"]));
}

#[test]
fn repeat_requires_json_array() {
    tool("cllm-repeat")
        .env("CLLM_BIN", "cat")
        .write_stdin("not json")
        .assert()
        .failure()
        .stderr(contains("Invalid JSON input"));
}

#[test]
fn image_rejects_invalid_options_with_json_error() {
    tool("cllm-image")
        .args(["-s", "100x100"])
        .write_stdin("a red fox")
        .assert()
        .failure()
        .stdout(contains("\"error\"").and(contains("Invalid size '100x100'")));

    tool("cllm-image")
        .args(["-n", "0"])
        .write_stdin("a red fox")
        .assert()
        .failure()
        .stdout(contains("Number of images must be at least 1."));
}

#[test]
fn vector_read_and_save_use_local_index() {
    let dir = tempdir().expect("tempdir");

    tool("cllm-vector")
        .arg("--cllm-dir")
        .arg(dir.path())
        .args(["-i", "docs", "read", "rust"])
        .assert()
        .failure()
        .stderr(contains("does not exist"));

    tool("cllm-vector")
        .arg("--cllm-dir")
        .arg(dir.path())
        .args(["-i", "docs", "save"])
        .write_stdin("[]")
        .assert()
        .success();
    assert!(dir.path().join("rag/docs.json").is_file());

    tool("cllm-vector")
        .arg("--cllm-dir")
        .arg(dir.path())
        .args(["-i", "docs", "read", "rust"])
        .assert()
        .success()
        .stdout(contains("No documents found."));

    tool("cllm-vector")
        .arg("--cllm-dir")
        .arg(dir.path())
        .args(["-i", "docs", "read"])
        .assert()
        .failure()
        .stderr(contains("A query is required"));
}

#[test]
fn prompt_lists_and_renders_templates() {
    let dir = tempdir().expect("tempdir");
    let templates = dir.path().join("templates");
    fs::create_dir_all(&templates).expect("templates dir");
    fs::write(
        templates.join("default.tpl"),
        "{{ PROMPT_INSTRUCTIONS }}\n\n{{ PROMPT_STDIN }}",
    )
    .expect("write template");

    tool("cllm-prompt")
        .arg("--cllm-dir")
        .arg(dir.path())
        .arg("-l")
        .assert()
        .success()
        .stdout(contains("Available templates:").and(contains("- default")));

    tool("cllm-prompt")
        .arg("--cllm-dir")
        .arg(dir.path())
        .args(["--prompt-instructions", "Summarize the text below."])
        .write_stdin("Rust is a systems language.\n")
        .assert()
        .success()
        .stdout("Summarize the text below.\n\nRust is a systems language.\n");
}

#[test]
fn transcribe_reports_missing_audio_file() {
    tool("cllm-transcribe")
        .args(["-f", "/definitely/not/here.mp3"])
        .assert()
        .failure()
        .stderr(contains("Audio file not found: /definitely/not/here.mp3"));
}
