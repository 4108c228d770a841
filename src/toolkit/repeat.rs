use std::env;
use std::process::Stdio;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::ToolkitError;

/// Program run per item: `CLLM_BIN` when set, otherwise `cllm` from `PATH`.
pub fn cllm_program() -> String {
    env::var("CLLM_BIN")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "cllm".to_string())
}

/// Items of a JSON array; non-string items are passed as compact JSON.
pub fn parse_items(raw: &str) -> Result<Vec<String>, ToolkitError> {
    let items: Vec<Value> = serde_json::from_str(raw)?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(text) => text,
            other => other.to_string(),
        })
        .collect())
}

async fn run_once(program: &str, args: &[String], input: &str) -> Value {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(err) => return Value::String(format!("Error: {err}")),
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(err) = stdin.write_all(input.as_bytes()).await {
            tracing::warn!(error = %err, "failed to write item to stdin");
        }
    }

    let output = match child.wait_with_output().await {
        Ok(output) => output,
        Err(err) => return Value::String(format!("Error: {err}")),
    };
    if !output.status.success() {
        tracing::warn!(
            status = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "repeat run failed"
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    serde_json::from_str(&stdout).unwrap_or(Value::String(stdout))
}

/// Runs `program args` once per item, in order, feeding the item on stdin.
/// JSON output is kept parsed; anything else is kept as raw text.
pub async fn repeat(program: &str, args: &[String], items: &[String]) -> Vec<Value> {
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(run_once(program, args, item).await);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn items_may_be_any_json() {
        assert_eq!(
            parse_items(r#"["a", {"b": 1}, 2]"#).expect("items"),
            vec!["a", "{\"b\":1}", "2"]
        );
        assert!(parse_items("not json").is_err());
    }

    #[tokio::test]
    async fn collects_json_or_raw_output() {
        let items = vec!["{\"a\": 1}".to_string(), "hello".to_string()];
        let results = repeat("cat", &[], &items).await;
        assert_eq!(results, vec![json!({ "a": 1 }), json!("hello")]);
    }

    #[tokio::test]
    async fn missing_program_is_reported_inline() {
        let results = repeat("cllm-definitely-missing-binary", &[], &["x".to_string()]).await;
        assert!(results[0].as_str().expect("string").starts_with("Error: "));
    }
}
