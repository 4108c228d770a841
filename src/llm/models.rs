use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Built-in model catalogue shown by `--list-models`.
pub const KNOWN_MODELS: &[&str] = &[
    "gpt-3.5-turbo",
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "gpt-4.1-mini",
    "o1",
    "o1-mini",
    "o3-mini",
    "text-embedding-3-small",
    "text-embedding-3-large",
    "dall-e-3",
    "whisper-1",
    "claude-3-haiku-20240307",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-5-sonnet-20241022",
    "claude-3-7-sonnet-20250219",
    "gemini-pro",
    "gemini-1.5-flash",
    "gemini-1.5-pro",
    "gemini-2.0-flash",
    "deepseek-chat",
    "deepseek-reasoner",
    "mistral/mistral-large-latest",
    "mistral/mistral-small-latest",
    "mistral/codestral-latest",
    "groq/llama-3.1-8b-instant",
    "groq/llama-3.3-70b-versatile",
    "groq/mixtral-8x7b-32768",
    "together_ai/meta-llama/Llama-3-70b-chat-hf",
    "together_ai/mistralai/Mixtral-8x7B-Instruct-v0.1",
    "fireworks_ai/accounts/fireworks/models/llama-v3p1-70b-instruct",
    "fireworks_ai/accounts/fireworks/models/kimi-k2-instruct",
    "openrouter/anthropic/claude-3.5-sonnet",
    "openrouter/meta-llama/llama-3.1-405b-instruct",
    "ollama/llama3",
    "ollama/mistral",
];

// First matching prefix wins. Prefixes ending in `-` also match anywhere in the name.
const PROVIDER_PREFIXES: &[(&str, &str)] = &[
    ("openai/", "OpenAI"),
    ("anthropic/", "Anthropic"),
    ("claude-", "Anthropic"),
    ("gpt-", "OpenAI"),
    ("google/", "Google"),
    ("gemini", "Google"),
    ("azure/", "Azure"),
    ("bedrock/", "AWS Bedrock"),
    ("cohere/", "Cohere"),
    ("command-", "Cohere"),
    ("replicate/", "Replicate"),
    ("huggingface/", "HuggingFace"),
    ("together_ai/", "Together AI"),
    ("palm/", "Google PaLM"),
    ("openrouter/", "OpenRouter"),
    ("vertex_ai/", "Vertex AI"),
    ("groq/", "Groq"),
    ("mistral/", "Mistral"),
    ("deepseek", "DeepSeek"),
    ("databricks/", "Databricks"),
    ("ollama/", "Ollama"),
    ("fireworks_ai/", "Fireworks AI"),
];

fn provider_label(model: &str) -> Option<&'static str> {
    PROVIDER_PREFIXES.iter().find_map(|(prefix, label)| {
        let matched = model.starts_with(prefix)
            || prefix
                .strip_suffix('-')
                .is_some_and(|stem| model.contains(stem));
        matched.then_some(*label)
    })
}

/// Groups models by provider; the second element holds uncategorised models.
pub fn categorize<'a>(models: &[&'a str]) -> (BTreeMap<&'static str, Vec<&'a str>>, Vec<&'a str>) {
    let mut sorted = models.to_vec();
    sorted.sort_unstable();

    let mut categorized: BTreeMap<&'static str, Vec<&'a str>> = BTreeMap::new();
    let mut uncategorized = Vec::new();
    for model in sorted {
        match provider_label(model) {
            Some(label) => categorized.entry(label).or_default().push(model),
            None => uncategorized.push(model),
        }
    }
    (categorized, uncategorized)
}

/// Renders the grep-friendly model listing, one model per line.
pub fn render_model_list(models: &[&str]) -> String {
    let (categorized, uncategorized) = categorize(models);
    let rule = "=".repeat(60);
    let mut out = String::new();

    let _ = writeln!(out, "Available Models ({} total)", models.len());
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out);

    for (provider, entries) in &categorized {
        let _ = writeln!(out, "{provider}:");
        for model in entries {
            let _ = writeln!(out, "  {model}");
        }
        let _ = writeln!(out);
    }

    if !uncategorized.is_empty() {
        let _ = writeln!(out, "Other Providers:");
        for model in &uncategorized {
            let _ = writeln!(out, "  {model}");
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "Tip: Use grep to filter models, e.g., 'cllm --list-models | grep gpt'"
    );
    out
}
