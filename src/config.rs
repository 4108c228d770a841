//! Layered `Cllmfile.yml` discovery, loading and merging.
//!
//! Files are searched in `~/.cllm/`, `./.cllm/` and `./` (lowest to highest
//! precedence) and shallow-merged; CLI flags override the merged result.
//! A custom `.cllm` directory (`--cllm-path` / `CLLM_PATH`) replaces the
//! search chain entirely.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const CLLMFILE_NAME: &str = "Cllmfile.yml";
pub const CLLM_DIR_NAME: &str = ".cllm";

/// Merged configuration, kept untyped so unknown keys reach the provider.
pub type ConfigMap = Map<String, Value>;

static ENV_VAR_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").ok());

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Custom .cllm path does not exist: {0}")]
    CustomPathMissing(PathBuf),
    #[error("Custom .cllm path is not a directory: {0}")]
    CustomPathNotDir(PathBuf),
    #[error("Configuration '{name}' not found. Searched for {name}.Cllmfile.yml in: {searched}")]
    NamedConfigNotFound { name: String, searched: String },
    #[error("Error reading file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error parsing YAML file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Configuration file {0} must contain a YAML dictionary")]
    NotMapping(PathBuf),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Directories that take part in configuration discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocations {
    pub home: Option<PathBuf>,
    pub cwd: PathBuf,
    /// Custom `.cllm` directory; when set, only this directory is searched.
    pub base: Option<PathBuf>,
}

impl ConfigLocations {
    pub fn new(home: Option<PathBuf>, cwd: PathBuf, base: Option<PathBuf>) -> Self {
        Self { home, cwd, base }
    }

    /// Resolves locations from the process environment. The custom path comes
    /// from `--cllm-path` first, then `CLLM_PATH`.
    pub fn from_env(cli_base: Option<&Path>) -> Result<Self, ConfigError> {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let base = match cli_base {
            Some(path) => Some(path.to_path_buf()),
            None => env::var("CLLM_PATH")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        };

        if let Some(base) = &base {
            if !base.exists() {
                return Err(ConfigError::CustomPathMissing(base.clone()));
            }
            if !base.is_dir() {
                return Err(ConfigError::CustomPathNotDir(base.clone()));
            }
        }

        Ok(Self::new(dirs::home_dir(), cwd, base))
    }

    pub fn home_cllm_dir(&self) -> Option<PathBuf> {
        self.home.as_ref().map(|home| home.join(CLLM_DIR_NAME))
    }

    pub fn local_cllm_dir(&self) -> PathBuf {
        self.cwd.join(CLLM_DIR_NAME)
    }

    /// Directory used for templates, schemas, the vector index and other
    /// per-project assets: custom path > `./.cllm` (if present) > `~/.cllm`.
    pub fn resolve_cllm_dir(&self) -> PathBuf {
        if let Some(base) = &self.base {
            return base.clone();
        }
        let local = self.local_cllm_dir();
        if local.is_dir() {
            return local;
        }
        self.home_cllm_dir().unwrap_or(local)
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if let Some(base) = &self.base {
            return vec![base.clone()];
        }
        let mut dirs = Vec::with_capacity(3);
        if let Some(home) = self.home_cllm_dir() {
            dirs.push(home);
        }
        dirs.push(self.local_cllm_dir());
        dirs.push(self.cwd.clone());
        dirs
    }

    fn searched_description(&self) -> String {
        match &self.base {
            Some(base) => format!("{}/", base.display()),
            None => "~/.cllm/, ./.cllm/, ./".to_string(),
        }
    }

    /// Existing config files, lowest precedence first.
    pub fn find_config_files(&self, name: Option<&str>) -> Vec<PathBuf> {
        let filename = config_filename(name);
        self.search_dirs()
            .into_iter()
            .map(|dir| dir.join(&filename))
            .filter(|path| path.is_file())
            .collect()
    }

    /// Loads and shallow-merges every discovered file.
    pub fn load_config(&self, name: Option<&str>) -> Result<ConfigMap, ConfigError> {
        let files = self.find_config_files(name);
        if let Some(name) = name {
            if files.is_empty() {
                return Err(ConfigError::NamedConfigNotFound {
                    name: name.to_string(),
                    searched: self.searched_description(),
                });
            }
        }

        let mut merged = ConfigMap::new();
        for path in files {
            tracing::debug!(path = %path.display(), "loading configuration file");
            merged.extend(load_yaml_file(&path)?);
        }
        Ok(merged)
    }

    /// Paths that `load_config` would read, for `--show-config`.
    pub fn config_sources(&self, name: Option<&str>) -> Vec<String> {
        self.find_config_files(name)
            .into_iter()
            .map(|path| path.display().to_string())
            .collect()
    }
}

pub fn config_filename(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{name}.{CLLMFILE_NAME}"),
        None => CLLMFILE_NAME.to_string(),
    }
}

/// Parses one YAML file into a mapping with `${VAR}` references expanded.
pub fn load_yaml_file(path: &Path) -> Result<ConfigMap, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_yaml_config(&raw, path)
}

pub(crate) fn parse_yaml_config(raw: &str, path: &Path) -> Result<ConfigMap, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(ConfigMap::new());
    }
    let value: Value = serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    match interpolate_env_vars(value) {
        Value::Null => Ok(ConfigMap::new()),
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::NotMapping(path.to_path_buf())),
    }
}

/// Replaces `${VAR}` in every string of the value; unknown variables stay as-is.
pub fn interpolate_env_vars(value: Value) -> Value {
    interpolate_with(value, &|name| env::var(name).ok())
}

pub fn interpolate_with(value: Value, lookup: &dyn Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::String(text) => {
            let Some(pattern) = ENV_VAR_PATTERN.as_ref() else {
                return Value::String(text);
            };
            let replaced = pattern.replace_all(&text, |caps: &Captures<'_>| {
                lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| interpolate_with(item, lookup))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, interpolate_with(item, lookup)))
                .collect(),
        ),
        other => other,
    }
}

/// CLI values override file values; `null` CLI values are ignored.
pub fn merge_config_with_args(config: &ConfigMap, cli: ConfigMap) -> ConfigMap {
    let mut merged = config.clone();
    for (key, value) in cli {
        if !value.is_null() {
            merged.insert(key, value);
        }
    }
    merged
}

/// Typed view of the recognised Cllmfile keys. Everything else lands in
/// `extra` and is forwarded to the provider request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Cllmfile {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<u64>,
    pub num_retries: Option<u32>,
    pub stream: bool,
    pub raw_response: bool,
    pub default_system_message: Option<String>,
    pub json_schema: Option<Value>,
    pub json_schema_file: Option<String>,
    pub context_commands: Vec<Value>,
    pub variables: Map<String, Value>,
    pub prompt_template: Option<String>,
    pub dynamic_commands: Option<Value>,
    pub allow_dynamic_commands: bool,
    pub conversations_path: Option<String>,
    pub fallbacks: Vec<String>,
    pub api_base: Option<String>,
    pub debug: bool,
    pub json_logs: bool,
    pub log_file: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cllmfile {
    pub fn from_map(map: &ConfigMap) -> Result<Self, ConfigError> {
        serde_json::from_value(Value::Object(map.clone()))
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct Layout {
        home: TempDir,
        cwd: TempDir,
    }

    impl Layout {
        fn new() -> Self {
            Self {
                home: TempDir::new().expect("home dir"),
                cwd: TempDir::new().expect("cwd dir"),
            }
        }

        fn locations(&self) -> ConfigLocations {
            ConfigLocations::new(
                Some(self.home.path().to_path_buf()),
                self.cwd.path().to_path_buf(),
                None,
            )
        }

        fn write(&self, path: PathBuf, body: &str) {
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, body).expect("write config");
        }
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let layout = Layout::new();
        layout.write(
            layout.home.path().join(".cllm/Cllmfile.yml"),
            "model: gpt-4\ntemperature: 0.2\n",
        );
        layout.write(
            layout.cwd.path().join(".cllm/Cllmfile.yml"),
            "temperature: 0.5\nmax_tokens: 100\n",
        );
        layout.write(layout.cwd.path().join("Cllmfile.yml"), "max_tokens: 200\n");

        let config = layout.locations().load_config(None).expect("config loads");
        assert_eq!(config["model"], "gpt-4");
        assert_eq!(config["temperature"], 0.5);
        assert_eq!(config["max_tokens"], 200);
        assert_eq!(layout.locations().config_sources(None).len(), 3);
    }

    #[test]
    fn missing_named_config_is_an_error() {
        let layout = Layout::new();
        let err = layout
            .locations()
            .load_config(Some("summarize"))
            .expect_err("named config missing");
        assert_eq!(
            err.to_string(),
            "Configuration 'summarize' not found. Searched for summarize.Cllmfile.yml in: ~/.cllm/, ./.cllm/, ./"
        );
    }

    #[test]
    fn named_config_is_loaded_by_filename() {
        let layout = Layout::new();
        layout.write(
            layout.cwd.path().join("summarize.Cllmfile.yml"),
            "model: claude-3-haiku-20240307\n",
        );
        layout.write(layout.cwd.path().join("Cllmfile.yml"), "model: gpt-4\n");

        let config = layout
            .locations()
            .load_config(Some("summarize"))
            .expect("named config");
        assert_eq!(config["model"], "claude-3-haiku-20240307");
    }

    #[test]
    fn custom_base_replaces_search_chain() {
        let layout = Layout::new();
        let base = TempDir::new().expect("base dir");
        layout.write(layout.cwd.path().join("Cllmfile.yml"), "model: gpt-4\n");
        layout.write(base.path().join("Cllmfile.yml"), "model: gpt-4o\n");

        let locations = ConfigLocations::new(
            Some(layout.home.path().to_path_buf()),
            layout.cwd.path().to_path_buf(),
            Some(base.path().to_path_buf()),
        );
        let config = locations.load_config(None).expect("config loads");
        assert_eq!(config["model"], "gpt-4o");
        assert_eq!(locations.resolve_cllm_dir(), base.path());
    }

    #[test]
    fn cllm_dir_prefers_existing_local_directory() {
        let layout = Layout::new();
        let locations = layout.locations();
        assert_eq!(
            locations.resolve_cllm_dir(),
            layout.home.path().join(".cllm")
        );

        fs::create_dir_all(layout.cwd.path().join(".cllm")).expect("mkdir");
        assert_eq!(locations.resolve_cllm_dir(), layout.cwd.path().join(".cllm"));
    }

    #[test]
    fn empty_file_is_an_empty_mapping_and_lists_are_rejected() {
        let path = Path::new("Cllmfile.yml");
        assert!(parse_yaml_config("", path).expect("empty ok").is_empty());
        assert!(matches!(
            parse_yaml_config("- a\n- b\n", path),
            Err(ConfigError::NotMapping(_))
        ));
        assert!(matches!(
            parse_yaml_config("model: [unclosed\n", path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn env_vars_are_interpolated_recursively() {
        let lookup = |name: &str| (name == "API_HOST").then(|| "example.org".to_string());
        let value = json!({
            "api_base": "https://${API_HOST}/v1",
            "headers": ["x-${API_HOST}", "${MISSING_VAR}"],
            "count": 3
        });

        let result = interpolate_with(value, &lookup);
        assert_eq!(result["api_base"], "https://example.org/v1");
        assert_eq!(result["headers"][0], "x-example.org");
        assert_eq!(result["headers"][1], "${MISSING_VAR}");
        assert_eq!(result["count"], 3);
    }

    #[test]
    fn cli_values_override_but_nulls_do_not() {
        let mut config = ConfigMap::new();
        config.insert("model".into(), json!("gpt-4"));
        config.insert("temperature".into(), json!(0.2));

        let mut cli = ConfigMap::new();
        cli.insert("temperature".into(), json!(0.9));
        cli.insert("model".into(), Value::Null);

        let merged = merge_config_with_args(&config, cli);
        assert_eq!(merged["model"], "gpt-4");
        assert_eq!(merged["temperature"], 0.9);
    }

    #[test]
    fn typed_view_keeps_unknown_keys_for_the_provider() {
        let map = match json!({
            "model": "gpt-4o",
            "temperature": 0.3,
            "top_p": 0.9,
            "context_commands": [{ "name": "Date", "command": "date" }]
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let file = Cllmfile::from_map(&map).expect("typed view");
        assert_eq!(file.model(), "gpt-4o");
        assert_eq!(file.context_commands.len(), 1);
        assert_eq!(file.extra.get("top_p"), Some(&json!(0.9)));
        assert!(!file.extra.contains_key("model"));
        assert_eq!(Cllmfile::default().model(), DEFAULT_MODEL);
    }
}
