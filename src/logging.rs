//! Tracing subscriber setup shared by every binary.
//!
//! Logs always go to stderr (or a file) so stdout stays clean for pipes.

use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const DEBUG_WARNING: &str =
    "⚠️  Debug mode enabled: logs may include API keys and sensitive data.";
const DEFAULT_LEVEL: &str = "warn";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub debug: bool,
    pub json: bool,
    pub log_file: Option<PathBuf>,
}

pub fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

impl LogSettings {
    /// CLI flags win, then `CLLM_DEBUG`/`CLLM_JSON_LOGS`/`CLLM_LOG_FILE`,
    /// then the Cllmfile values.
    pub fn resolve(cli: LogSettings, config: LogSettings) -> Self {
        let log_file = cli
            .log_file
            .or_else(|| {
                env::var("CLLM_LOG_FILE")
                    .ok()
                    .filter(|value| !value.trim().is_empty())
                    .map(|value| expand_home(value.trim()))
            })
            .or(config.log_file);
        Self {
            debug: cli.debug || env_flag("CLLM_DEBUG") || config.debug,
            json: cli.json || env_flag("CLLM_JSON_LOGS") || config.json,
            log_file,
        }
    }

    pub fn from_config(debug: Option<bool>, json: Option<bool>, log_file: Option<&str>) -> Self {
        Self {
            debug: debug.unwrap_or(false),
            json: json.unwrap_or(false),
            log_file: log_file.map(expand_home),
        }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn filter_for(settings: &LogSettings) -> EnvFilter {
    if settings.debug {
        return EnvFilter::new("debug");
    }
    env::var("CLLM_LOGLEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LEVEL))
}

/// Installs the global subscriber. Calling it twice is harmless; the second
/// call is ignored.
pub fn init(settings: &LogSettings) -> Result<(), String> {
    if settings.debug {
        eprintln!("{DEBUG_WARNING}");
    }

    let writer = match &settings.log_file {
        Some(path) => {
            let file = open_log_file(path)
                .map_err(|err| format!("Cannot open log file {}: {err}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let ansi = settings.log_file.is_none();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(settings))
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false);

    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = result {
        tracing::debug!(error = %err, "tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cli_settings_take_precedence() {
        let cli = LogSettings {
            debug: true,
            json: false,
            log_file: Some(PathBuf::from("/tmp/cli.log")),
        };
        let config = LogSettings::from_config(Some(false), Some(true), Some("/tmp/config.log"));
        let resolved = LogSettings::resolve(cli, config);
        assert!(resolved.debug);
        assert!(resolved.json);
        assert_eq!(resolved.log_file, Some(PathBuf::from("/tmp/cli.log")));
    }

    #[test]
    fn home_prefix_is_expanded() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/logs/cllm.log"), home.join("logs/cllm.log"));
        }
        assert_eq!(expand_home("/var/log/x"), PathBuf::from("/var/log/x"));
    }

    #[cfg(unix)]
    #[test]
    fn log_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/cllm.log");
        open_log_file(&path).expect("open");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
