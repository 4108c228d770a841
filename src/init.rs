//! `cllm init`: scaffolds a `.cllm` directory from the bundled Cllmfile templates.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{CLLM_DIR_NAME, CLLMFILE_NAME, config_filename};
use crate::conversation::CONVERSATIONS_DIR;

const DEFAULT_TEMPLATE: &str = include_str!("../configs/Cllmfile.yml");

/// Named templates: (name, description, contents).
pub const NAMED_TEMPLATES: &[(&str, &str, &str)] = &[
    (
        "code-review",
        "GPT-4 configuration for code review with structured output",
        include_str!("../configs/code-review.Cllmfile.yml"),
    ),
    (
        "context-demo",
        "Demonstrates dynamic context injection",
        include_str!("../configs/context-demo.Cllmfile.yml"),
    ),
    (
        "creative",
        "Higher temperature for creative writing",
        include_str!("../configs/creative.Cllmfile.yml"),
    ),
    (
        "debug",
        "Configuration for debugging assistance",
        include_str!("../configs/debug.Cllmfile.yml"),
    ),
    (
        "extraction",
        "Data extraction with structured output",
        include_str!("../configs/extraction.Cllmfile.yml"),
    ),
    (
        "summarize",
        "Optimized for summarization tasks",
        include_str!("../configs/summarize.Cllmfile.yml"),
    ),
    (
        "task-parser",
        "Parse tasks from natural language",
        include_str!("../configs/task-parser.Cllmfile.yml"),
    ),
];

const GITIGNORE_ENTRIES: [&str; 2] = [".cllm/conversations/", ".cllm/*.log"];

#[derive(Debug, Error)]
pub enum InitError {
    #[error("Directory {0} already exists. Use --force to reinitialize.")]
    DirectoryExists(PathBuf),
    #[error("File {0} already exists. Use --force to overwrite.")]
    FileExists(PathBuf),
    #[error(
        "Template '{name}' not found. Available templates: {available}\nRun 'cllm init --list-templates' to see all templates."
    )]
    UnknownTemplate { name: String, available: String },
    #[error("Cannot determine home directory for global initialization")]
    NoHome,
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> InitError + '_ {
    move |source| InitError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn template_contents(name: Option<&str>) -> Result<&'static str, InitError> {
    let Some(name) = name else {
        return Ok(DEFAULT_TEMPLATE);
    };
    NAMED_TEMPLATES
        .iter()
        .find(|(candidate, _, _)| *candidate == name)
        .map(|(_, _, contents)| *contents)
        .ok_or_else(|| InitError::UnknownTemplate {
            name: name.to_string(),
            available: NAMED_TEMPLATES
                .iter()
                .map(|(name, _, _)| *name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

pub fn render_template_list() -> String {
    let mut out = String::from("Available templates:\n\n");
    for (name, description, _) in NAMED_TEMPLATES {
        out.push_str(&format!("  {name:<20} - {description}\n"));
    }
    out.push_str("\nUsage: cllm init --template <name>\n");
    out.push_str("       cllm init (uses default template)\n");
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitLocation {
    Global,
    Local,
    Custom,
}

impl InitLocation {
    pub fn label(self) -> &'static str {
        match self {
            InitLocation::Global => "global",
            InitLocation::Local => "local",
            InitLocation::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitRequest {
    pub global: bool,
    pub local: bool,
    pub cllm_path: Option<PathBuf>,
    pub template: Option<String>,
    pub force: bool,
}

impl InitRequest {
    /// Directories to initialise. A custom path wins; with neither flag the
    /// local directory is used.
    pub fn targets(
        &self,
        home: Option<&Path>,
        cwd: &Path,
    ) -> Result<Vec<(InitLocation, PathBuf)>, InitError> {
        if let Some(path) = &self.cllm_path {
            return Ok(vec![(InitLocation::Custom, path.clone())]);
        }
        let global = || {
            home.map(|home| (InitLocation::Global, home.join(CLLM_DIR_NAME)))
                .ok_or(InitError::NoHome)
        };
        let local = (InitLocation::Local, cwd.join(CLLM_DIR_NAME));
        match (self.global, self.local) {
            (true, true) => Ok(vec![global()?, local]),
            (true, false) => Ok(vec![global()?]),
            _ => Ok(vec![local]),
        }
    }
}

pub fn create_directory_structure(target: &Path, force: bool) -> Result<Vec<String>, InitError> {
    let mut messages = Vec::new();
    if target.exists() {
        if !force {
            return Err(InitError::DirectoryExists(target.to_path_buf()));
        }
        messages.push(format!(
            "Directory {} already exists (reinitializing)",
            target.display()
        ));
    } else {
        fs::create_dir_all(target).map_err(io_error(target))?;
        messages.push(format!("✓ Created {}/", target.display()));
    }

    let conversations = target.join(CONVERSATIONS_DIR);
    if conversations.exists() {
        messages.push(format!(
            "  {}/{CONVERSATIONS_DIR}/ already exists",
            target.display()
        ));
    } else {
        fs::create_dir_all(&conversations).map_err(io_error(&conversations))?;
        messages.push(format!(
            "✓ Created {}/{CONVERSATIONS_DIR}/",
            target.display()
        ));
    }
    Ok(messages)
}

/// Writes `Cllmfile.yml`, or `<name>.Cllmfile.yml` for a named template.
pub fn copy_template(
    target: &Path,
    template: Option<&str>,
    force: bool,
) -> Result<Vec<String>, InitError> {
    let file = target.join(config_filename(template));
    if file.exists() && !force {
        return Err(InitError::FileExists(file));
    }
    let contents = template_contents(template)?;
    fs::write(&file, contents).map_err(io_error(&file))?;

    let message = match template {
        None => format!("✓ Created {} with starter configuration", file.display()),
        Some(_) => format!("✓ Created {} as named configuration", file.display()),
    };
    Ok(vec![message])
}

/// Adds the conversation and log entries to `<cwd>/.gitignore`, once.
pub fn update_gitignore(cwd: &Path) -> Result<Vec<String>, InitError> {
    let path = cwd.join(".gitignore");
    if !path.exists() {
        let mut contents = String::from("# CLLM\n");
        for entry in GITIGNORE_ENTRIES {
            contents.push_str(entry);
            contents.push('\n');
        }
        fs::write(&path, contents).map_err(io_error(&path))?;
        return Ok(vec![
            "✓ Created .gitignore to exclude conversation history".to_string(),
        ]);
    }

    let existing = fs::read_to_string(&path).map_err(io_error(&path))?;
    let missing: Vec<&str> = GITIGNORE_ENTRIES
        .into_iter()
        .filter(|entry| !existing.lines().any(|line| line == *entry))
        .collect();
    if missing.is_empty() {
        return Ok(vec!["  .gitignore already contains CLLM entries".to_string()]);
    }

    let mut file = OpenOptions::new()
        .append(true)
        .open(&path)
        .map_err(io_error(&path))?;
    let mut block = String::from("\n# CLLM\n");
    for entry in missing {
        block.push_str(entry);
        block.push('\n');
    }
    file.write_all(block.as_bytes()).map_err(io_error(&path))?;
    Ok(vec![
        "✓ Updated .gitignore to exclude conversation history".to_string(),
    ])
}

pub fn next_steps(cllm_dir: &Path, template: Option<&str>) -> String {
    let dir = cllm_dir.display();
    let mut out = String::from("\nNext steps:\n");
    match template {
        Some(name) => {
            out.push_str(&format!("1. Review {dir}/{name}.Cllmfile.yml\n"));
            out.push_str("2. Set your API key: export OPENAI_API_KEY=\"sk-...\"\n");
            let example = match name {
                "code-review" => format!("git diff | cllm --config {name}"),
                "summarize" => format!("cat document.txt | cllm --config {name}"),
                "creative" => format!("echo \"Write a story about...\" | cllm --config {name}"),
                "debug" => format!("cat error.log | cllm --config {name}"),
                _ => format!("echo \"Hello\" | cllm --config {name}"),
            };
            out.push_str(&format!("3. Try it out: {example}\n"));
        }
        None => {
            out.push_str(&format!(
                "1. Edit {dir}/{CLLMFILE_NAME} to configure your defaults\n"
            ));
            out.push_str("2. Set your API key: export OPENAI_API_KEY=\"sk-...\"\n");
            out.push_str("3. Try it out: echo \"Hello\" | cllm\n");
        }
    }
    out
}

/// Initialises every target directory, writing progress to `out`.
pub fn initialize(
    request: &InitRequest,
    home: Option<&Path>,
    cwd: &Path,
    out: &mut dyn Write,
) -> Result<(), InitError> {
    let stdout_error = |source| InitError::Io {
        path: PathBuf::from("<stdout>"),
        source,
    };

    // Validate before touching the filesystem.
    template_contents(request.template.as_deref())?;

    for (location, dir) in request.targets(home, cwd)? {
        writeln!(
            out,
            "Initializing {} .cllm directory: {}\n",
            location.label(),
            dir.display()
        )
        .map_err(stdout_error)?;

        let mut messages = create_directory_structure(&dir, request.force)?;
        messages.extend(copy_template(&dir, request.template.as_deref(), request.force)?);
        if location != InitLocation::Global {
            messages.extend(update_gitignore(cwd)?);
        }
        for message in messages {
            writeln!(out, "{message}").map_err(stdout_error)?;
        }
        write!(out, "{}", next_steps(&dir, request.template.as_deref())).map_err(stdout_error)?;
        tracing::debug!(dir = %dir.display(), location = location.label(), "initialized cllm directory");
    }
    Ok(())
}
