use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;

use super::{CliError, read_stdin};
use crate::toolkit::load::{DEFAULT_GLOB, load_directory, load_files, parse_file_list};
use crate::toolkit::split::{DOCUMENT_CHUNK_OVERLAP, DOCUMENT_CHUNK_SIZE, Splitter};
use crate::toolkit::{ToolkitError, documents_to_json};

#[derive(Debug, Args, Clone)]
pub struct LoadArgs {
    #[arg(
        value_name = "FILES",
        conflicts_with = "directory",
        help = "JSON list of files to load (read from stdin when omitted)"
    )]
    pub files: Option<String>,
    #[arg(short = 'd', long, value_name = "DIR", help = "Load every matching file under DIR")]
    pub directory: Option<PathBuf>,
    #[arg(
        short = 'g',
        long = "glob",
        alias = "glob_pattern",
        default_value = DEFAULT_GLOB,
        help = "Glob pattern used with --directory"
    )]
    pub glob_pattern: String,
    #[arg(
        short = 's',
        long = "chunk-size",
        alias = "chunk_size",
        default_value_t = DOCUMENT_CHUNK_SIZE,
        help = "Size of each chunk"
    )]
    pub chunk_size: usize,
    #[arg(
        short = 'o',
        long = "chunk-overlap",
        alias = "chunk_overlap",
        default_value_t = DOCUMENT_CHUNK_OVERLAP,
        help = "Characters shared between neighbouring chunks"
    )]
    pub chunk_overlap: usize,
    #[arg(
        short = 'f',
        long = "output-file",
        alias = "output_file",
        value_name = "PATH",
        help = "Also write the JSON documents to PATH"
    )]
    pub output_file: Option<PathBuf>,
}

impl Default for LoadArgs {
    fn default() -> Self {
        Self {
            files: None,
            directory: None,
            glob_pattern: DEFAULT_GLOB.to_string(),
            chunk_size: DOCUMENT_CHUNK_SIZE,
            chunk_overlap: DOCUMENT_CHUNK_OVERLAP,
            output_file: None,
        }
    }
}

/// Loads the requested files into chunk documents. `stdin` supplies the file
/// list when neither a list argument nor a directory is given.
pub fn load(args: &LoadArgs, stdin: impl FnOnce() -> Result<String, CliError>) -> Result<String, CliError> {
    let splitter = Splitter::new(args.chunk_size, args.chunk_overlap)?;
    let documents = match (&args.directory, &args.files) {
        (Some(dir), _) => load_directory(dir, &args.glob_pattern, &splitter)?,
        (None, Some(files)) => load_files(&parse_file_list(files)?, &splitter)?,
        (None, None) => load_files(&parse_file_list(&stdin()?)?, &splitter)?,
    };
    let json = documents_to_json(&documents, true)?;

    if let Some(path) = &args.output_file {
        fs::write(path, &json).map_err(ToolkitError::io(path))?;
        tracing::info!(path = %path.display(), "JSON data saved");
    }
    Ok(json)
}

pub fn run(args: LoadArgs) -> Result<(), CliError> {
    let json = load(&args, read_stdin)?;
    writeln!(io::stdout(), "{json}").map_err(CliError::io("write output"))
}
