use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};

use super::{CliError, read_stdin};
use crate::config::ConfigLocations;
use crate::toolkit::vector::{
    DEFAULT_RESULTS, NO_DOCUMENTS, index_path, save_documents, search_documents,
};
use crate::toolkit::{ToolkitError, documents_to_json, parse_documents};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Similarity search for QUERY.
    Read,
    /// Embed JSON documents from stdin and add them to the index.
    Save,
}

#[derive(Debug, Args, Clone)]
pub struct VectorArgs {
    #[arg(short = 'i', long, value_name = "NAME", help = "Name of the vector index")]
    pub index: String,
    #[arg(
        short = 'm',
        long,
        help = "Embedding model (default: the index's own model, or text-embedding-3-small for a new index)"
    )]
    pub model: Option<String>,
    #[arg(
        short = 'k',
        long,
        default_value_t = DEFAULT_RESULTS,
        help = "Number of documents to return"
    )]
    pub results: usize,
    #[arg(long = "cllm-dir", value_name = "PATH", help = "Path to the .cllm directory")]
    pub cllm_dir: Option<PathBuf>,
    #[arg(long = "api-base", value_name = "URL", help = "Override the embeddings base URL")]
    pub api_base: Option<String>,
    #[arg(value_enum)]
    pub operation: Operation,
    #[arg(help = "Query string to search for")]
    pub query: Option<String>,
}

pub async fn run_with(
    args: VectorArgs,
    cllm_dir: &Path,
    stdin: impl FnOnce() -> Result<String, CliError>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let path = index_path(cllm_dir, &args.index);
    let model = args.model.as_deref();

    match args.operation {
        Operation::Save => {
            let documents = parse_documents(&stdin()?)?;
            let total = save_documents(model, args.api_base.clone(), &path, documents).await?;
            tracing::info!(index = %args.index, total, "documents in the index");
            Ok(())
        }
        Operation::Read => {
            let query = args
                .query
                .as_deref()
                .filter(|query| !query.trim().is_empty())
                .ok_or(ToolkitError::MissingQuery)?;
            let documents =
                search_documents(model, args.api_base.clone(), &path, query, args.results).await?;
            let text = if documents.is_empty() {
                NO_DOCUMENTS.to_string()
            } else {
                documents_to_json(&documents, false)?
            };
            writeln!(out, "{text}").map_err(CliError::io("write output"))
        }
    }
}

pub async fn run(args: VectorArgs) -> Result<(), CliError> {
    let cllm_dir = match &args.cllm_dir {
        Some(dir) => dir.clone(),
        None => ConfigLocations::from_env(None)?.resolve_cllm_dir(),
    };
    run_with(args, &cllm_dir, read_stdin, &mut io::stdout()).await
}
