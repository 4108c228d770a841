use std::io::{self, Write};

use clap::Args;
use serde_json::{Map, Value};

use super::{CliError, read_stdin};
use crate::toolkit::split::{
    DOCUMENT_CHUNK_OVERLAP, DOCUMENT_CHUNK_SIZE, Splitter, TEXT_CHUNK_OVERLAP, TEXT_CHUNK_SIZE,
};
use crate::toolkit::{ToolkitError, documents_to_json, parse_documents};

#[derive(Debug, Args, Clone, Default)]
pub struct SplitArgs {
    #[arg(
        short = 's',
        long = "chunk-size",
        alias = "chunk_size",
        help = "Size of each chunk (default: 100, or 1000 with --documents)"
    )]
    pub chunk_size: Option<usize>,
    #[arg(
        short = 'o',
        long = "chunk-overlap",
        alias = "chunk_overlap",
        help = "Characters shared between neighbouring chunks (default: 20, or 10 with --documents)"
    )]
    pub chunk_overlap: Option<usize>,
    #[arg(
        short = 'm',
        long,
        value_name = "JSON",
        conflicts_with = "documents",
        help = "Metadata object attached to every chunk"
    )]
    pub metadata: Option<String>,
    #[arg(short = 'd', long, help = "Read a JSON document list instead of plain text")]
    pub documents: bool,
}

fn parse_metadata(raw: Option<&str>) -> Result<Map<String, Value>, ToolkitError> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ToolkitError::InvalidOption(format!(
            "Metadata must be a JSON object, got {other}"
        ))),
    }
}

/// Splits `input` and returns the chunk documents as JSON.
pub fn split(args: &SplitArgs, input: &str) -> Result<String, ToolkitError> {
    if args.documents {
        let splitter = Splitter::new(
            args.chunk_size.unwrap_or(DOCUMENT_CHUNK_SIZE),
            args.chunk_overlap.unwrap_or(DOCUMENT_CHUNK_OVERLAP),
        )?;
        let chunks = splitter.split_documents(&parse_documents(input)?);
        return documents_to_json(&chunks, true);
    }

    let splitter = Splitter::new(
        args.chunk_size.unwrap_or(TEXT_CHUNK_SIZE),
        args.chunk_overlap.unwrap_or(TEXT_CHUNK_OVERLAP),
    )?;
    let metadata = parse_metadata(args.metadata.as_deref())?;
    documents_to_json(&splitter.split_with_metadata(input, &metadata), false)
}

pub fn run(args: SplitArgs) -> Result<(), CliError> {
    let input = read_stdin()?;
    let json = split(&args, &input)?;
    writeln!(io::stdout(), "{json}").map_err(CliError::io("write output"))
}
