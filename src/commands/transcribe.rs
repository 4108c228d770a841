use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;

use super::CliError;
use crate::llm::audio::{DEFAULT_TRANSCRIPTION_MODEL, transcribe};

#[derive(Debug, Args, Clone)]
pub struct TranscribeArgs {
    #[arg(
        short = 'f',
        long = "audio-file",
        alias = "audio_file",
        value_name = "PATH",
        help = "Path to the audio file for transcription"
    )]
    pub audio_file: PathBuf,
    #[arg(short = 'm', long, default_value = DEFAULT_TRANSCRIPTION_MODEL, help = "Transcription model")]
    pub model: String,
}

pub async fn run(args: TranscribeArgs) -> Result<(), CliError> {
    let text = transcribe(&args.audio_file, &args.model).await?;
    writeln!(io::stdout(), "{text}").map_err(CliError::io("write output"))
}
