use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;
use serde_json::json;

use super::{CliError, read_stdin};
use crate::llm::images::DEFAULT_IMAGE_MODEL;
use crate::toolkit::ToolkitError;
use crate::toolkit::images::{ImageOptions, generate_all, parse_prompts, save_images};

#[derive(Debug, Args, Clone)]
pub struct ImageArgs {
    #[arg(short = 'm', long, default_value = DEFAULT_IMAGE_MODEL, help = "Image generation model")]
    pub model: String,
    #[arg(short = 's', long, default_value = "1024x1024", help = "Size of the generated images")]
    pub size: String,
    #[arg(short = 'q', long, default_value = "standard", help = "Quality of the generated images")]
    pub quality: String,
    #[arg(short = 'n', long, default_value_t = 1, help = "Images to generate per prompt")]
    pub number: u32,
    #[arg(long, visible_alias = "sp", default_value = "", help = "Style appended to every prompt")]
    pub style: String,
    #[arg(short = 'o', long = "output-dir", value_name = "DIR", help = "Directory to save generated images")]
    pub output_dir: Option<PathBuf>,
}

impl ImageArgs {
    fn options(&self) -> ImageOptions {
        ImageOptions {
            model: self.model.clone(),
            size: self.size.clone(),
            quality: self.quality.clone(),
            number: self.number,
            style: self.style.clone(),
        }
    }
}

async fn generate(args: &ImageArgs, input: &str) -> Result<String, ToolkitError> {
    let options = args.options();
    options.validate()?;

    let prompts = parse_prompts(input);
    let client = reqwest::Client::new();
    let urls = generate_all(&client, &prompts, &options).await;

    if let Some(dir) = &args.output_dir {
        save_images(&client, &urls, dir).await?;
    }
    Ok(serde_json::to_string(&urls)?)
}

/// Prints the JSON list of image URLs (`null` for failed prompts), or an
/// `{"error": ...}` object before failing.
pub async fn run(args: ImageArgs) -> Result<(), CliError> {
    let input = read_stdin()?;
    let mut stdout = io::stdout();
    match generate(&args, &input).await {
        Ok(json) => writeln!(stdout, "{json}").map_err(CliError::io("write output")),
        Err(err) => {
            writeln!(stdout, "{}", json!({ "error": err.to_string() }))
                .map_err(CliError::io("write output"))?;
            Err(err.into())
        }
    }
}
