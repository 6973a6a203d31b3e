use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use tracing::info;

use super::{boxed, load_study};

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// YAML study configuration.
    #[arg(long)]
    pub config: PathBuf,
    /// Regenerate even when the input file already exists.
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: &GenerateArgs) -> Result<(), Box<dyn Error>> {
    let study = load_study(&args.config)?;
    let input = study.config().input_path();
    if input.exists() && !args.force {
        info!(path = %input.display(), "input file exists; pass --force to resample");
        return Ok(());
    }
    let points = study.generate().map_err(boxed)?;
    println!("{} points written to {}", points.len(), input.display());
    Ok(())
}
