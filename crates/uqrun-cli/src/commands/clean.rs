use std::error::Error;
use std::path::PathBuf;

use clap::Args;

use super::{boxed, load_study};

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// YAML study configuration.
    #[arg(long)]
    pub config: PathBuf,
}

pub fn run(args: &CleanArgs) -> Result<(), Box<dyn Error>> {
    let study = load_study(&args.config)?;
    for path in study.clean().map_err(boxed)? {
        println!("removed {}", path.display());
    }
    Ok(())
}
