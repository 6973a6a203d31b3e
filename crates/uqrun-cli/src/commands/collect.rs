use std::error::Error;
use std::io;
use std::path::PathBuf;

use clap::Args;

use super::{boxed, load_study, print_report, require_complete};

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// YAML study configuration.
    #[arg(long)]
    pub config: PathBuf,
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &CollectArgs) -> Result<(), Box<dyn Error>> {
    let study = load_study(&args.config)?;
    let report = study.collect().map_err(boxed)?;
    print_report(&mut io::stdout().lock(), &report, args.json)?;
    require_complete(&report)
}
