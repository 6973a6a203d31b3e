use std::error::Error;
use std::io;
use std::path::PathBuf;

use clap::Args;
use uqrun_run::{HookRegistry, Study, StudyConfig};

use super::{boxed, print_report, require_complete};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML study configuration.
    #[arg(long)]
    pub config: PathBuf,
    /// Override the configured in-flight ceiling.
    #[arg(long)]
    pub max_in_flight: Option<usize>,
    /// Override the configured overall timeout, in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = StudyConfig::load(&args.config).map_err(boxed)?;
    if let Some(max_in_flight) = args.max_in_flight {
        config.max_in_flight = max_in_flight;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = Some(timeout);
    }
    let study = Study::new(config, HookRegistry::default()).map_err(boxed)?;
    let report = study.run(None).map_err(boxed)?;
    print_report(&mut io::stdout().lock(), &report, args.json)?;
    require_complete(&report)
}
