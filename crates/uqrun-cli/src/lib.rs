//! Command line front end for uqrun studies.
//!
//! Every subcommand takes `--config <study.yaml>`; relative paths in the
//! configuration resolve against the directory holding it.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

pub mod commands;

use commands::{
    clean::CleanArgs, collect::CollectArgs, generate::GenerateArgs, run::RunArgs,
    status::StatusArgs,
};

#[derive(Parser, Debug)]
#[command(name = "uqrun", about = "Run orchestrator for uncertainty quantification studies")]
pub struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sample the design of experiments and write the input file.
    Generate(GenerateArgs),
    /// Dispatch every point without a result row and collect its outputs.
    Run(RunArgs),
    /// Collect outputs from run directories that already finished.
    Collect(CollectArgs),
    /// Summarise the result store against the design.
    Status(StatusArgs),
    /// Remove run directories, the input file and the result store.
    Clean(CleanArgs),
}

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
