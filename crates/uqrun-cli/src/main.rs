use std::error::Error;

use clap::Parser;
use uqrun_cli::commands::{clean, collect, generate, run, status};
use uqrun_cli::{init_logging, Cli, Command};

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Command::Generate(args) => generate::run(&args),
        Command::Run(args) => run::run(&args),
        Command::Collect(args) => collect::run(&args),
        Command::Status(args) => status::run(&args),
        Command::Clean(args) => clean::run(&args),
    }
}
