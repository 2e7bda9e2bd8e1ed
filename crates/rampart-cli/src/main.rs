mod cli;
mod commands;
mod output;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    rampart::observability::init_tracing_with_level(&cli.log_level);
    let config = cli.config.as_deref();

    match &cli.command {
        Commands::Check(args) => {
            commands::check::check(config, args.catalog.as_deref())?;
        }
        Commands::List(args) => {
            commands::list::list(config, args.catalog.catalog.as_deref(), args.format)?;
        }
        Commands::Authorize(args) => {
            return commands::authorize::authorize(config, args);
        }
    }

    Ok(ExitCode::SUCCESS)
}
