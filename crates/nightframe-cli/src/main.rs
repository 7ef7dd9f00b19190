//! NIGHTFRAME CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nightframe_cli::cli::{Cli, Commands};
use nightframe_cli::commands::{ChainCommand, LoadCommand, SimulateCommand};
use nightframe_cli::output::OutputFormat;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), nightframe_cli::CliError> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Simulate(args) => {
            SimulateCommand.execute(&mut stdout, &format, &args)?;
        }
        Commands::Chain(args) => {
            ChainCommand.execute(&mut stdout, &format, &args)?;
        }
        Commands::Load(args) => {
            LoadCommand::default().execute(&mut stdout, &format, &args)?;
        }
    }

    Ok(())
}
