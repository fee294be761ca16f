use std::error::Error;

use clap::{Parser, Subcommand};
use commands::{
    inspect::{self, InspectArgs},
    resume::{self, ResumeArgs},
    run::{self, RunArgs},
    version::{self, VersionArgs},
};
use tracing_subscriber::EnvFilter;

mod campaign;
mod commands;

#[derive(Parser, Debug)]
#[command(name = "sva-sim", about = "Model-guided experiment campaign CLI")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a campaign from a YAML description.
    Run(RunArgs),
    /// Continue a saved campaign.
    Resume(ResumeArgs),
    /// Summarize a saved campaign.
    Inspect(InspectArgs),
    /// Print the engine version.
    Version(VersionArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => run::run(&args),
        Command::Resume(args) => resume::run(&args),
        Command::Inspect(args) => inspect::run(&args),
        Command::Version(args) => version::run(&args),
    }
}
