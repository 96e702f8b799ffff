// puc/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use puc_common::error::Result;
use puc_common::Config;

pub mod ranges;
pub mod run;
pub mod status;

use crate::cli::ranges::Ranges;
use crate::cli::run::RunArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "puc", bin_name = "puc")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a scenario file through a container
    Run(RunArgs),
    /// Intersect version ranges
    Ranges(Ranges),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Run(command) => command.run(config).await,
            Self::Ranges(command) => command.run(),
        }
    }
}
