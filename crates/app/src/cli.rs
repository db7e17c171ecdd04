use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::safety::{self, RunArgs, SafetyConfig};

/// Hand-proximity safety supervisor for a robot arm.
#[derive(Debug, Parser)]
#[command(name = "handguard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a supervised session against the simulated cell.
    Run(RunArgs),
}

pub fn handle_commands(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => safety::run(SafetyConfig::try_from(args)?),
    }
}
