//! Command-line interface

pub mod commands;
pub mod output;
pub mod terminal_output;

use clap::{Parser, Subcommand};
use commands::{AuditCommand, PlanCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Local runner for CI workflow files
#[derive(Debug, Parser, Clone)]
#[command(name = "ci-runner")]
#[command(version)]
#[command(about = "Run CI workflow files locally: triggers, matrix jobs and staged steps", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Stream step output live
    #[arg(short, long, global = true)]
    pub stream: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the jobs a workflow starts for an event
    Run(RunCommand),

    /// Show the jobs and stages a run would execute
    Plan(PlanCommand),

    /// Validate a workflow configuration
    Validate(ValidateCommand),

    /// Check stage order, lint configuration and exclusion paths
    Audit(AuditCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
