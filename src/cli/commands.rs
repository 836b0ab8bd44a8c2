//! CLI command definitions

use crate::{
    core::{Event, EventKind, PlanOptions},
    execution::SchedulingStrategy,
};
use clap::Args;
use std::path::PathBuf;

/// Event the workflow is run for
#[derive(Debug, Args, Clone)]
pub struct EventArgs {
    /// Event name, e.g. push or pull_request
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Branch the event happened on
    #[arg(long, default_value = "master")]
    pub branch: String,
}

impl EventArgs {
    pub fn to_event(&self) -> Event {
        Event::new(EventKind::parse(&self.event), &self.branch)
    }
}

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    #[command(flatten)]
    pub event: EventArgs,

    /// Scheduling strategy for jobs
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Job limit for the parallel-limited strategy
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Workspace directory the steps run in
    #[arg(short, long, default_value = ".")]
    pub workdir: PathBuf,

    /// Default step timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Extra environment variables (KEY=VALUE)
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Only run matrix cells with this value (axis=value)
    #[arg(long, value_parser = parse_key_value)]
    pub matrix: Vec<(String, String)>,

    /// Only run the job with this key
    #[arg(long)]
    pub job: Option<String>,
}

impl RunCommand {
    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy.to_strategy(self.max_parallel)
    }

    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            job: self.job.clone(),
            matrix: self.matrix.clone(),
            workspace: self.workdir.clone(),
        }
    }
}

/// Show what a run would execute
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    #[command(flatten)]
    pub event: EventArgs,

    /// Only plan matrix cells with this value (axis=value)
    #[arg(long, value_parser = parse_key_value)]
    pub matrix: Vec<(String, String)>,

    /// Only plan the job with this key
    #[arg(long)]
    pub job: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

impl PlanCommand {
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            job: self.job.clone(),
            matrix: self.matrix.clone(),
            ..PlanOptions::default()
        }
    }
}

/// Validate a workflow configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Audit a workflow
#[derive(Debug, Args, Clone)]
pub struct AuditCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Workspace the exclusion paths are checked against
    #[arg(short, long, default_value = ".")]
    pub workdir: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl SchedulingStrategyArg {
    pub fn to_strategy(self, max_parallel: usize) -> SchedulingStrategy {
        match self {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(max_parallel),
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
