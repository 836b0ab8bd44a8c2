//! Workflow domain model: compiled configuration and planned runs

use crate::core::{
    config::{string_map, ConfigError, WorkflowConfig},
    context::{expression_keys, ExpressionContext},
    matrix::{MatrixCell, MatrixConfig, MatrixValues},
    state::{JobState, RunState},
    step::Step,
    trigger::{Event, TriggerSet},
};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Reasons a workflow produces no run for an event
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("event '{event}' on branch '{branch}' does not trigger this workflow")]
    NotTriggered { event: String, branch: String },

    #[error("no job matches the requested selection")]
    NoMatchingJobs,
}

/// A job as declared, before matrix expansion
#[derive(Debug, Clone)]
pub struct JobTemplate {
    /// Key under `jobs:`
    pub key: String,
    pub name: Option<String>,
    pub runs_on: Option<String>,
    pub env: IndexMap<String, String>,
    pub matrix: Option<MatrixConfig>,
    pub fail_fast: bool,
    pub max_parallel: Option<usize>,
    pub steps: Vec<Step>,
}

impl JobTemplate {
    /// Matrix cells of the job; a job without a matrix has one empty cell
    pub fn cells(&self) -> Vec<MatrixCell> {
        match &self.matrix {
            Some(matrix) => matrix.expand(),
            None => vec![MatrixCell::default()],
        }
    }
}

/// A compiled workflow definition
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub triggers: TriggerSet,
    pub env: IndexMap<String, String>,
    pub jobs: Vec<JobTemplate>,
}

/// Selection and environment for planning a run
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Only plan the job with this key
    pub job: Option<String>,
    /// Only plan matrix cells with these `axis=value` pairs
    pub matrix: Vec<(String, String)>,
    /// Directory the steps run in
    pub workspace: PathBuf,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            job: None,
            matrix: Vec::new(),
            workspace: PathBuf::from("."),
        }
    }
}

/// One instantiated job: a job template bound to a matrix cell
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique display id, e.g. `build (3.8)`
    pub id: String,
    /// Key of the template under `jobs:`
    pub key: String,
    pub matrix: MatrixValues,
    pub env: IndexMap<String, String>,
    pub steps: Vec<Step>,
    pub fail_fast: bool,
    pub context: ExpressionContext,
    pub state: JobState,
}

impl Job {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }
}

/// A planned run: every job produced by one triggering event
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub workflow_name: String,
    pub event: Event,
    pub workspace: PathBuf,
    /// Jobs in declaration order, then matrix order
    pub jobs: Vec<Job>,
    /// Smallest `max-parallel` among the planned jobs
    pub max_parallel: Option<usize>,
    pub state: RunState,
}

impl WorkflowRun {
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(|j| j.state.is_success())
    }
}

impl Workflow {
    /// Compile a validated configuration
    pub fn from_config(config: &WorkflowConfig) -> Result<Self, ConfigError> {
        let triggers = config.triggers()?;

        let jobs = config
            .jobs
            .iter()
            .map(|(key, job)| JobTemplate {
                key: key.clone(),
                name: job.name.clone(),
                runs_on: job
                    .runs_on
                    .as_ref()
                    .and_then(crate::core::config::scalar_to_string),
                env: string_map(&job.env),
                matrix: job.strategy.as_ref().map(|s| s.matrix.clone()),
                fail_fast: job.strategy.as_ref().is_some_and(|s| s.fail_fast),
                max_parallel: job.strategy.as_ref().and_then(|s| s.max_parallel),
                steps: job
                    .steps
                    .iter()
                    .enumerate()
                    .map(|(i, step)| Step::from_config(i, step, job.timeout_minutes))
                    .collect(),
            })
            .collect();

        Ok(Workflow {
            name: config.name.clone(),
            triggers,
            env: config.env_as_string_map(),
            jobs,
        })
    }

    pub fn job(&self, key: &str) -> Option<&JobTemplate> {
        self.jobs.iter().find(|j| j.key == key)
    }

    /// Instantiate the jobs an event starts
    ///
    /// Produces exactly one job per matrix cell of every selected job.
    pub fn plan(&self, event: &Event, options: &PlanOptions) -> Result<WorkflowRun, PlanError> {
        if !self.triggers.matches(event) {
            info!(
                "Workflow '{}' not triggered by {} on {}",
                self.name, event.kind, event.branch
            );
            return Err(PlanError::NotTriggered {
                event: event.kind.to_string(),
                branch: event.branch.clone(),
            });
        }

        let run_id = Uuid::new_v4();
        let mut jobs = Vec::new();
        let mut max_parallel: Option<usize> = None;

        for template in &self.jobs {
            if options.job.as_ref().is_some_and(|key| key != &template.key) {
                continue;
            }

            let mut planned = 0;
            for cell in template.cells() {
                if !options.matrix.is_empty() && !cell.matches(&options.matrix) {
                    debug!("Skipping {} cell {:?}", template.key, cell.values);
                    continue;
                }
                jobs.push(self.instantiate(template, &cell, event, options, run_id));
                planned += 1;
            }

            if planned > 0 {
                if let Some(limit) = template.max_parallel {
                    max_parallel = Some(max_parallel.map_or(limit, |m| m.min(limit)));
                }
            }
        }

        if jobs.is_empty() {
            return Err(PlanError::NoMatchingJobs);
        }
        make_ids_unique(&mut jobs);

        info!(
            "Planned {} job(s) for workflow '{}' ({})",
            jobs.len(),
            self.name,
            run_id
        );

        Ok(WorkflowRun {
            workflow_name: self.name.clone(),
            event: event.clone(),
            workspace: options.workspace.clone(),
            jobs,
            max_parallel,
            state: RunState::new(run_id),
        })
    }

    fn instantiate(
        &self,
        template: &JobTemplate,
        cell: &MatrixCell,
        event: &Event,
        options: &PlanOptions,
        run_id: Uuid,
    ) -> Job {
        let mut context = ExpressionContext::new();
        context.set("github", "event_name", event.kind.as_str());
        context.set("github", "ref", event.git_ref());
        context.set("github", "ref_name", event.branch.as_str());
        context.set("github", "run_id", run_id.to_string());
        context.set("github", "workspace", options.workspace.display().to_string());
        context.set("github", "job", template.key.as_str());
        context.set("runner", "os", std::env::consts::OS);
        context.set("runner", "temp", std::env::temp_dir().display().to_string());
        context.extend_scope("matrix", cell.values.iter());

        // Job env may reference the matrix, and steps may reference env
        let mut env = self.env.clone();
        for (key, value) in &template.env {
            env.insert(key.clone(), context.render(value));
        }
        context.extend_scope("env", env.iter());

        // A name that does not mention the matrix gets the cell label
        let id = match &template.name {
            Some(name) if cell.values.is_empty() || references_matrix(name) => context.render(name),
            Some(name) => format!("{} ({})", context.render(name), cell.label()),
            None if cell.values.is_empty() => template.key.clone(),
            None => format!("{} ({})", template.key, cell.label()),
        };

        let steps = template.steps.iter().map(|s| s.render(&context)).collect();

        Job {
            id,
            key: template.key.clone(),
            matrix: cell.values.clone(),
            env,
            steps,
            fail_fast: template.fail_fast,
            context,
            state: JobState::new(),
        }
    }
}

fn references_matrix(text: &str) -> bool {
    expression_keys(text).iter().any(|key| key.starts_with("matrix."))
}

/// Suffix repeated job ids with ` #2`, ` #3`, ... in plan order
fn make_ids_unique(jobs: &mut [Job]) {
    let mut seen: HashSet<String> = HashSet::new();
    for job in jobs.iter_mut() {
        if seen.insert(job.id.clone()) {
            continue;
        }
        let base = job.id.clone();
        let mut n = 2;
        while !seen.insert(format!("{} #{}", base, n)) {
            n += 1;
        }
        job.id = format!("{} #{}", base, n);
    }
}
