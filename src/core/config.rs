//! Workflow configuration from YAML

use crate::core::{
    context::expression_keys,
    matrix::MatrixConfig,
    trigger::TriggerSet,
    workflow::Workflow,
};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use thiserror::Error;

/// Reasons a workflow configuration is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("workflow has no trigger events")]
    NoTriggers,

    #[error("invalid trigger definition: {0}")]
    InvalidTrigger(String),

    #[error("invalid branch pattern '{pattern}': {reason}")]
    InvalidBranchPattern { pattern: String, reason: String },

    #[error("workflow has no jobs")]
    NoJobs,

    #[error("job '{0}' has no steps")]
    EmptyJob(String),

    #[error("job '{job}': {reason}")]
    InvalidMatrix { job: String, reason: String },

    #[error("job '{job}' step {index}: {reason}")]
    InvalidStep {
        job: String,
        index: usize,
        reason: String,
    },

    #[error("job '{job}' references undefined matrix axis '{axis}'")]
    UndefinedMatrixAxis { job: String, axis: String },
}

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    #[serde(default = "default_workflow_name")]
    pub name: String,

    /// Trigger events, kept raw because `on:` takes several shapes
    #[serde(rename = "on", default)]
    pub on: Value,

    /// Workflow-wide environment variables
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Jobs in declaration order
    #[serde(default)]
    pub jobs: IndexMap<String, JobConfig>,
}

fn default_workflow_name() -> String {
    "workflow".to_string()
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobConfig {
    /// Display name, may reference `${{ matrix.* }}`
    #[serde(default)]
    pub name: Option<String>,

    /// Runner label; informational for local runs
    #[serde(default)]
    pub runs_on: Option<Value>,

    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    /// Job-level environment variables
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<StepConfig>,

    /// Timeout applied to each step of the job (in minutes)
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}

/// Matrix strategy for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrategyConfig {
    #[serde(default)]
    pub matrix: MatrixConfig,

    /// Cancel sibling matrix jobs once one fails
    #[serde(default)]
    pub fail_fast: bool,

    /// Maximum number of matrix jobs running at once
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepConfig {
    /// Step identifier
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Action reference, e.g. `actions/setup-python@v2`
    #[serde(default)]
    pub uses: Option<String>,

    /// Action inputs
    #[serde(default)]
    pub with: IndexMap<String, Value>,

    /// Shell script body
    #[serde(default)]
    pub run: Option<String>,

    /// Step-level environment variables
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Keep the job going when this step fails
    #[serde(default)]
    pub continue_on_error: bool,

    #[serde(default)]
    pub timeout_minutes: Option<u64>,

    /// Directory, relative to the workspace, to run the script in
    #[serde(default)]
    pub working_directory: Option<String>,
}

impl StepConfig {
    /// Display name, falling back to the action or the first script line
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(uses) = &self.uses {
            return format!("Run {}", uses);
        }
        let first_line = self
            .run
            .as_deref()
            .and_then(|r| r.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("");
        format!("Run {}", first_line)
    }
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig =
            serde_yaml::from_str(yaml).context("Failed to parse workflow YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let triggers = self.triggers()?;
        if triggers.is_empty() {
            return Err(ConfigError::NoTriggers);
        }

        if self.jobs.is_empty() {
            return Err(ConfigError::NoJobs);
        }

        for (job_id, job) in &self.jobs {
            if job.steps.is_empty() {
                return Err(ConfigError::EmptyJob(job_id.clone()));
            }

            let axes = match &job.strategy {
                Some(strategy) => {
                    strategy.matrix.validate().map_err(|reason| ConfigError::InvalidMatrix {
                        job: job_id.clone(),
                        reason,
                    })?;
                    strategy.matrix.keys()
                }
                None => Vec::new(),
            };

            for (index, step) in job.steps.iter().enumerate() {
                match (&step.uses, &step.run) {
                    (Some(_), Some(_)) => {
                        return Err(ConfigError::InvalidStep {
                            job: job_id.clone(),
                            index,
                            reason: "a step cannot have both 'uses' and 'run'".to_string(),
                        })
                    }
                    (None, None) => {
                        return Err(ConfigError::InvalidStep {
                            job: job_id.clone(),
                            index,
                            reason: "a step needs either 'uses' or 'run'".to_string(),
                        })
                    }
                    _ => {}
                }
            }

            for text in job_texts(job) {
                for key in expression_keys(&text) {
                    if let Some(axis) = key.strip_prefix("matrix.") {
                        if !axes.iter().any(|a| a == axis) {
                            return Err(ConfigError::UndefinedMatrixAxis {
                                job: job_id.clone(),
                                axis: axis.to_string(),
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Parse the `on:` block into a trigger set
    pub fn triggers(&self) -> Result<TriggerSet, ConfigError> {
        TriggerSet::from_value(&self.on)
    }

    /// Workflow-wide environment as strings
    pub fn env_as_string_map(&self) -> IndexMap<String, String> {
        string_map(&self.env)
    }

    /// Compile the configuration into the workflow domain model
    pub fn to_workflow(&self) -> Result<Workflow, ConfigError> {
        Workflow::from_config(self)
    }
}

/// Every user-authored text of a job that may contain expressions
fn job_texts(job: &JobConfig) -> Vec<String> {
    let mut texts = Vec::new();
    texts.extend(job.name.clone());
    texts.extend(job.env.values().filter_map(scalar_to_string));
    for step in &job.steps {
        texts.extend(step.name.clone());
        texts.extend(step.run.clone());
        texts.extend(step.with.values().filter_map(scalar_to_string));
        texts.extend(step.env.values().filter_map(scalar_to_string));
        texts.extend(step.working_directory.clone());
    }
    texts
}

/// Render a scalar YAML value as a string
///
/// Mappings and sequences have no scalar form and yield `None`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Convert a YAML map with scalar values to a string map
pub fn string_map(map: &IndexMap<String, Value>) -> IndexMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
        .collect()
}
