//! Step domain model

use crate::core::{
    config::{string_map, StepConfig},
    context::ExpressionContext,
    stage::{classify_action, classify_script, ClassifiedCommand, StageKind},
    state::StepState,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepAction {
    /// Shell script body
    Run { script: String },
    /// Built-in action such as `actions/setup-python@v2`
    Uses {
        action: String,
        with: IndexMap<String, String>,
    },
}

/// A single step of a job
#[derive(Debug, Clone)]
pub struct Step {
    /// Position within the job
    pub index: usize,

    pub id: Option<String>,

    /// Display name
    pub name: String,

    pub action: StepAction,

    /// Step-level environment variables
    pub env: IndexMap<String, String>,

    /// Failure is recorded but does not stop the job
    pub continue_on_error: bool,

    pub timeout_secs: Option<u64>,

    /// Directory, relative to the workspace, to run in
    pub working_directory: Option<String>,

    /// Recognised commands of a `run:` body
    pub commands: Vec<ClassifiedCommand>,

    /// Runtime state
    pub state: StepState,
}

impl Step {
    /// Create a step from its config; expressions are left unrendered
    pub fn from_config(index: usize, config: &StepConfig, job_timeout_minutes: Option<u64>) -> Self {
        let action = match (&config.uses, &config.run) {
            (Some(uses), _) => StepAction::Uses {
                action: uses.clone(),
                with: string_map(&config.with),
            },
            (None, run) => StepAction::Run {
                script: run.clone().unwrap_or_default(),
            },
        };

        let mut step = Step {
            index,
            id: config.id.clone(),
            name: config.display_name(),
            action,
            env: string_map(&config.env),
            continue_on_error: config.continue_on_error,
            timeout_secs: config.timeout_minutes.or(job_timeout_minutes).map(|m| m * 60),
            working_directory: config.working_directory.clone(),
            commands: Vec::new(),
            state: StepState::Pending,
        };
        step.classify();
        step
    }

    /// Copy of the step with every expression rendered against `context`
    pub fn render(&self, context: &ExpressionContext) -> Self {
        let action = match &self.action {
            StepAction::Run { script } => StepAction::Run {
                script: context.render(script),
            },
            StepAction::Uses { action, with } => StepAction::Uses {
                action: action.clone(),
                with: with
                    .iter()
                    .map(|(k, v)| (k.clone(), context.render(v)))
                    .collect(),
            },
        };

        let mut step = Step {
            index: self.index,
            id: self.id.clone(),
            name: context.render(&self.name),
            action,
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), context.render(v)))
                .collect(),
            continue_on_error: self.continue_on_error,
            timeout_secs: self.timeout_secs,
            working_directory: self.working_directory.as_deref().map(|d| context.render(d)),
            commands: Vec::new(),
            state: StepState::Pending,
        };
        step.classify();
        step
    }

    fn classify(&mut self) {
        self.commands = match &self.action {
            StepAction::Run { script } => classify_script(script),
            StepAction::Uses { .. } => Vec::new(),
        };
    }

    /// Stage of every recognised command, in order
    pub fn stages(&self) -> Vec<StageKind> {
        match &self.action {
            StepAction::Uses { action, .. } => vec![classify_action(action)],
            StepAction::Run { .. } => self.commands.iter().map(|c| c.kind).collect(),
        }
    }

    /// The stage the step is attributed to: its first ranked stage
    pub fn stage(&self) -> StageKind {
        let stages = self.stages();
        stages
            .iter()
            .copied()
            .find(|s| s.rank().is_some())
            .or_else(|| stages.first().copied())
            .unwrap_or(StageKind::Other)
    }

    /// Script body of a `run:` step
    pub fn script(&self) -> Option<&str> {
        match &self.action {
            StepAction::Run { script } => Some(script),
            StepAction::Uses { .. } => None,
        }
    }
}
