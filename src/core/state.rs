//! Execution state models

use crate::core::stage::StageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall run or job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Not started
    Pending,
    /// Currently running
    Running,
    /// Completed successfully
    Completed,
    /// Failed
    Failed,
    /// Aborted by the user or by a failing sibling job
    Cancelled,
}

/// Result of a completed step, before `continue-on-error` is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failure,
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Step is waiting for earlier steps
    Pending,
    /// Step is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Step finished without failing the job
    ///
    /// A step allowed to fail keeps its non-zero exit code with a
    /// `Failure` outcome.
    Completed {
        exit_code: i32,
        outcome: StepOutcome,
        output: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed the job
    Failed {
        exit_code: i32,
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step never ran
    Skipped {
        reason: String,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    /// Exit code of a step that ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StepState::Completed { exit_code, .. } | StepState::Failed { exit_code, .. } => {
                Some(*exit_code)
            }
            _ => None,
        }
    }
}

/// Category of a job failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The requested interpreter could not be provisioned
    Provisioning,
    /// The manifest or a pinned package could not be resolved
    DependencyResolution,
    /// The strict lint pass found a disallowed defect
    StaticDefect,
    /// A collected test failed or errored
    TestFailure,
    /// Any other command failed
    Command,
    /// A step ran past its timeout
    Timeout,
    /// The job was aborted
    Cancelled,
}

impl FailureKind {
    /// Failure category implied by the stage a failing step belongs to
    pub fn from_stage(stage: StageKind) -> Self {
        match stage {
            StageKind::Setup => FailureKind::Provisioning,
            StageKind::Install => FailureKind::DependencyResolution,
            StageKind::StrictLint | StageKind::LenientLint => FailureKind::StaticDefect,
            StageKind::Test => FailureKind::TestFailure,
            StageKind::Checkout | StageKind::Other => FailureKind::Command,
        }
    }
}

/// The step that ended a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub step: String,
    pub kind: FailureKind,
    pub exit_code: i32,
}

/// Execution state of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Exit code of the first failing step, 0 when every step succeeded
    pub exit_code: i32,
    pub failure: Option<JobFailure>,
}

impl JobState {
    pub fn new() -> Self {
        Self {
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            exit_code: 0,
            failure: None,
        }
    }

    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Record the first failure; later calls keep the original one
    pub fn fail(&mut self, failure: JobFailure) {
        if self.failure.is_none() {
            self.exit_code = failure.exit_code;
            self.failure = Some(failure);
        }
        self.status = if matches!(
            self.failure.as_ref().map(|f| f.kind),
            Some(FailureKind::Cancelled)
        ) {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    pub status: ExecutionStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of jobs
    pub total_jobs: usize,

    /// Number of jobs that succeeded
    pub completed_jobs: usize,

    /// Number of jobs that failed or were cancelled
    pub failed_jobs: usize,

    /// Exit code of the first failed job in plan order
    pub exit_code: i32,
}

impl RunState {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            exit_code: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Mark run as finished with the final status and exit code
    pub fn finish(&mut self, status: ExecutionStatus, exit_code: i32) {
        self.status = status;
        self.exit_code = exit_code;
        self.completed_at = Some(Utc::now());
    }

    /// Fraction of finished jobs (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_jobs == 0 {
            return 0.0;
        }
        (self.completed_jobs + self.failed_jobs) as f64 / self.total_jobs as f64
    }
}
