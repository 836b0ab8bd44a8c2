//! Command request and response types

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error types for command execution
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("failed to start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("unsupported action '{0}'")]
    UnsupportedAction(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for RunnerError {
    fn from(e: std::io::Error) -> Self {
        RunnerError::Io(e.to_string())
    }
}

/// A script to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Shell script body
    pub script: String,

    /// Environment variables set on top of the inherited environment
    pub env: IndexMap<String, String>,

    /// Working directory
    pub workdir: PathBuf,

    pub timeout: Option<Duration>,
}

impl CommandRequest {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            env: IndexMap::new(),
            workdir: PathBuf::from("."),
            timeout: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Native exit code of the command
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}
