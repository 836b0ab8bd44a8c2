//! Disposable per-job environment

use crate::runner::CommandRequest;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::debug;

/// Environment shared by the steps of one job
///
/// Owns a scratch directory that is removed when the environment is dropped,
/// so nothing a job provisions outlives it.
#[derive(Debug)]
pub struct JobEnvironment {
    workspace: PathBuf,
    scratch: TempDir,
    vars: IndexMap<String, String>,
}

impl JobEnvironment {
    /// Create an environment rooted at `workspace` with `base` variables
    pub fn new(workspace: impl Into<PathBuf>, base: &IndexMap<String, String>) -> std::io::Result<Self> {
        let scratch = tempfile::Builder::new().prefix("ci-runner-").tempdir()?;
        debug!("Job scratch directory: {}", scratch.path().display());
        Ok(Self {
            workspace: workspace.into(),
            scratch,
            vars: base.clone(),
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn vars(&self) -> &IndexMap<String, String> {
        &self.vars
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Put `dir` in front of the job's `PATH`
    pub fn prepend_path(&mut self, dir: &Path) {
        let current = self
            .vars
            .get("PATH")
            .cloned()
            .or_else(|| std::env::var("PATH").ok())
            .unwrap_or_default();
        let separator = if cfg!(windows) { ';' } else { ':' };
        let path = if current.is_empty() {
            dir.display().to_string()
        } else {
            format!("{}{}{}", dir.display(), separator, current)
        };
        self.vars.insert("PATH".to_string(), path);
    }

    /// Build a request for a script running in this environment
    ///
    /// Step variables override job variables; `working_directory` is
    /// resolved against the workspace.
    pub fn request(
        &self,
        script: impl Into<String>,
        step_env: &IndexMap<String, String>,
        working_directory: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> CommandRequest {
        let workdir = match working_directory {
            Some(dir) => self.workspace.join(dir),
            None => self.workspace.clone(),
        };

        let mut env = self.vars.clone();
        env.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));

        CommandRequest {
            script: script.into(),
            env,
            workdir,
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }
}
