//! Command runner: executes step scripts and built-in actions

pub mod config;
pub mod environment;
pub mod provision;
pub mod response;
pub mod streaming;
pub mod subprocess;

use async_trait::async_trait;
pub use config::RunnerConfig;
pub use environment::JobEnvironment;
pub use provision::{provision_python, ProvisionedPython, SetupAction};
pub use response::{CommandOutput, CommandRequest, RunnerError};
pub use streaming::{NoopCallback, OutputCallback, OutputStream};
pub use subprocess::ShellSubprocess;

/// Trait for command execution - allows for different implementations
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a script, forwarding output lines to `callback` as they arrive
    async fn execute(
        &self,
        request: &CommandRequest,
        callback: Option<&dyn OutputCallback>,
    ) -> Result<CommandOutput, RunnerError>;
}

/// Runner that executes scripts with a local shell
#[derive(Debug, Clone)]
pub struct ShellRunner {
    subprocess: ShellSubprocess,
    config: RunnerConfig,
}

impl ShellRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let subprocess = ShellSubprocess::new(config.shell.clone(), config.shell_args.clone());
        Self { subprocess, config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl CommandExecutor for ShellRunner {
    async fn execute(
        &self,
        request: &CommandRequest,
        callback: Option<&dyn OutputCallback>,
    ) -> Result<CommandOutput, RunnerError> {
        // Runner-wide settings fill in what the request leaves open
        let mut request = request.clone();
        for (key, value) in &self.config.env {
            request.env.entry(key.clone()).or_insert_with(|| value.clone());
        }
        if request.timeout.is_none() {
            request.timeout = self.config.timeout_secs.map(std::time::Duration::from_secs);
        }

        self.subprocess.run(&request, callback).await
    }
}
