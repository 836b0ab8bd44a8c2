//! Runner configuration

use indexmap::IndexMap;

/// Configuration for the shell runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Shell executable
    pub shell: String,

    /// Arguments placed before the script
    ///
    /// The default `-eo pipefail` stops a multi-line script at its first
    /// failing command and reports that command's exit code.
    pub shell_args: Vec<String>,

    /// Default timeout for a step in seconds; `None` waits indefinitely
    pub timeout_secs: Option<u64>,

    /// Extra environment variables for every step
    pub env: IndexMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            shell_args: vec![
                "--noprofile".to_string(),
                "--norc".to_string(),
                "-eo".to_string(),
                "pipefail".to_string(),
                "-c".to_string(),
            ],
            timeout_secs: None,
            env: IndexMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>, args: Vec<String>) -> Self {
        self.shell = shell.into();
        self.shell_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
