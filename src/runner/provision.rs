//! Built-in actions: workspace checkout and interpreter setup

use crate::runner::{
    environment::JobEnvironment, streaming::OutputCallback, CommandExecutor, RunnerError,
};
use indexmap::IndexMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// A `uses:` action the runner knows how to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupAction {
    /// `actions/checkout`: the local workspace is used as-is
    Checkout,
    /// `actions/setup-python`
    SetupPython { version: Option<String> },
    Unsupported(String),
}

impl SetupAction {
    /// Resolve an action reference such as `actions/setup-python@v2`
    pub fn parse(action: &str, with: &IndexMap<String, String>) -> Self {
        let name = action.split('@').next().unwrap_or(action);
        match name {
            "actions/checkout" => SetupAction::Checkout,
            "actions/setup-python" => SetupAction::SetupPython {
                version: with
                    .get("python-version")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty()),
            },
            _ => SetupAction::Unsupported(action.to_string()),
        }
    }
}

/// A provisioned interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedPython {
    /// Version reported by the interpreter, e.g. `3.8.10`
    pub version: String,
    /// Root of the virtual environment
    pub venv: PathBuf,
}

/// Check a `python --version` report against a requested version
///
/// `3.8` matches `3.8.10` but not `3.80.1`; a trailing `.x` matches any
/// release of that line.
pub fn version_matches(reported: &str, wanted: &str) -> bool {
    let reported = reported.trim();
    let reported = reported.strip_prefix("Python ").unwrap_or(reported);
    let wanted = wanted.trim().trim_end_matches(".x");
    reported == wanted
        || reported
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Locate an interpreter and create an isolated virtual environment for it
///
/// On success the environment's `PATH` and `VIRTUAL_ENV` point at the new
/// virtual environment, so later steps pick up its `python` and `pip`.
pub async fn provision_python<E>(
    executor: &E,
    env: &mut JobEnvironment,
    version: Option<&str>,
    callback: Option<&dyn OutputCallback>,
) -> Result<ProvisionedPython, RunnerError>
where
    E: CommandExecutor + ?Sized,
{
    let mut candidates = Vec::new();
    if let Some(v) = version {
        candidates.push(format!("python{}", v.trim_end_matches(".x")));
    }
    candidates.push("python3".to_string());
    candidates.push("python".to_string());

    let mut found = None;
    for candidate in &candidates {
        let request = env.request(format!("{} --version", candidate), &IndexMap::new(), None, None);
        let output = executor.execute(&request, None).await?;
        if !output.success() {
            debug!("{} not available (exit code {})", candidate, output.exit_code);
            continue;
        }
        let reported = output.combined();
        if version.map_or(true, |v| version_matches(&reported, v)) {
            let reported = reported.trim();
            let reported = reported.strip_prefix("Python ").unwrap_or(reported);
            found = Some((candidate.clone(), reported.to_string()));
            break;
        }
        debug!("{} reports {}, wanted {:?}", candidate, reported.trim(), version);
    }

    let Some((interpreter, reported)) = found else {
        return Err(RunnerError::Provisioning(format!(
            "Python {} is not available on this runner",
            version.unwrap_or("3")
        )));
    };

    let venv = env.scratch_path().join("venv");
    let script = format!(
        "{} -m venv {}",
        interpreter,
        shell_words::quote(&venv.display().to_string())
    );
    let request = env.request(script, &IndexMap::new(), None, None);
    let output = executor.execute(&request, callback).await?;
    if !output.success() {
        return Err(RunnerError::Provisioning(format!(
            "failed to create virtual environment with {}: {}",
            interpreter,
            output.combined().trim()
        )));
    }

    let bin = venv.join(if cfg!(windows) { "Scripts" } else { "bin" });
    env.prepend_path(&bin);
    env.set("VIRTUAL_ENV", venv.display().to_string());
    info!("Provisioned Python {} in {}", reported, venv.display());

    Ok(ProvisionedPython {
        version: reported,
        venv,
    })
}
