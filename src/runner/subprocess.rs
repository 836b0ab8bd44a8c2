//! Shell subprocess execution

use crate::runner::{
    streaming::{OutputCallback, OutputStream},
    CommandOutput, CommandRequest, RunnerError,
};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs scripts through a shell subprocess
#[derive(Debug, Clone)]
pub struct ShellSubprocess {
    shell: String,
    shell_args: Vec<String>,
}

impl ShellSubprocess {
    pub fn new(shell: String, shell_args: Vec<String>) -> Self {
        Self { shell, shell_args }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Run a script and capture its output
    ///
    /// Lines are forwarded to `callback` while the process runs. The child
    /// is killed when the timeout elapses or the returned future is dropped.
    ///
    /// # Errors
    /// Returns `RunnerError` if the shell cannot be spawned, reading its
    /// output fails, or the timeout elapses. A non-zero exit status is not an
    /// error: it is reported in `CommandOutput::exit_code`.
    pub async fn run(
        &self,
        request: &CommandRequest,
        callback: Option<&dyn OutputCallback>,
    ) -> Result<CommandOutput, RunnerError> {
        debug!(
            "Spawning {} in {} ({} bytes of script)",
            self.shell,
            request.workdir.display(),
            request.script.len()
        );

        let mut child = Command::new(&self.shell)
            .args(&self.shell_args)
            .arg(&request.script)
            .current_dir(&request.workdir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Spawn {
                program: self.shell.clone(),
                reason: e.to_string(),
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut stdout = String::new();
        let mut stderr = String::new();

        let collect = async {
            while let Some((stream, line)) = rx.recv().await {
                if let Some(cb) = callback {
                    cb.on_line(stream, &line);
                }
                let buffer = match stream {
                    OutputStream::Stdout => &mut stdout,
                    OutputStream::Stderr => &mut stderr,
                };
                buffer.push_str(&line);
                buffer.push('\n');
            }
            child.wait().await
        };

        let finished = match request.timeout {
            Some(limit) => timeout(limit, collect).await.ok(),
            None => Some(collect.await),
        };

        let status = match finished {
            Some(status) => status?,
            None => {
                let secs = request.timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!("Command timed out after {}s, killing it", secs);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out command: {}", e);
                }
                return Err(RunnerError::Timeout(secs));
            }
        };

        let exit_code = exit_code(status);
        debug!("Command exited with code {}", exit_code);

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Forward output line by line; invalid UTF-8 is replaced, never fatal
///
/// The pipe is drained to EOF so the child never sees a closed reader.
async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<(OutputStream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut forwarding = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if !forwarding {
                    continue;
                }
                let line = trim_line_ending(&buf);
                let line = String::from_utf8_lossy(line).into_owned();
                if tx.send((stream, line)).is_err() {
                    forwarding = false;
                }
            }
            Err(e) => {
                warn!("Failed to read command output: {}", e);
                break;
            }
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Native exit code; a process killed by a signal reports 128 + signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
