//! Live output delivery for running commands
//!
//! Command output is read line by line while the process runs. Each line is
//! handed to an [`OutputCallback`] as soon as it arrives, which lets the CLI
//! stream step output to the terminal.

use serde::{Deserialize, Serialize};

/// Which stream a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Callback for output lines as they arrive
///
/// This trait is object-safe and can be used as `&dyn OutputCallback`.
pub trait OutputCallback: Send + Sync {
    /// Called once per line, without the trailing newline
    fn on_line(&self, stream: OutputStream, line: &str);
}

/// Callback that discards every line
#[derive(Debug, Clone, Default)]
pub struct NoopCallback;

impl OutputCallback for NoopCallback {
    fn on_line(&self, _stream: OutputStream, _line: &str) {}
}

impl<F> OutputCallback for F
where
    F: Fn(OutputStream, &str) + Send + Sync,
{
    fn on_line(&self, stream: OutputStream, line: &str) {
        self(stream, line)
    }
}
