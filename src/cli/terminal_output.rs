//! Terminal rendering of execution events
//!
//! Progress lines for every event, and when streaming is enabled, each line
//! of step output prefixed with its job so that parallel jobs stay readable.
//! Without streaming, the tail of a failed step's output is printed instead.

use crate::{
    cli::output::{format_execution_event, format_output, style, terminal_width, truncate_line},
    execution::ExecutionEvent,
    runner::OutputStream,
};
use indicatif::ProgressBar;
use std::io::{self, Write};

/// Lines of failed step output shown when not streaming
const FAILURE_TAIL_LINES: usize = 20;

/// Prints execution events to the terminal
pub struct TerminalOutput {
    stream: bool,
    width: usize,
    progress: Option<ProgressBar>,
}

impl TerminalOutput {
    pub fn new(stream: bool) -> Self {
        Self {
            stream,
            width: terminal_width(),
            progress: None,
        }
    }

    /// Track finished jobs on a progress bar
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn handle(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::StepOutput {
                job_id,
                stream,
                line,
                ..
            } => {
                if self.stream {
                    self.print(&self.output_line(job_id, *stream, line));
                }
            }
            ExecutionEvent::StepFailed { output, .. } => {
                if let Some(line) = format_execution_event(event) {
                    self.print(&line);
                }
                if !self.stream && !output.trim().is_empty() {
                    for line in format_output(output, FAILURE_TAIL_LINES).lines() {
                        self.print(&format!("    {}", truncate_line(line, self.width.saturating_sub(4))));
                    }
                }
            }
            ExecutionEvent::JobCompleted { job_id, .. } => {
                if let Some(line) = format_execution_event(event) {
                    self.print(&line);
                }
                if let Some(progress) = &self.progress {
                    progress.inc(1);
                    progress.set_message(job_id.clone());
                }
            }
            ExecutionEvent::RunCompleted { .. } => {
                if let Some(progress) = &self.progress {
                    progress.finish_and_clear();
                }
                if let Some(line) = format_execution_event(event) {
                    self.print(&line);
                }
            }
            _ => {
                if let Some(line) = format_execution_event(event) {
                    self.print(&line);
                }
            }
        }
    }

    fn output_line(&self, job_id: &str, stream: OutputStream, line: &str) -> String {
        let prefix = format!("  {} │ ", job_id);
        let body = truncate_line(line, self.width.saturating_sub(prefix.chars().count()));
        match stream {
            OutputStream::Stdout => format!("{}{}", style(prefix).dim(), body),
            OutputStream::Stderr => format!("{}{}", style(prefix).dim(), style(body).yellow()),
        }
    }

    fn print(&self, line: &str) {
        match &self.progress {
            Some(progress) => progress.println(line),
            None => {
                println!("{}", line);
                let _ = io::stdout().flush();
            }
        }
    }
}
