//! CLI output formatting

use crate::{
    core::{stage::StageKind, ExecutionStatus, FailureKind, StepOutcome, StepState},
    execution::ExecutionEvent,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a job progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Width available for a line of output
pub fn terminal_width() -> usize {
    term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(100)
}

/// Cut a line to `width` characters
pub fn truncate_line(line: &str, width: usize) -> String {
    if line.chars().count() <= width {
        return line.to_string();
    }
    let keep = width.saturating_sub(1);
    let mut cut: String = line.chars().take(keep).collect();
    cut.push('…');
    cut
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Completed {
            outcome: StepOutcome::Success,
            ..
        } => style("COMPLETED").green().to_string(),
        StepState::Completed { exit_code, .. } => {
            style(format!("FAILED ({}, allowed)", exit_code)).yellow().to_string()
        }
        StepState::Failed { exit_code, .. } => style(format!("FAILED ({})", exit_code)).red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a stage kind as a fixed-width tag
pub fn format_stage(stage: StageKind) -> String {
    let tag = format!("{:<12}", stage.as_str());
    match stage {
        StageKind::StrictLint | StageKind::LenientLint => style(tag).magenta().to_string(),
        StageKind::Test => style(tag).cyan().to_string(),
        _ => style(tag).dim().to_string(),
    }
}

pub fn format_failure_kind(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Provisioning => "provisioning failure",
        FailureKind::DependencyResolution => "dependency resolution failure",
        FailureKind::StaticDefect => "static defect",
        FailureKind::TestFailure => "test failure",
        FailureKind::Command => "command failure",
        FailureKind::Timeout => "timeout",
        FailureKind::Cancelled => "cancelled",
    }
}

/// Format an execution event for display
///
/// Output lines are not formatted here; see
/// [`TerminalOutput`](crate::cli::terminal_output::TerminalOutput).
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted {
            run_id,
            workflow_name,
            total_jobs,
        } => format!(
            "{} Starting workflow {} with {} job(s) ({})",
            ROCKET,
            style(workflow_name).bold(),
            total_jobs,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::JobStarted { job_id } => {
            format!("{} Job {}", SPINNER, style(job_id).cyan().bold())
        }
        ExecutionEvent::StepStarted {
            job_id,
            step_index,
            total_steps,
            step_name,
            stage,
        } => format!(
            "  {} [{}/{}] {} {}",
            style(job_id).dim(),
            step_index + 1,
            total_steps,
            format_stage(*stage),
            style(step_name).bold()
        ),
        ExecutionEvent::StepOutput { .. } => return None,
        ExecutionEvent::StepCompleted {
            job_id,
            step_name,
            exit_code,
            outcome,
        } => match outcome {
            StepOutcome::Success => format!("  {} {} {}", style(job_id).dim(), CHECK, style(step_name).green()),
            StepOutcome::Failure => format!(
                "  {} {} {} exited with {} (continue-on-error)",
                style(job_id).dim(),
                WARN,
                style(step_name).yellow(),
                exit_code
            ),
        },
        ExecutionEvent::StepFailed {
            job_id,
            step_name,
            exit_code,
            kind,
            error,
            ..
        } => format!(
            "  {} {} {}: {} ({}, exit code {})",
            style(job_id).dim(),
            CROSS,
            style(step_name).red(),
            style(error).dim(),
            format_failure_kind(*kind),
            exit_code
        ),
        ExecutionEvent::StepSkipped {
            job_id,
            step_name,
            reason,
        } => format!(
            "  {} {} {} ({})",
            style(job_id).dim(),
            SKIP,
            style(step_name).dim(),
            reason
        ),
        ExecutionEvent::JobCompleted {
            job_id,
            status,
            exit_code,
        } => {
            let icon = match status {
                ExecutionStatus::Completed => CHECK,
                ExecutionStatus::Cancelled => WARN,
                _ => CROSS,
            };
            format!(
                "{} Job {} {} (exit code {})",
                icon,
                style(job_id).bold(),
                format_status(*status),
                exit_code
            )
        }
        ExecutionEvent::RunCompleted {
            run_id,
            status,
            exit_code,
        } => format!(
            "{} Run ({}) {} with exit code {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status),
            exit_code
        ),
    };
    Some(line)
}

/// Keep the last `max_lines` lines of step output
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.trim_end().to_string()
    } else {
        let tail = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            tail
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
