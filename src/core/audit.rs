//! Static audit of workflow invariants

use crate::core::{
    stage::StageKind,
    workflow::{JobTemplate, Workflow},
};
use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One audit observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub job: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub findings: Vec<Finding>,
}

impl AuditReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity == severity)
    }

    fn push(&mut self, job: &str, step: Option<&str>, severity: Severity, message: String) {
        self.findings.push(Finding {
            job: job.to_string(),
            step: step.map(str::to_string),
            severity,
            message,
        });
    }
}

/// Check every job of a workflow
///
/// Exclusion paths are resolved against `workspace`.
pub fn audit(workflow: &Workflow, workspace: &Path) -> AuditReport {
    let mut report = AuditReport::default();
    for job in &workflow.jobs {
        audit_job(job, workspace, &mut report);
    }
    report
}

fn audit_job(job: &JobTemplate, workspace: &Path, report: &mut AuditReport) {
    let key = job.key.as_str();

    if job.cells().is_empty() {
        report.push(key, None, Severity::Error, "matrix produces no jobs".to_string());
    }

    let mut sequence: Vec<StageKind> = Vec::new();
    let mut highest: Option<(StageKind, u8)> = None;

    for step in &job.steps {
        for stage in step.stages() {
            if sequence.last() != Some(&stage) {
                sequence.push(stage);
            }
            let Some(rank) = stage.rank() else { continue };
            match highest {
                Some((prev, prev_rank)) if rank < prev_rank => report.push(
                    key,
                    Some(&step.name),
                    Severity::Error,
                    format!("{} stage runs after {} stage", stage, prev),
                ),
                Some((_, prev_rank)) if rank == prev_rank => {}
                _ => highest = Some((stage, rank)),
            }
        }

        for command in &step.commands {
            if let Some(lint) = &command.lint {
                if lint.reports_metrics() && !lint.exit_zero && !step.continue_on_error {
                    report.push(
                        key,
                        Some(&step.name),
                        Severity::Error,
                        "lint pass with complexity thresholds is not --exit-zero and will fail the build"
                            .to_string(),
                    );
                }
                for pattern in &lint.exclude {
                    check_exclude_pattern(report, key, &step.name, workspace, pattern);
                }
            }
            if let Some(test) = &command.test {
                for path in &test.ignore {
                    check_path(report, key, &step.name, workspace, path, "test exclusion");
                }
            }
        }
    }

    let stages = sequence
        .iter()
        .map(StageKind::as_str)
        .collect::<Vec<_>>()
        .join(" → ");
    report.push(key, None, Severity::Info, format!("stages: {}", stages));
}

/// flake8 exclusions are globs over path components; literal ones must exist
fn check_exclude_pattern(
    report: &mut AuditReport,
    job: &str,
    step: &str,
    workspace: &Path,
    pattern: &str,
) {
    if !pattern.contains(['*', '?', '[']) {
        check_path(report, job, step, workspace, pattern, "lint exclusion");
        return;
    }

    let glob = match GlobBuilder::new(pattern).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => {
            report.push(
                job,
                Some(step),
                Severity::Warning,
                format!("lint exclusion '{}' is not a valid pattern: {}", pattern, e),
            );
            return;
        }
    };

    let matched = WalkDir::new(workspace)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| {
            glob.is_match(entry.file_name())
                || entry
                    .path()
                    .strip_prefix(workspace)
                    .is_ok_and(|rel| glob.is_match(rel))
        });
    if !matched {
        report.push(
            job,
            Some(step),
            Severity::Warning,
            format!("lint exclusion '{}' matches nothing in the workspace", pattern),
        );
    }
}

fn check_path(
    report: &mut AuditReport,
    job: &str,
    step: &str,
    workspace: &Path,
    path: &str,
    what: &str,
) {
    if !workspace.join(path).exists() {
        report.push(
            job,
            Some(step),
            Severity::Warning,
            format!("{} '{}' does not exist in the workspace", what, path),
        );
    }
}
