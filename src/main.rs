use anyhow::{ensure, Result};
use ci_runner::{
    cli::{
        commands::{AuditCommand, PlanCommand, RunCommand, ValidateCommand},
        output::*,
        terminal_output::TerminalOutput,
        Cli, Command,
    },
    core::{
        audit::{audit, Severity},
        config::WorkflowConfig,
        PlanError, Workflow, WorkflowRun,
    },
    execution::ExecutionEngine,
    runner::{RunnerConfig, ShellRunner},
};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Execute command
    let code = match &cli.command {
        Command::Run(cmd) => run_workflow(cmd, cli.stream).await?,
        Command::Plan(cmd) => plan_workflow(cmd)?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Audit(cmd) => audit_workflow(cmd)?,
    };

    std::process::exit(code);
}

fn load_workflow(file: &str) -> Result<Workflow> {
    let config = WorkflowConfig::from_file(file)?;
    Ok(config.to_workflow()?)
}

async fn run_workflow(cmd: &RunCommand, stream: bool) -> Result<i32> {
    ensure!(
        cmd.workdir.is_dir(),
        "Workspace {} is not a directory",
        cmd.workdir.display()
    );

    let workflow = load_workflow(&cmd.file)?;
    println!("{} Loaded workflow: {}", INFO, style(&workflow.name).bold());

    let event = cmd.event.to_event();
    let mut run = match workflow.plan(&event, &cmd.plan_options()) {
        Ok(run) => run,
        Err(e @ PlanError::NotTriggered { .. }) => {
            println!("{} Nothing to run: {}", INFO, e);
            return Ok(0);
        }
        Err(e) => {
            println!("{} {}", CROSS, style(e).red());
            return Ok(1);
        }
    };

    for (key, value) in &cmd.env {
        println!(
            "{} Environment override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let mut config = RunnerConfig::new();
    if let Some(timeout) = cmd.timeout {
        config = config.with_timeout(timeout);
    }
    for (key, value) in &cmd.env {
        config = config.with_env(key, value);
    }

    let engine = ExecutionEngine::new(ShellRunner::new(config), cmd.strategy());

    // Set up event handler for console output
    let mut terminal = TerminalOutput::new(stream);
    if !stream && console::Term::stdout().is_term() && run.jobs.len() > 1 {
        terminal = terminal.with_progress(create_progress_bar(run.jobs.len()));
    }
    let terminal = Arc::new(terminal);
    engine.add_event_handler(move |event| terminal.handle(&event));

    // Ctrl-C kills running commands and skips the rest
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    println!();
    engine.execute(&mut run).await?;
    print_summary(&run);

    let code = run.state.exit_code;
    if code == 0 {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&run.workflow_name).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "\n{} {} {} (exit code {})",
            CROSS,
            style(&run.workflow_name).bold(),
            style("failed").red(),
            code
        );
        error!("Workflow run failed with exit code {}", code);
    }

    Ok(code)
}

fn print_summary(run: &WorkflowRun) {
    println!("\n{}", style("Summary").bold());
    for job in &run.jobs {
        let duration = match (job.state.started_at, job.state.completed_at) {
            (Some(start), Some(end)) => end
                .signed_duration_since(start)
                .to_std()
                .map(format_duration)
                .unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "  {} {} {}",
            style(&job.id).bold(),
            format_status(job.state.status),
            style(duration).dim()
        );
        for step in &job.steps {
            println!("    {:<24} {}", format_step_state(&step.state), step.name);
        }
    }
}

fn plan_workflow(cmd: &PlanCommand) -> Result<i32> {
    let workflow = load_workflow(&cmd.file)?;
    let event = cmd.event.to_event();

    let run = match workflow.plan(&event, &cmd.plan_options()) {
        Ok(run) => run,
        Err(e @ PlanError::NotTriggered { .. }) => {
            if cmd.json {
                println!("{}", serde_json::json!({ "triggered": false, "jobs": [] }));
            } else {
                println!("{} {}", INFO, e);
            }
            return Ok(0);
        }
        Err(e) => {
            println!("{} {}", CROSS, style(e).red());
            return Ok(1);
        }
    };

    if cmd.json {
        let jobs: Vec<_> = run
            .jobs
            .iter()
            .map(|job| {
                serde_json::json!({
                    "id": job.id,
                    "key": job.key,
                    "matrix": job.matrix,
                    "steps": job.steps.iter().map(|step| serde_json::json!({
                        "name": step.name,
                        "stage": step.stage().as_str(),
                        "continue_on_error": step.continue_on_error,
                        "commands": step.commands,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        let data = serde_json::json!({
            "triggered": true,
            "workflow": run.workflow_name,
            "event": run.event,
            "max_parallel": run.max_parallel,
            "jobs": jobs,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    println!(
        "{} {} on {} to {}: {} job(s)",
        ROCKET,
        style(&run.workflow_name).bold(),
        style(&event.kind).cyan(),
        style(&event.branch).cyan(),
        run.jobs.len()
    );
    for job in &run.jobs {
        println!("\n  {}", style(&job.id).bold());
        for step in &job.steps {
            println!("    {} {}", format_stage(step.stage()), step.name);
            for command in &step.commands {
                let mut notes = Vec::new();
                if let Some(lint) = &command.lint {
                    notes.push(if lint.exit_zero { "never fails" } else { "fails the build" });
                }
                if let Some(test) = &command.test {
                    if !test.ignore.is_empty() {
                        notes.push("with exclusions");
                    }
                }
                let note = if notes.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", notes.join(", "))
                };
                println!(
                    "      {} {}{}",
                    style(command.kind.as_str()).dim(),
                    truncate_line(&command.line, terminal_width().saturating_sub(24)),
                    style(note).dim()
                );
            }
        }
    }

    Ok(0)
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating workflow...", INFO);

    let result = WorkflowConfig::from_file(&cmd.file);

    match result {
        Ok(config) => {
            println!("{} Workflow configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Jobs: {}", style(config.jobs.len()).cyan());
            for (key, job) in &config.jobs {
                let cells = job.strategy.as_ref().map_or(1, |s| s.matrix.expand().len());
                println!(
                    "    {}: {} step(s), {} matrix job(s)",
                    style(key).bold(),
                    job.steps.len(),
                    cells
                );
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(0)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(1)
        }
    }
}

fn audit_workflow(cmd: &AuditCommand) -> Result<i32> {
    let workflow = load_workflow(&cmd.file)?;
    let report = audit(&workflow, &cmd.workdir);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} Audit of {}", INFO, style(&workflow.name).bold());
        for finding in &report.findings {
            let icon = match finding.severity {
                Severity::Info => INFO,
                Severity::Warning => WARN,
                Severity::Error => CROSS,
            };
            let location = match &finding.step {
                Some(step) => format!("{} / {}", finding.job, step),
                None => finding.job.clone(),
            };
            println!("  {} {}: {}", icon, style(location).bold(), finding.message);
        }
    }

    Ok(if report.has_errors() { 1 } else { 0 })
}
