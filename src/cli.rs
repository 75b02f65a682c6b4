use crate::model::{ExitStatusKind, InfoEvent, OutputStream, SessionStatus, WorkflowEvent};
use crate::orchestrator::{self, UiCommand};
use crate::runner::{ProcessRunner, ReadErrorPolicy, RunnerConfig};
use crate::toolchain::{self, SystemCommander, ToolchainCheck};
use crate::workflow;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "ilaunch",
    version,
    about = "Interactive project bootstrap: .env, dependencies and git in one place"
)]
pub struct Cli {
    /// Run the full bootstrap without the TUI (CI mode)
    #[arg(long)]
    pub non_interactive: bool,

    /// Print a JSON report instead of streaming output (requires --non-interactive)
    #[arg(long)]
    pub json: bool,

    /// Project directory; files are read and commands run here
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Package manager to use instead of the detected one (pnpm, npm)
    #[arg(long)]
    pub package_manager: Option<String>,

    /// Minimum supported Node.js major version
    #[arg(long, default_value_t = toolchain::MIN_NODE_MAJOR)]
    pub min_node_major: u32,

    /// Terminate a command whose output can no longer be read
    #[arg(long)]
    pub abort_on_read_error: bool,

    /// Write diagnostics to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// What the front ends need after setup checks passed.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub project_dir: PathBuf,
    pub package_manager: String,
    pub toolchain: ToolchainCheck,
}

/// Run the selected front end and return the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    if args.json && !args.non_interactive {
        return Err(anyhow::anyhow!(
            "--json can only be used with --non-interactive. Use --non-interactive --json together."
        ));
    }

    let project_dir = args
        .dir
        .canonicalize()
        .with_context(|| format!("resolve project directory {}", args.dir.display()))?;
    // The checks spawn short-lived commands synchronously; keep them off the async workers.
    let min_node_major = args.min_node_major;
    let pm_override = args.package_manager.clone();
    let check = tokio::task::spawn_blocking(move || {
        toolchain::check_environment(&SystemCommander, min_node_major, pm_override.as_deref())
    })
    .await
    .context("toolchain check task failed")?
    .context("check environment")?;
    let package_manager = check.package_manager.clone();

    let runner = ProcessRunner::new(build_runner_config(&args, &project_dir));
    let ctx = AppContext {
        project_dir,
        package_manager,
        toolchain: check,
    };

    if !args.non_interactive {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(ctx, runner).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_non_interactive(ctx, runner, false).await;
        }
    }

    run_non_interactive(ctx, runner, args.json).await
}

/// Build a `RunnerConfig` from CLI arguments.
pub fn build_runner_config(args: &Cli, project_dir: &std::path::Path) -> RunnerConfig {
    RunnerConfig {
        working_dir: Some(project_dir.to_path_buf()),
        read_error_policy: if args.abort_on_read_error {
            ReadErrorPolicy::Abort
        } else {
            ReadErrorPolicy::Continue
        },
    }
}

/// Drive "run all" through the controller, streaming output or collecting a JSON report.
async fn run_non_interactive(ctx: AppContext, runner: ProcessRunner, json: bool) -> Result<i32> {
    let plan = workflow::run_all(&ctx.project_dir, &ctx.package_manager)
        .context("prepare .env file")?;

    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let controller = tokio::spawn(orchestrator::run_controller(runner, event_tx, cmd_rx));

    let _ = out_tx.send(OutputLine::Stderr(format!(
        "node {} ({}), using {}",
        ctx.toolchain.node_version,
        ctx.toolchain.node_path.display(),
        ctx.package_manager
    )));
    cmd_tx
        .send(UiCommand::Start(plan))
        .map_err(|_| anyhow::anyhow!("workflow controller stopped before start"))?;

    let mut report = WorkflowReport::default();
    let mut finished: Option<SessionStatus> = None;
    let mut interrupted = false;

    loop {
        tokio::select! {
            ev = event_rx.recv() => {
                let Some(ev) = ev else { break };
                if json {
                    report.apply(&ev);
                } else {
                    for line in render_event(&ev) {
                        let _ = out_tx.send(line);
                    }
                }
                if let WorkflowEvent::Finished { status, .. } = ev {
                    finished = Some(status);
                    let _ = cmd_tx.send(UiCommand::Quit);
                }
            }
            res = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if res.is_ok() {
                    tracing::info!("interrupt received, cancelling workflow");
                    let _ = cmd_tx.send(UiCommand::Cancel);
                }
            }
        }
    }

    controller
        .await
        .context("workflow controller task failed")?
        .context("workflow controller failed")?;

    let status = finished.context("workflow ended without a final status")?;
    if json {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(status.exit_code())
}

/// Text rendering of controller events for the streaming mode.
fn render_event(ev: &WorkflowEvent) -> Vec<OutputLine> {
    match ev {
        WorkflowEvent::WorkflowStarted { name, steps } => {
            vec![OutputLine::Stderr(format!("== {name} ({steps} steps) =="))]
        }
        WorkflowEvent::StepStarted { invocation, .. } => {
            vec![OutputLine::Stdout(format!("$ {invocation}"))]
        }
        WorkflowEvent::Output { stream, line } => match stream {
            OutputStream::Stdout => vec![OutputLine::Stdout(line.clone())],
            OutputStream::Stderr => vec![OutputLine::Stderr(line.clone())],
        },
        WorkflowEvent::Warning(msg) => vec![OutputLine::Stderr(format!("warning: {msg}"))],
        WorkflowEvent::Info(info) => vec![OutputLine::Stderr(info.to_message())],
        WorkflowEvent::Finished { status, .. } => match status {
            SessionStatus::Succeeded => vec![OutputLine::Stderr("Done".into())],
            SessionStatus::Failed { cause, .. } => {
                vec![OutputLine::Stderr(format!("error: {cause}"))]
            }
            SessionStatus::Canceled => vec![OutputLine::Stderr("Canceled".into())],
            SessionStatus::Idle | SessionStatus::Running => Vec::new(),
        },
        WorkflowEvent::StepCompleted { .. } | WorkflowEvent::Progress(_) => Vec::new(),
    }
}

#[derive(Debug, Default, Serialize)]
struct WorkflowReport {
    workflow: String,
    status: String,
    exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<String>,
    notes: Vec<String>,
    warnings: Vec<String>,
    steps: Vec<StepReport>,
}

#[derive(Debug, Serialize)]
struct StepReport {
    command: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    output: Vec<String>,
}

impl WorkflowReport {
    fn apply(&mut self, ev: &WorkflowEvent) {
        match ev {
            WorkflowEvent::WorkflowStarted { name, .. } => self.workflow = name.clone(),
            WorkflowEvent::StepStarted { invocation, .. } => self.steps.push(StepReport {
                command: invocation.to_string(),
                status: "running".into(),
                exit_code: None,
                output: Vec::new(),
            }),
            WorkflowEvent::Output { line, .. } => {
                if let Some(step) = self.steps.last_mut() {
                    step.output.push(line.clone());
                }
            }
            WorkflowEvent::Warning(msg) => self.warnings.push(msg.clone()),
            WorkflowEvent::StepCompleted { index, status } => {
                if let Some(step) = index.checked_sub(1).and_then(|i| self.steps.get_mut(i)) {
                    step.status = step_status_label(*status).into();
                    step.exit_code = status.code();
                }
            }
            WorkflowEvent::Info(InfoEvent::Message(msg)) => self.notes.push(msg.clone()),
            WorkflowEvent::Finished { status, .. } => {
                self.status = status.label().into();
                self.exit_code = status.exit_code();
                if let SessionStatus::Failed { cause, .. } = status {
                    self.cause = Some(cause.clone());
                }
            }
            WorkflowEvent::Info(_) | WorkflowEvent::Progress(_) => {}
        }
    }
}

fn step_status_label(status: ExitStatusKind) -> &'static str {
    match status {
        ExitStatusKind::Exited(0) => "succeeded",
        ExitStatusKind::Exited(_) => "failed",
        ExitStatusKind::Terminated => "terminated",
        ExitStatusKind::Cancelled => "canceled",
    }
}
