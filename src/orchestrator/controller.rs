//! Workflow lifecycle controller.
//!
//! Owns the session and the in-flight execution handle, feeds runner events into the state
//! machine, and emits events for presentation layers.

use super::session::{Step, WorkflowSession};
use crate::model::{ExecEvent, InfoEvent, SessionStatus, WorkflowEvent};
use crate::runner::{ExecutionHandle, ProcessRunner};
use crate::workflow::WorkflowPlan;
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How long a cancel may take before the UI is told it is still in progress.
const CANCEL_WATCHDOG: Duration = Duration::from_secs(3);

/// Commands emitted by UI layers to control workflows.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(WorkflowPlan),
    Cancel,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Orchestrate workflows based on UI commands and emit events back to presentation layers.
///
/// Returns once `Quit` is received (or the command channel closes) and no invocation is
/// still in flight.
pub(crate) async fn run_controller(
    runner: ProcessRunner,
    event_tx: UnboundedSender<WorkflowEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut ctl = Controller::new(runner, event_tx);
    let mut commands_closed = false;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        let flow = tokio::select! {
            // Commands first so a cancel issued between two steps lands before the next dispatch.
            biased;

            cmd = cmd_rx.recv(), if !commands_closed => {
                commands_closed = cmd.is_none();
                ctl.on_command(cmd)?
            }
            ev = next_exec_event(&mut ctl.handle) => ctl.on_exec_event(ev),
            // Dispatch only after the previous stream closed, so at most one process is alive.
            _ = async {}, if ctl.ready_to_dispatch() => {
                ctl.dispatch();
                Flow::Continue
            }
            _ = watchdog.tick() => {
                ctl.on_watchdog_tick();
                Flow::Continue
            }
        };
        if flow == Flow::Stop {
            break;
        }
    }

    Ok(())
}

/// Next event of the in-flight invocation; parks forever while nothing is in flight.
async fn next_exec_event(handle: &mut Option<ExecutionHandle>) -> Option<ExecEvent> {
    match handle.as_mut() {
        Some(h) => h.next_event().await,
        None => futures::future::pending().await,
    }
}

struct Controller {
    runner: ProcessRunner,
    event_tx: UnboundedSender<WorkflowEvent>,
    session: WorkflowSession,
    // Shared by every invocation of the current workflow.
    cancel_token: CancellationToken,
    handle: Option<ExecutionHandle>,
    dispatch_pending: bool,
    quit_pending: bool,
    last_progress: f64,
    cancel_deadline: Option<Instant>,
}

impl Controller {
    fn new(runner: ProcessRunner, event_tx: UnboundedSender<WorkflowEvent>) -> Self {
        Self {
            runner,
            event_tx,
            session: WorkflowSession::new(),
            cancel_token: CancellationToken::new(),
            handle: None,
            dispatch_pending: false,
            quit_pending: false,
            last_progress: 0.0,
            cancel_deadline: None,
        }
    }

    fn send(&self, ev: WorkflowEvent) {
        let _ = self.event_tx.send(ev);
    }

    fn is_busy(&self) -> bool {
        self.handle.is_some() || self.dispatch_pending || self.session.status().is_running()
    }

    fn ready_to_dispatch(&self) -> bool {
        self.dispatch_pending && self.handle.is_none()
    }

    fn on_command(&mut self, cmd: Option<UiCommand>) -> Result<Flow> {
        match cmd {
            Some(UiCommand::Start(plan)) => {
                if self.is_busy() {
                    self.send(WorkflowEvent::Info(InfoEvent::AlreadyRunning));
                } else {
                    self.start(plan)?;
                }
            }
            Some(UiCommand::Cancel) => self.request_cancel(),
            Some(UiCommand::Quit) | None => {
                // Quit waits for the in-flight invocation so its process is reaped.
                self.quit_pending = true;
                self.dispatch_pending = false;
                self.request_cancel();
                if self.handle.is_none() {
                    return Ok(Flow::Stop);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn start(&mut self, plan: WorkflowPlan) -> Result<()> {
        if plan.steps.is_empty() {
            for note in plan.notes {
                self.send(WorkflowEvent::Info(InfoEvent::Message(note)));
            }
            self.send(WorkflowEvent::Info(InfoEvent::NothingToRun));
            return Ok(());
        }

        // Fresh workflow: new queue, new cancel token.
        self.session.reset();
        self.cancel_token = CancellationToken::new();
        self.last_progress = 0.0;
        let steps = plan.steps.len();
        self.session.enqueue(plan.steps)?;
        tracing::info!(workflow = %plan.name, steps, "workflow started");
        self.send(WorkflowEvent::WorkflowStarted {
            name: plan.name,
            steps,
        });
        for note in plan.notes {
            self.session.note(note.clone());
            self.send(WorkflowEvent::Info(InfoEvent::Message(note)));
        }
        self.dispatch_pending = true;
        Ok(())
    }

    fn dispatch(&mut self) {
        self.dispatch_pending = false;
        if let Some(invocation) = self.session.start_next() {
            self.send(WorkflowEvent::StepStarted {
                index: self.session.dispatched(),
                total: self.session.total(),
                invocation: invocation.clone(),
            });
            self.handle = Some(self.runner.run(&self.cancel_token, invocation));
        }
    }

    fn on_exec_event(&mut self, ev: Option<ExecEvent>) -> Flow {
        let Some(ev) = ev else {
            // Stream closed: the invocation's background work is done.
            self.handle = None;
            self.cancel_deadline = None;
            if let Some(Step::Finished(status)) = self.session.on_stream_closed() {
                self.finish(status);
            }
            return if self.quit_pending {
                Flow::Stop
            } else {
                Flow::Continue
            };
        };

        self.forward_exec_event(&ev);
        match self.session.on_event(ev) {
            Step::Advance => self.dispatch_pending = true,
            Step::Finished(status) => self.finish(status),
            Step::Continue | Step::Ignored => {}
        }
        self.emit_progress();
        Flow::Continue
    }

    // If cancel stalls (e.g. a child ignoring the kill), keep the user informed.
    fn on_watchdog_tick(&mut self) {
        if let Some(deadline) = self.cancel_deadline {
            if Instant::now() >= deadline && self.handle.is_some() {
                self.send(WorkflowEvent::Info(InfoEvent::StillCancelling));
                self.cancel_deadline = None;
            }
        }
    }

    fn request_cancel(&mut self) {
        let dropped = self.session.pending();
        if !self.session.cancel() {
            return;
        }
        match self.handle.as_ref() {
            Some(handle) => handle.cancel(),
            None => self.cancel_token.cancel(),
        }
        if self.session.status().is_terminal() {
            // Between steps there is nothing to wait for.
            tracing::info!(dropped, "cancel requested between steps");
            let status = self.session.status().clone();
            self.finish(status);
        } else {
            tracing::info!(dropped, "cancel requested, waiting for the running process");
            self.send(WorkflowEvent::Info(InfoEvent::Cancelling));
            self.cancel_deadline = Some(Instant::now() + CANCEL_WATCHDOG);
        }
    }

    fn forward_exec_event(&self, ev: &ExecEvent) {
        match ev {
            ExecEvent::Output { stream, line } => self.send(WorkflowEvent::Output {
                stream: *stream,
                line: line.clone(),
            }),
            // Fatal errors surface through the final status instead.
            ExecEvent::Error(err) if !err.is_fatal() => {
                self.send(WorkflowEvent::Warning(err.to_string()))
            }
            ExecEvent::Error(_) => {}
            ExecEvent::Completed { status, .. } => self.send(WorkflowEvent::StepCompleted {
                index: self.session.dispatched(),
                status: *status,
            }),
        }
    }

    fn emit_progress(&mut self) {
        let progress = self.session.progress();
        if progress > self.last_progress {
            self.last_progress = progress;
            self.send(WorkflowEvent::Progress(progress));
        }
    }

    fn finish(&mut self, status: SessionStatus) {
        self.dispatch_pending = false;
        if self.last_progress < 1.0 {
            self.last_progress = 1.0;
            self.send(WorkflowEvent::Progress(1.0));
        }
        let log = self.session.log().iter().cloned().collect();
        self.send(WorkflowEvent::Finished { status, log });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExitStatusKind, Invocation, OutputStream};
    use tokio::sync::mpsc;

    fn plan(steps: Vec<Invocation>) -> WorkflowPlan {
        WorkflowPlan {
            name: "test".into(),
            steps,
            notes: Vec::new(),
        }
    }

    fn no_args(name: &str) -> Invocation {
        Invocation::new(name, Vec::<String>::new())
    }

    fn drain(rx: &mut UnboundedReceiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    /// Controller with the first step marked in flight, without spawning a process.
    fn started(steps: Vec<Invocation>) -> (Controller, UnboundedReceiver<WorkflowEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut ctl = Controller::new(ProcessRunner::default(), event_tx);
        ctl.on_command(Some(UiCommand::Start(plan(steps)))).unwrap();
        assert!(ctl.session.start_next().is_some());
        ctl.dispatch_pending = false;
        (ctl, event_rx)
    }

    fn completed(code: i32) -> Option<ExecEvent> {
        Some(ExecEvent::Completed {
            status: ExitStatusKind::Exited(code),
            cause: None,
        })
    }

    #[test]
    fn cancel_between_steps_allows_an_immediate_restart() {
        let (mut ctl, mut event_rx) = started(vec![no_args("true"), no_args("true")]);
        ctl.on_exec_event(completed(0));
        assert!(ctl.dispatch_pending);

        ctl.on_command(Some(UiCommand::Cancel)).unwrap();
        assert!(!ctl.dispatch_pending);
        assert_eq!(ctl.session.status(), &SessionStatus::Canceled);

        ctl.on_command(Some(UiCommand::Start(plan(vec![no_args("true")]))))
            .unwrap();
        let events = drain(&mut event_rx);
        assert!(!events
            .iter()
            .any(|ev| matches!(ev, WorkflowEvent::Info(InfoEvent::AlreadyRunning))));
        let starts = events
            .iter()
            .filter(|ev| matches!(ev, WorkflowEvent::WorkflowStarted { .. }))
            .count();
        assert_eq!(starts, 2);
        assert!(ctl.dispatch_pending);
    }

    #[test]
    fn finished_is_the_last_event_and_full_progress_is_sent_once() {
        let (mut ctl, mut event_rx) = started(vec![no_args("echo")]);
        ctl.on_exec_event(Some(ExecEvent::Output {
            stream: OutputStream::Stdout,
            line: "hi".into(),
        }));
        ctl.on_exec_event(completed(0));

        let events = drain(&mut event_rx);
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::Finished {
                status: SessionStatus::Succeeded,
                ..
            })
        ));
        let full = events
            .iter()
            .filter(|ev| matches!(ev, WorkflowEvent::Progress(p) if *p >= 1.0))
            .count();
        assert_eq!(full, 1);
    }

    #[test]
    fn finished_carries_the_session_log() {
        let (mut ctl, mut event_rx) = started(vec![no_args("false")]);
        ctl.on_exec_event(Some(ExecEvent::Output {
            stream: OutputStream::Stderr,
            line: "boom".into(),
        }));
        ctl.on_exec_event(completed(1));

        match drain(&mut event_rx).pop() {
            Some(WorkflowEvent::Finished { status, log }) => {
                assert!(matches!(status, SessionStatus::Failed { .. }));
                assert_eq!(log, vec!["$ false".to_string(), "boom".to_string()]);
            }
            other => panic!("expected finished, got {other:?}"),
        }
    }

    #[test]
    fn cancel_in_flight_fires_the_workflow_token() {
        let (mut ctl, mut event_rx) = started(vec![no_args("true")]);
        ctl.on_command(Some(UiCommand::Cancel)).unwrap();
        assert!(ctl.cancel_token.is_cancelled());
        assert!(ctl.cancel_deadline.is_some());
        assert!(drain(&mut event_rx)
            .iter()
            .any(|ev| matches!(ev, WorkflowEvent::Info(InfoEvent::Cancelling))));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        struct Harness {
            cmd_tx: UnboundedSender<UiCommand>,
            event_rx: UnboundedReceiver<WorkflowEvent>,
            task: tokio::task::JoinHandle<Result<()>>,
        }

        fn spawn_controller() -> Harness {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            let task = tokio::spawn(run_controller(ProcessRunner::default(), event_tx, cmd_rx));
            Harness {
                cmd_tx,
                event_rx,
                task,
            }
        }

        /// Collect events until `Finished`, returning them with the final status.
        async fn until_finished(
            event_rx: &mut UnboundedReceiver<WorkflowEvent>,
        ) -> (Vec<WorkflowEvent>, SessionStatus) {
            let mut seen = Vec::new();
            let wait = async {
                while let Some(ev) = event_rx.recv().await {
                    if let WorkflowEvent::Finished { status, .. } = &ev {
                        let status = status.clone();
                        seen.push(ev);
                        return status;
                    }
                    seen.push(ev);
                }
                panic!("controller closed the event channel before finishing");
            };
            let status = tokio::time::timeout(Duration::from_secs(15), wait)
                .await
                .expect("workflow should finish");
            (seen, status)
        }

        fn steps_started(events: &[WorkflowEvent]) -> Vec<String> {
            events
                .iter()
                .filter_map(|ev| match ev {
                    WorkflowEvent::StepStarted { invocation, .. } => Some(invocation.to_string()),
                    _ => None,
                })
                .collect()
        }

        async fn shutdown(h: Harness) {
            h.cmd_tx.send(UiCommand::Quit).unwrap();
            tokio::time::timeout(Duration::from_secs(5), h.task)
                .await
                .expect("controller should stop")
                .unwrap()
                .unwrap();
        }

        #[tokio::test]
        async fn runs_every_step_in_order() {
            let mut h = spawn_controller();
            h.cmd_tx
                .send(UiCommand::Start(plan(vec![
                    Invocation::new("echo", ["one"]),
                    Invocation::new("echo", ["two"]),
                    Invocation::new("echo", ["three"]),
                ])))
                .unwrap();

            let (events, status) = until_finished(&mut h.event_rx).await;
            assert_eq!(status, SessionStatus::Succeeded);
            assert_eq!(steps_started(&events), vec!["echo one", "echo two", "echo three"]);

            let lines: Vec<&str> = events
                .iter()
                .filter_map(|ev| match ev {
                    WorkflowEvent::Output { line, .. } => Some(line.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(lines, vec!["one", "two", "three"]);

            let progress: Vec<f64> = events
                .iter()
                .filter_map(|ev| match ev {
                    WorkflowEvent::Progress(p) => Some(*p),
                    _ => None,
                })
                .collect();
            assert!(progress.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(progress.last().copied(), Some(1.0));
            shutdown(h).await;
        }

        #[tokio::test]
        async fn failing_step_stops_the_workflow() {
            let mut h = spawn_controller();
            h.cmd_tx
                .send(UiCommand::Start(plan(vec![
                    no_args("true"),
                    no_args("false"),
                    Invocation::new("echo", ["never"]),
                ])))
                .unwrap();

            let (events, status) = until_finished(&mut h.event_rx).await;
            assert!(matches!(status, SessionStatus::Failed { exit_code: Some(1), .. }));
            assert_eq!(steps_started(&events), vec!["true", "false"]);
            shutdown(h).await;
        }

        #[tokio::test]
        async fn missing_binary_fails_without_running_later_steps() {
            let mut h = spawn_controller();
            h.cmd_tx
                .send(UiCommand::Start(plan(vec![
                    no_args("no-such-binary-xyz"),
                    no_args("true"),
                ])))
                .unwrap();

            let (events, status) = until_finished(&mut h.event_rx).await;
            match status {
                SessionStatus::Failed { cause, exit_code } => {
                    assert!(cause.contains("no-such-binary-xyz"));
                    assert_eq!(exit_code, None);
                }
                other => panic!("expected failure, got {other:?}"),
            }
            assert_eq!(steps_started(&events).len(), 1);
            shutdown(h).await;
        }

        #[tokio::test]
        async fn cancel_while_running_ends_canceled() {
            let mut h = spawn_controller();
            h.cmd_tx
                .send(UiCommand::Start(plan(vec![
                    Invocation::new("sh", ["-c", "echo started; exec sleep 30"]),
                    no_args("true"),
                ])))
                .unwrap();

            // Wait until the first process is producing output, then cancel.
            loop {
                match h.event_rx.recv().await {
                    Some(WorkflowEvent::Output { line, .. }) if line == "started" => break,
                    Some(_) => continue,
                    None => panic!("controller stopped early"),
                }
            }
            h.cmd_tx.send(UiCommand::Cancel).unwrap();

            let (events, status) = until_finished(&mut h.event_rx).await;
            assert_eq!(status, SessionStatus::Canceled);
            assert!(steps_started(&events).is_empty());
            assert!(events
                .iter()
                .any(|ev| matches!(ev, WorkflowEvent::Info(InfoEvent::Cancelling))));
            shutdown(h).await;
        }

        #[tokio::test]
        async fn cancel_while_idle_emits_nothing() {
            let mut h = spawn_controller();
            h.cmd_tx.send(UiCommand::Cancel).unwrap();
            h.cmd_tx.send(UiCommand::Start(plan(vec![no_args("true")]))).unwrap();

            let (events, status) = until_finished(&mut h.event_rx).await;
            assert_eq!(status, SessionStatus::Succeeded);
            assert!(matches!(events.first(), Some(WorkflowEvent::WorkflowStarted { .. })));
            shutdown(h).await;
        }

        #[tokio::test]
        async fn second_start_while_running_is_rejected() {
            let mut h = spawn_controller();
            h.cmd_tx
                .send(UiCommand::Start(plan(vec![Invocation::new(
                    "sh",
                    ["-c", "sleep 0.5"],
                )])))
                .unwrap();
            h.cmd_tx.send(UiCommand::Start(plan(vec![no_args("true")]))).unwrap();

            let (events, status) = until_finished(&mut h.event_rx).await;
            assert_eq!(status, SessionStatus::Succeeded);
            assert!(events
                .iter()
                .any(|ev| matches!(ev, WorkflowEvent::Info(InfoEvent::AlreadyRunning))));
            assert_eq!(steps_started(&events), vec!["sh -c \"sleep 0.5\""]);
            shutdown(h).await;
        }

        #[tokio::test]
        async fn a_new_workflow_can_follow_a_failed_one() {
            let mut h = spawn_controller();
            h.cmd_tx.send(UiCommand::Start(plan(vec![no_args("false")]))).unwrap();
            let (_, first) = until_finished(&mut h.event_rx).await;
            assert!(matches!(first, SessionStatus::Failed { .. }));

            h.cmd_tx.send(UiCommand::Start(plan(vec![no_args("true")]))).unwrap();
            let (events, second) = until_finished(&mut h.event_rx).await;
            assert_eq!(second, SessionStatus::Succeeded);
            assert_eq!(steps_started(&events), vec!["true"]);
            shutdown(h).await;
        }

        #[tokio::test]
        async fn empty_plan_is_reported_and_ignored() {
            let mut h = spawn_controller();
            h.cmd_tx.send(UiCommand::Start(plan(Vec::new()))).unwrap();
            let ev = tokio::time::timeout(Duration::from_secs(5), h.event_rx.recv())
                .await
                .unwrap();
            assert!(matches!(ev, Some(WorkflowEvent::Info(InfoEvent::NothingToRun))));
            shutdown(h).await;
        }

        #[tokio::test]
        async fn plan_notes_follow_the_workflow_start() {
            let mut h = spawn_controller();
            let mut with_note = plan(vec![no_args("true")]);
            with_note.notes.push("git already initialized".into());
            h.cmd_tx.send(UiCommand::Start(with_note)).unwrap();

            let (events, status) = until_finished(&mut h.event_rx).await;
            assert_eq!(status, SessionStatus::Succeeded);
            assert!(matches!(events[0], WorkflowEvent::WorkflowStarted { .. }));
            match &events[1] {
                WorkflowEvent::Info(InfoEvent::Message(msg)) => {
                    assert_eq!(msg, "git already initialized")
                }
                other => panic!("expected note, got {other:?}"),
            }
            shutdown(h).await;
        }

        #[tokio::test]
        async fn quit_while_running_cancels_and_returns() {
            let mut h = spawn_controller();
            h.cmd_tx
                .send(UiCommand::Start(plan(vec![Invocation::new(
                    "sh",
                    ["-c", "exec sleep 30"],
                )])))
                .unwrap();
            loop {
                match h.event_rx.recv().await {
                    Some(WorkflowEvent::StepStarted { .. }) => break,
                    Some(_) => continue,
                    None => panic!("controller stopped early"),
                }
            }
            h.cmd_tx.send(UiCommand::Quit).unwrap();
            tokio::time::timeout(Duration::from_secs(10), h.task)
                .await
                .expect("controller should stop after quit")
                .unwrap()
                .unwrap();

            let mut finished = None;
            while let Some(ev) = h.event_rx.recv().await {
                if let WorkflowEvent::Finished { status, .. } = ev {
                    finished = Some(status);
                }
            }
            assert_eq!(finished, Some(SessionStatus::Canceled));
        }
    }
}
