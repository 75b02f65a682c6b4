use crate::env_file::EnvEntry;
use crate::model::{InfoEvent, SessionStatus, WorkflowEvent};
use crate::orchestrator::session::{BoundedLog, MAX_LOG_LINES};
use std::collections::BTreeMap;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Menu,
    EnvForm,
    Logs,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    CreateEnv,
    InstallDependencies,
    InitializeGit,
    RunAll,
    Exit,
}

pub const MENU_ITEMS: [MenuItem; 5] = [
    MenuItem::CreateEnv,
    MenuItem::InstallDependencies,
    MenuItem::InitializeGit,
    MenuItem::RunAll,
    MenuItem::Exit,
];

impl MenuItem {
    pub fn label(self) -> &'static str {
        match self {
            MenuItem::CreateEnv => "Create .env file",
            MenuItem::InstallDependencies => "Install dependencies",
            MenuItem::InitializeGit => "Initialize git",
            MenuItem::RunAll => "Run all",
            MenuItem::Exit => "Exit",
        }
    }
}

/// Outcome of confirming one env form field.
#[derive(Debug, PartialEq, Eq)]
pub enum FormStep {
    Pending,
    Complete(BTreeMap<String, String>),
}

/// One-field-at-a-time editor for `.env` values, prefilled with each example default.
#[derive(Debug, Clone)]
pub struct EnvForm {
    entries: Vec<EnvEntry>,
    index: usize,
    pub input: String,
    values: BTreeMap<String, String>,
    pub error: Option<String>,
}

impl EnvForm {
    pub fn new(entries: Vec<EnvEntry>) -> Self {
        let input = entries.first().map(|e| e.default.clone()).unwrap_or_default();
        Self {
            entries,
            index: 0,
            input,
            values: BTreeMap::new(),
            error: None,
        }
    }

    pub fn current(&self) -> Option<&EnvEntry> {
        self.entries.get(self.index)
    }

    /// 1-based field position and field count, for the form header.
    pub fn position(&self) -> (usize, usize) {
        (self.index + 1, self.entries.len())
    }

    pub fn push_char(&mut self, c: char) {
        self.error = None;
        self.input.push(c);
    }

    pub fn pop_char(&mut self) {
        self.input.pop();
    }

    pub fn submit(&mut self) -> FormStep {
        let Some(entry) = self.entries.get(self.index) else {
            return FormStep::Complete(std::mem::take(&mut self.values));
        };
        let value = self.input.trim();
        if value.is_empty() {
            self.error = Some(format!("value for {} cannot be empty", entry.key));
            return FormStep::Pending;
        }
        self.values.insert(entry.key.clone(), value.to_string());
        self.error = None;
        self.index += 1;
        match self.entries.get(self.index) {
            Some(next) => {
                self.input = next.default.clone();
                FormStep::Pending
            }
            None => FormStep::Complete(std::mem::take(&mut self.values)),
        }
    }
}

/// Header facts shown on every screen.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub node_version: String,
    pub package_manager: String,
    pub project_dir: String,
}

pub struct UiState {
    pub screen: Screen,
    pub selected: usize,
    pub env: Environment,
    // Live view of the session log, replaced by its snapshot when a workflow finishes.
    pub log: BoundedLog,
    // Lines scrolled up from the bottom of the log.
    pub scroll: usize,
    pub progress: f64,
    pub status: SessionStatus,
    pub workflow: Option<String>,
    pub info: String,
    pub error: Option<String>,
    pub env_form: Option<EnvForm>,
    pub exit_code: i32,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            screen: Screen::Menu,
            selected: 0,
            env: Environment::default(),
            log: BoundedLog::new(MAX_LOG_LINES),
            scroll: 0,
            progress: 0.0,
            status: SessionStatus::Idle,
            workflow: None,
            info: String::new(),
            error: None,
            env_form: None,
            exit_code: 0,
        }
    }
}

impl UiState {
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn selected_item(&self) -> MenuItem {
        MENU_ITEMS[self.selected.min(MENU_ITEMS.len() - 1)]
    }

    pub fn show_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.screen = Screen::Error;
    }

    pub fn scroll_up(&mut self) {
        if self.scroll + 1 < self.log.len() {
            self.scroll += 1;
        }
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(1);
    }
}

/// Fold one controller event into the UI state.
pub fn apply_event(state: &mut UiState, ev: WorkflowEvent) {
    match ev {
        WorkflowEvent::WorkflowStarted { name, .. } => {
            state.log.replace_with(std::iter::empty());
            state.workflow = Some(name);
            state.status = SessionStatus::Running;
            state.progress = 0.0;
            state.scroll = 0;
            state.error = None;
            state.screen = Screen::Logs;
        }
        WorkflowEvent::StepStarted {
            index,
            total,
            invocation,
        } => {
            state.info = format!("Step {index}/{total}");
            state.log.push(format!("$ {invocation}"));
        }
        WorkflowEvent::Output { line, .. } => state.log.push(line),
        WorkflowEvent::Warning(msg) => state.log.push(format!("warning: {msg}")),
        WorkflowEvent::StepCompleted { status, .. } => {
            if status.is_success() {
                state.log.push("process completed successfully");
            }
        }
        WorkflowEvent::Progress(p) => {
            if p > state.progress {
                state.progress = p.min(1.0);
            }
        }
        WorkflowEvent::Finished { status, log } => {
            state.exit_code = status.exit_code();
            state.log.replace_with(log);
            state.scroll = 0;
            match &status {
                SessionStatus::Succeeded => state.info = "Done".into(),
                SessionStatus::Failed { cause, .. } => {
                    state.info = "Failed".into();
                    state.show_error(cause.clone());
                }
                SessionStatus::Canceled => {
                    state.info = "Canceled".into();
                    state.show_error("operation canceled");
                }
                SessionStatus::Idle | SessionStatus::Running => {}
            }
            state.status = status;
        }
        WorkflowEvent::Info(info) => {
            if let InfoEvent::Message(msg) = &info {
                state.log.push(msg.clone());
            }
            state.info = info.to_message();
        }
    }
}

/// Index range of log lines that fit in `height` rows, `scroll` lines up from the bottom.
pub fn visible_log_window(len: usize, height: usize, scroll: usize) -> Range<usize> {
    let start = len.saturating_sub(height.saturating_add(scroll));
    let end = (start + height).min(len);
    start..end
}
