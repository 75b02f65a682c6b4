mod help;
mod state;
mod view;

use crate::cli::AppContext;
use crate::env_file::{self, ENV_FILE};
use crate::model::WorkflowEvent;
use crate::orchestrator::{self, UiCommand};
use crate::runner::ProcessRunner;
use crate::workflow;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use state::{apply_event, Environment, EnvForm, FormStep, MenuItem, Screen, UiState, MENU_ITEMS};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Exit code reported when the user interrupts with Ctrl-C.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// What the UI loop should do after a key press.
#[derive(Debug)]
enum KeyAction {
    None,
    Send(UiCommand),
    Quit,
}

pub async fn run(ctx: AppContext, runner: ProcessRunner) -> Result<i32> {
    // Unbounded channels avoid backpressure and task switching in the hot path.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(ctx, event_rx, cmd_tx));

    let res = orchestrator::run_controller(runner, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join())
        .await
        .context("join TUI thread")?;
    let code = match join_res {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
    };

    res?;
    Ok(code)
}

/// Run the TUI loop on a dedicated thread. Returns the exit code chosen by the session.
fn run_threaded(
    ctx: AppContext,
    mut event_rx: UnboundedReceiver<WorkflowEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<i32> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        env: Environment {
            node_version: ctx.toolchain.node_version.clone(),
            package_manager: ctx.package_manager.clone(),
            project_dir: ctx.project_dir.display().to_string(),
        },
        ..Default::default()
    };

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();
    let mut dirty = true;

    let res = loop {
        // Drain without blocking; the unbounded channel never applies backpressure.
        while let Ok(ev) = event_rx.try_recv() {
            apply_event(&mut state, ev);
            dirty = true;
        }

        if dirty || last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| view::draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
            dirty = false;
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                dirty = true;
                match handle_key(&mut state, &ctx, k) {
                    KeyAction::None => {}
                    KeyAction::Send(cmd) => {
                        let _ = cmd_tx.send(cmd);
                    }
                    KeyAction::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(state.exit_code);
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn handle_key(state: &mut UiState, ctx: &AppContext, k: KeyEvent) -> KeyAction {
    if k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c') {
        // The controller cancels any running workflow on quit.
        state.exit_code = INTERRUPTED_EXIT_CODE;
        return KeyAction::Quit;
    }
    if k.code == KeyCode::Esc {
        if state.is_running() {
            return KeyAction::Send(UiCommand::Cancel);
        }
        return match state.screen {
            Screen::EnvForm | Screen::Logs => {
                state.env_form = None;
                state.screen = Screen::Menu;
                KeyAction::None
            }
            Screen::Menu | Screen::Error => KeyAction::Quit,
        };
    }

    match state.screen {
        Screen::Menu => match k.code {
            KeyCode::Up | KeyCode::Char('k') => {
                state.selected = state.selected.saturating_sub(1);
                KeyAction::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if state.selected + 1 < MENU_ITEMS.len() {
                    state.selected += 1;
                }
                KeyAction::None
            }
            KeyCode::Enter => menu_action(state, ctx),
            _ => KeyAction::None,
        },
        Screen::EnvForm => env_form_key(state, ctx, k.code),
        Screen::Logs => {
            match k.code {
                KeyCode::Up | KeyCode::Char('k') => state.scroll_up(),
                KeyCode::Down | KeyCode::Char('j') => state.scroll_down(),
                _ => {}
            }
            KeyAction::None
        }
        Screen::Error => {
            if k.code == KeyCode::Enter {
                state.screen = Screen::Menu;
            }
            KeyAction::None
        }
    }
}

fn menu_action(state: &mut UiState, ctx: &AppContext) -> KeyAction {
    if state.is_running() {
        state.info = "A workflow is already running".into();
        return KeyAction::None;
    }
    let plan = match state.selected_item() {
        MenuItem::CreateEnv => {
            match env_file::read_example(&ctx.project_dir) {
                Ok(entries) => {
                    state.env_form = Some(EnvForm::new(entries));
                    state.screen = Screen::EnvForm;
                }
                Err(e) => state.show_error(format!("read {}: {e}", env_file::EXAMPLE_FILE)),
            }
            return KeyAction::None;
        }
        MenuItem::InstallDependencies => workflow::install_dependencies(&ctx.package_manager),
        MenuItem::InitializeGit => workflow::initialize_git(&ctx.project_dir),
        MenuItem::RunAll => match workflow::run_all(&ctx.project_dir, &ctx.package_manager) {
            Ok(plan) => plan,
            Err(e) => {
                state.show_error(format!("create env defaults: {e}"));
                return KeyAction::None;
            }
        },
        MenuItem::Exit => return KeyAction::Quit,
    };
    state.screen = Screen::Logs;
    KeyAction::Send(UiCommand::Start(plan))
}

fn env_form_key(state: &mut UiState, ctx: &AppContext, code: KeyCode) -> KeyAction {
    let Some(form) = state.env_form.as_mut() else {
        state.screen = Screen::Menu;
        return KeyAction::None;
    };
    match code {
        KeyCode::Char(c) => form.push_char(c),
        KeyCode::Backspace => form.pop_char(),
        KeyCode::Enter => {
            if let FormStep::Complete(values) = form.submit() {
                state.env_form = None;
                let path = ctx.project_dir.join(ENV_FILE);
                match env_file::write_env_file(&path, &values) {
                    Ok(()) => {
                        state.log.push(".env file created");
                        state.info = ".env file created".into();
                        state.screen = Screen::Menu;
                    }
                    Err(e) => state.show_error(format!("write .env: {e}")),
                }
            }
        }
        _ => {}
    }
    KeyAction::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStatus;
    use crate::toolchain::ToolchainCheck;
    use std::fs;
    use std::path::Path;

    fn ctx(dir: &Path) -> AppContext {
        AppContext {
            project_dir: dir.to_path_buf(),
            package_manager: "npm".into(),
            toolchain: ToolchainCheck {
                node_path: "/usr/bin/node".into(),
                node_version: "v20.0.0".into(),
                package_manager: "npm".into(),
            },
        }
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn select(state: &mut UiState, item: MenuItem) {
        state.selected = MENU_ITEMS.iter().position(|i| *i == item).unwrap();
    }

    #[test]
    fn menu_navigation_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let mut state = UiState::default();
        handle_key(&mut state, &ctx, press(KeyCode::Up));
        assert_eq!(state.selected, 0);
        for _ in 0..10 {
            handle_key(&mut state, &ctx, press(KeyCode::Down));
        }
        assert_eq!(state.selected_item(), MenuItem::Exit);
        assert!(matches!(
            handle_key(&mut state, &ctx, press(KeyCode::Enter)),
            KeyAction::Quit
        ));
    }

    #[test]
    fn install_starts_a_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let mut state = UiState::default();
        select(&mut state, MenuItem::InstallDependencies);
        match handle_key(&mut state, &ctx, press(KeyCode::Enter)) {
            KeyAction::Send(UiCommand::Start(plan)) => {
                assert_eq!(plan.steps.len(), 1);
                assert_eq!(plan.steps[0].to_string(), "npm install");
            }
            other => panic!("expected start, got {other:?}"),
        }
        assert_eq!(state.screen, Screen::Logs);
    }

    #[test]
    fn esc_cancels_while_running_and_ctrl_c_quits_with_130() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let mut state = UiState {
            screen: Screen::Logs,
            status: SessionStatus::Running,
            ..Default::default()
        };
        assert!(matches!(
            handle_key(&mut state, &ctx, press(KeyCode::Esc)),
            KeyAction::Send(UiCommand::Cancel)
        ));

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(matches!(handle_key(&mut state, &ctx, ctrl_c), KeyAction::Quit));
        assert_eq!(state.exit_code, 130);
    }

    #[test]
    fn esc_goes_back_then_quits() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let mut state = UiState {
            screen: Screen::Logs,
            ..Default::default()
        };
        assert!(matches!(
            handle_key(&mut state, &ctx, press(KeyCode::Esc)),
            KeyAction::None
        ));
        assert_eq!(state.screen, Screen::Menu);
        assert!(matches!(
            handle_key(&mut state, &ctx, press(KeyCode::Esc)),
            KeyAction::Quit
        ));
    }

    #[test]
    fn env_form_writes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(env_file::EXAMPLE_FILE),
            "PORT=3000\nAPI_KEY=\n",
        )
        .unwrap();
        let ctx = ctx(dir.path());
        let mut state = UiState::default();
        select(&mut state, MenuItem::CreateEnv);
        handle_key(&mut state, &ctx, press(KeyCode::Enter));
        assert_eq!(state.screen, Screen::EnvForm);

        // API_KEY sorts first and has no default.
        handle_key(&mut state, &ctx, press(KeyCode::Enter));
        assert_eq!(state.screen, Screen::EnvForm);
        for c in "secret".chars() {
            handle_key(&mut state, &ctx, press(KeyCode::Char(c)));
        }
        handle_key(&mut state, &ctx, press(KeyCode::Enter));
        handle_key(&mut state, &ctx, press(KeyCode::Enter));

        assert_eq!(state.screen, Screen::Menu);
        assert_eq!(
            fs::read_to_string(dir.path().join(ENV_FILE)).unwrap(),
            "API_KEY=secret\nPORT=3000\n"
        );
    }

    #[test]
    fn missing_example_shows_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let mut state = UiState::default();
        select(&mut state, MenuItem::CreateEnv);
        handle_key(&mut state, &ctx, press(KeyCode::Enter));
        assert_eq!(state.screen, Screen::Error);
        handle_key(&mut state, &ctx, press(KeyCode::Enter));
        assert_eq!(state.screen, Screen::Menu);
    }
}
