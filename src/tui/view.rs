use super::help::key_hint_line;
use super::state::{visible_log_window, Screen, UiState, MENU_ITEMS};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

pub fn draw(area: Rect, f: &mut Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(area);

    draw_header(chunks[0], f, state);
    match state.screen {
        Screen::Menu => draw_menu(chunks[1], f, state),
        Screen::EnvForm => draw_env_form(chunks[1], f, state),
        Screen::Logs => draw_logs(chunks[1], f, state),
        Screen::Error => draw_error(chunks[1], f, state),
    }
    f.render_widget(
        Paragraph::new(key_hint_line(state.screen, state.is_running())),
        chunks[2],
    );
}

fn draw_header(area: Rect, f: &mut Frame, state: &UiState) {
    let mut spans = vec![
        Span::styled("Node ", Style::default().fg(Color::Gray)),
        Span::styled(state.env.node_version.clone(), Style::default().fg(Color::Green)),
        Span::raw(" | "),
        Span::styled(state.env.package_manager.clone(), Style::default().fg(Color::Cyan)),
        Span::raw(" | "),
        Span::raw(state.env.project_dir.clone()),
    ];
    if !state.info.is_empty() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(state.info.clone(), Style::default().fg(Color::Yellow)));
    }
    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("ilaunch: project bootstrap"),
    );
    f.render_widget(header, area);
}

fn draw_menu(area: Rect, f: &mut Frame, state: &UiState) {
    let items: Vec<ListItem> = MENU_ITEMS
        .iter()
        .map(|item| ListItem::new(item.label()))
        .collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Menu"))
        .highlight_style(
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("➜ ");
    let mut list_state = ListState::default().with_selected(Some(state.selected));
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_env_form(area: Rect, f: &mut Frame, state: &UiState) {
    let Some(form) = state.env_form.as_ref() else {
        return;
    };
    let (pos, total) = form.position();
    let key = form.current().map(|e| e.key.as_str()).unwrap_or_default();
    let mut lines = vec![
        Line::from(Span::styled(
            format!("Field {pos}/{total}"),
            Style::default().fg(Color::Gray),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled(
                format!("{key}="),
                Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
            ),
            Span::raw(form.input.clone()),
            Span::styled("█", Style::default().fg(Color::Gray)),
        ]),
    ];
    if let Some(err) = form.error.as_ref() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            err.clone(),
            Style::default().fg(Color::Red),
        )));
    }
    let p = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Create .env file"),
    );
    f.render_widget(p, area);
}

fn draw_logs(area: Rect, f: &mut Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let title = state.workflow.as_deref().unwrap_or("Progress");
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(title.to_string()))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(state.progress.clamp(0.0, 1.0))
        .label(format!("{:3.0}% {}", state.progress * 100.0, state.status.label()));
    f.render_widget(gauge, chunks[0]);

    // Borders take two rows.
    let rows = chunks[1].height.saturating_sub(2) as usize;
    let lines: Vec<Line> = if state.log.is_empty() {
        vec![Line::from(Span::styled(
            "No output yet",
            Style::default().fg(Color::Gray),
        ))]
    } else {
        let window = visible_log_window(state.log.len(), rows, state.scroll);
        state
            .log
            .iter()
            .skip(window.start)
            .take(window.len())
            .map(|l| Line::from(l.clone()))
            .collect()
    };
    let logs = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Process logs"),
    );
    f.render_widget(logs, chunks[1]);
}

fn draw_error(area: Rect, f: &mut Frame, state: &UiState) {
    let message = state.error.as_deref().unwrap_or("unknown error");
    let p = Paragraph::new(vec![
        Line::from(Span::styled(
            "Error",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(message.to_string()),
    ])
    .wrap(Wrap { trim: false })
    .block(Block::default().borders(Borders::ALL).title("Error"));
    f.render_widget(p, area);
}
