use super::state::Screen;
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};

/// Key binds available on `screen`, as (key, action) pairs.
pub fn key_binds(screen: Screen, running: bool) -> Vec<(&'static str, &'static str)> {
    match screen {
        Screen::Menu => vec![("↑/↓", "navigate"), ("Enter", "select"), ("Esc", "exit")],
        Screen::EnvForm => vec![("type", "edit value"), ("Enter", "confirm"), ("Esc", "back")],
        Screen::Logs if running => vec![("↑/↓", "scroll"), ("Esc", "cancel"), ("Ctrl-C", "quit")],
        Screen::Logs => vec![("↑/↓", "scroll"), ("Esc", "back")],
        Screen::Error => vec![("Enter", "back to menu"), ("Esc", "quit")],
    }
}

pub fn key_hint_line(screen: Screen, running: bool) -> Line<'static> {
    let mut spans = Vec::new();
    for (i, (key, action)) in key_binds(screen, running).into_iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled(" • ", Style::default().fg(Color::DarkGray)));
        }
        spans.push(Span::styled(key, Style::default().fg(Color::Magenta)));
        spans.push(Span::raw(" "));
        spans.push(Span::styled(action, Style::default().fg(Color::Gray)));
    }
    Line::from(spans)
}
