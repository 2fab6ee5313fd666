//! UI rendering for the palette.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use super::{CommandPalette, PaletteMode, Theme};
use crate::api::Notice;

/// Most notices shown at once.
const MAX_NOTICES: usize = 3;

/// Draw the palette.
pub fn draw(frame: &mut Frame, palette: &CommandPalette, notices: &[Notice], theme: &Theme) {
    let area = frame.area();
    let shown = notices.len().min(MAX_NOTICES);
    let notice_height = if shown == 0 { 0 } else { shown as u16 + 2 };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),             // Query
            Constraint::Min(3),                // Commands
            Constraint::Length(notice_height), // Notices
            Constraint::Length(1),             // Status bar
        ])
        .split(area);

    draw_header(frame, palette, theme, chunks[0]);
    draw_command_list(frame, palette, theme, chunks[1]);
    if shown > 0 {
        draw_notices(frame, &notices[notices.len() - shown..], theme, chunks[2]);
    }
    draw_status_bar(frame, palette, theme, chunks[3]);

    if palette.mode == PaletteMode::Help {
        draw_help_overlay(frame, theme);
    }
}

fn draw_header(frame: &mut Frame, palette: &CommandPalette, theme: &Theme, area: Rect) {
    let count = palette.filtered_commands().len();
    let right_title = if count == palette.total() {
        format!(" {} commands ", palette.total())
    } else {
        format!(" {}/{} commands ", count, palette.total())
    };

    let prompt = " > ";
    let input = Paragraph::new(Line::from(vec![
        Span::styled(prompt, Style::default().fg(theme.secondary)),
        Span::styled(palette.input.as_str(), Style::default().fg(theme.text)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.primary))
            .title(" plugbridge ")
            .title_style(Style::default().fg(theme.primary).add_modifier(Modifier::BOLD))
            .title_bottom(Line::from(right_title).right_aligned()),
    );
    frame.render_widget(input, area);

    let cursor = area.x + 1 + prompt.len() as u16 + palette.cursor_position as u16;
    frame.set_cursor_position((cursor, area.y + 1));
}

fn draw_command_list(frame: &mut Frame, palette: &CommandPalette, theme: &Theme, area: Rect) {
    let block = Block::default().borders(Borders::ALL).border_style(Style::default().fg(theme.border));
    let commands = palette.filtered_commands();

    if commands.is_empty() {
        let message = if palette.total() == 0 { "No commands registered" } else { "No matching commands" };
        let empty = Paragraph::new(Span::styled(message, Style::default().fg(theme.text_muted))).block(block);
        frame.render_widget(empty, area);
        return;
    }

    let items: Vec<ListItem> = commands
        .iter()
        .enumerate()
        .map(|(i, cmd)| {
            let selected = i == palette.selected;
            let name_style = if selected {
                Style::default().fg(theme.primary).bg(theme.selected_bg).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(theme.text)
            };

            let mut spans = Vec::new();
            if palette.show_icons {
                let icon = cmd.icon.as_deref().map_or("  ".to_string(), |_| "◆ ".to_string());
                spans.push(Span::styled(icon, Style::default().fg(theme.accent)));
            }
            if palette.show_plugin_name {
                spans.push(Span::styled(format!("{}: ", cmd.plugin_id), Style::default().fg(theme.secondary)));
            }
            spans.push(Span::styled(cmd.name.as_str(), name_style));
            if !cmd.hotkeys.is_empty() {
                let keys: Vec<String> = cmd.hotkeys.iter().map(ToString::to_string).collect();
                spans.push(Span::styled(format!("  {}", keys.join(", ")), Style::default().fg(theme.text_dim)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items).block(block).highlight_symbol("▸ ");
    let mut state = ListState::default();
    state.select(Some(palette.selected));
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_notices(frame: &mut Frame, notices: &[Notice], theme: &Theme, area: Rect) {
    let lines: Vec<Line> = notices
        .iter()
        .map(|n| {
            let color = if n.plugin_id.is_some() { theme.error } else { theme.text };
            Line::from(Span::styled(n.message.as_str(), Style::default().fg(color)))
        })
        .collect();
    let panel = Paragraph::new(lines).wrap(Wrap { trim: true }).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .title(" Notices ")
            .title_style(Style::default().fg(theme.text_dim)),
    );
    frame.render_widget(panel, area);
}

fn draw_status_bar(frame: &mut Frame, palette: &CommandPalette, theme: &Theme, area: Rect) {
    let line = match &palette.status_message {
        Some(message) => Line::from(Span::styled(format!(" {}", message), Style::default().fg(theme.success))),
        None => Line::from(Span::styled(
            " ↑↓ select  Enter run  Esc clear/quit  ? help",
            Style::default().fg(theme.text_muted),
        )),
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn draw_help_overlay(frame: &mut Frame, theme: &Theme) {
    let area = centered_rect(50, 12, frame.area());
    let lines = vec![
        help_line("Enter", "Run the selected command", theme),
        help_line("↑ ↓ / Ctrl+P Ctrl+N", "Move selection", theme),
        help_line("Tab / Shift+Tab", "Move selection", theme),
        help_line("PgUp / PgDn", "First / last command", theme),
        help_line("Ctrl+A / Ctrl+E", "Start / end of query", theme),
        help_line("Ctrl+U", "Clear query", theme),
        help_line("Esc", "Clear query, then quit", theme),
        help_line("Ctrl+C", "Quit", theme),
    ];
    let help = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.primary))
            .title(" Keys "),
    );
    frame.render_widget(Clear, area);
    frame.render_widget(help, area);
}

fn help_line<'a>(key: &'a str, description: &'a str, theme: &Theme) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!(" {:<22}", key), Style::default().fg(theme.accent)),
        Span::styled(description, Style::default().fg(theme.text)),
    ])
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
