//! Input handling for the palette.
//!
//! Processes keyboard events and updates palette state.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use super::{CommandPalette, PaletteMode};

/// Something the event loop has to do on the palette's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaletteAction {
    /// Run the command with this id.
    Execute(String),
}

/// Handle one key press.
pub fn handle_key(key: KeyEvent, palette: &mut CommandPalette) -> Option<PaletteAction> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        palette.quit();
        return None;
    }
    match palette.mode {
        PaletteMode::Help => {
            handle_help_mode(key, palette);
            None
        }
        PaletteMode::Commands => handle_commands_mode(key, palette),
    }
}

fn handle_help_mode(key: KeyEvent, palette: &mut CommandPalette) {
    if matches!(key.code, KeyCode::Esc | KeyCode::Char('?' | 'q') | KeyCode::Enter) {
        palette.dismiss_help();
    }
}

fn handle_commands_mode(key: KeyEvent, palette: &mut CommandPalette) -> Option<PaletteAction> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => {
            if palette.input.is_empty() {
                palette.quit();
            } else {
                palette.clear_input();
            }
        }
        KeyCode::Enter => {
            let id = palette.selected_command().map(|c| c.id.clone());
            match id {
                Some(id) => return Some(PaletteAction::Execute(id)),
                None => palette.set_status("No matching command"),
            }
        }

        // Navigation
        KeyCode::Up => palette.select_previous(),
        KeyCode::Down | KeyCode::Tab => palette.select_next(),
        KeyCode::BackTab => palette.select_previous(),
        KeyCode::Char('p' | 'k') if ctrl => palette.select_previous(),
        KeyCode::Char('n' | 'j') if ctrl => palette.select_next(),
        KeyCode::PageUp => palette.select_first(),
        KeyCode::PageDown => palette.select_last(),

        // Line editing
        KeyCode::Char('a') if ctrl => palette.move_cursor_start(),
        KeyCode::Char('e') if ctrl => palette.move_cursor_end(),
        KeyCode::Char('u') if ctrl => palette.clear_input(),
        KeyCode::Home => palette.move_cursor_start(),
        KeyCode::End => palette.move_cursor_end(),
        KeyCode::Left => palette.move_cursor_left(),
        KeyCode::Right => palette.move_cursor_right(),
        KeyCode::Backspace => palette.delete_char(),
        KeyCode::Delete => palette.delete_char_forward(),

        KeyCode::Char('?') if palette.input.is_empty() => palette.show_help(),
        KeyCode::Char(c) if !ctrl => {
            palette.clear_status();
            palette.enter_char(c);
        }
        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaletteConfig;
    use crate::registry::CommandInfo;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn palette() -> CommandPalette {
        let mut palette = CommandPalette::new(&PaletteConfig::default());
        palette.set_commands(
            ["a:first", "b:second"]
                .iter()
                .map(|id| CommandInfo {
                    id: id.to_string(),
                    name: id.to_string(),
                    icon: None,
                    hotkeys: Vec::new(),
                    plugin_id: id[..1].to_string(),
                    checkable: false,
                })
                .collect(),
        );
        palette
    }

    #[test]
    fn test_enter_executes_selected() {
        let mut palette = palette();
        handle_key(key(KeyCode::Down), &mut palette);
        assert_eq!(handle_key(key(KeyCode::Enter), &mut palette), Some(PaletteAction::Execute("b:second".into())));
    }

    #[test]
    fn test_enter_without_match_sets_status() {
        let mut palette = palette();
        for c in "zzz".chars() {
            handle_key(key(KeyCode::Char(c)), &mut palette);
        }
        assert_eq!(handle_key(key(KeyCode::Enter), &mut palette), None);
        assert_eq!(palette.status_message.as_deref(), Some("No matching command"));
    }

    #[test]
    fn test_escape_clears_then_quits() {
        let mut palette = palette();
        handle_key(key(KeyCode::Char('x')), &mut palette);
        handle_key(key(KeyCode::Esc), &mut palette);
        assert!(palette.input.is_empty());
        assert!(!palette.should_quit);
        handle_key(key(KeyCode::Esc), &mut palette);
        assert!(palette.should_quit);
    }

    #[test]
    fn test_ctrl_c_quits_from_help() {
        let mut palette = palette();
        handle_key(key(KeyCode::Char('?')), &mut palette);
        assert_eq!(palette.mode, PaletteMode::Help);
        handle_key(ctrl('c'), &mut palette);
        assert!(palette.should_quit);
    }

    #[test]
    fn test_ctrl_keys_do_not_type() {
        let mut palette = palette();
        handle_key(ctrl('n'), &mut palette);
        assert_eq!(palette.selected, 1);
        assert!(palette.input.is_empty());
    }
}
