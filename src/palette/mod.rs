//! Command palette.
//!
//! A fuzzy finder over the registry's commands. The state lives in
//! [`CommandPalette`]; `input`, `ui` and `app` drive it from a terminal.

mod app;
mod input;
mod theme;
mod ui;

pub use app::run_palette;
pub use input::{handle_key, PaletteAction};
pub use theme::Theme;
pub use ui::draw;

use nucleo::pattern::{CaseMatching, Normalization, Pattern};
use nucleo::{Config as NucleoConfig, Matcher, Utf32Str};

use crate::config::PaletteConfig;
use crate::registry::CommandInfo;

/// Rank commands against a query.
///
/// Returns indices into `commands`, best match first; equal scores keep
/// registry order. An empty query lists every command in order.
pub fn search(commands: &[CommandInfo], query: &str, limit: usize) -> Vec<usize> {
    if query.trim().is_empty() {
        return (0..commands.len()).take(limit).collect();
    }

    let mut matcher = Matcher::new(NucleoConfig::DEFAULT);
    let pattern = Pattern::parse(query, CaseMatching::Smart, Normalization::Smart);
    let mut buf = Vec::new();
    let mut scored: Vec<(usize, u32)> = commands
        .iter()
        .enumerate()
        .filter_map(|(i, cmd)| {
            let text = cmd.match_text();
            let haystack = Utf32Str::new(&text, &mut buf);
            pattern.score(haystack, &mut matcher).map(|score| (i, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().take(limit).map(|(i, _)| i).collect()
}

/// Which screen the palette shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaletteMode {
    #[default]
    Commands,
    Help,
}

/// Palette state: query, matches and selection.
#[derive(Debug, Clone)]
pub struct CommandPalette {
    /// Current query
    pub input: String,
    /// Cursor position in characters
    pub cursor_position: usize,
    /// Index into the filtered list
    pub selected: usize,
    pub mode: PaletteMode,
    pub status_message: Option<String>,
    pub should_quit: bool,
    pub show_plugin_name: bool,
    pub show_icons: bool,
    max_results: usize,
    commands: Vec<CommandInfo>,
    filtered: Vec<usize>,
}

impl CommandPalette {
    pub fn new(config: &PaletteConfig) -> Self {
        Self {
            input: String::new(),
            cursor_position: 0,
            selected: 0,
            mode: PaletteMode::Commands,
            status_message: None,
            should_quit: false,
            show_plugin_name: config.show_plugin_name,
            show_icons: config.show_icons,
            max_results: config.max_results.max(1),
            commands: Vec::new(),
            filtered: Vec::new(),
        }
    }

    /// Replace the command list, keeping the selected command when it is
    /// still listed.
    pub fn set_commands(&mut self, commands: Vec<CommandInfo>) {
        let keep = self.selected_command().map(|c| c.id.clone());
        self.commands = commands;
        self.update_filtered_commands();
        if let Some(id) = keep {
            if let Some(pos) = self.filtered.iter().position(|&i| self.commands[i].id == id) {
                self.selected = pos;
            }
        }
    }

    /// Re-run the search for the current query.
    pub fn update_filtered_commands(&mut self) {
        self.filtered = search(&self.commands, &self.input, self.max_results);
        if self.selected >= self.filtered.len() {
            self.selected = self.filtered.len().saturating_sub(1);
        }
    }

    pub fn total(&self) -> usize {
        self.commands.len()
    }

    /// Matching commands, best first.
    pub fn filtered_commands(&self) -> Vec<&CommandInfo> {
        self.filtered.iter().filter_map(|&i| self.commands.get(i)).collect()
    }

    pub fn selected_command(&self) -> Option<&CommandInfo> {
        self.filtered.get(self.selected).and_then(|&i| self.commands.get(i))
    }

    fn byte_index(&self) -> usize {
        self.input.char_indices().nth(self.cursor_position).map_or(self.input.len(), |(i, _)| i)
    }

    fn char_count(&self) -> usize {
        self.input.chars().count()
    }

    /// Insert a character at the cursor.
    pub fn enter_char(&mut self, c: char) {
        let at = self.byte_index();
        self.input.insert(at, c);
        self.cursor_position += 1;
        self.selected = 0;
        self.update_filtered_commands();
    }

    /// Delete the character before the cursor (backspace).
    pub fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let at = self.byte_index();
            self.input.remove(at);
            self.selected = 0;
            self.update_filtered_commands();
        }
    }

    /// Delete the character at the cursor (delete key).
    pub fn delete_char_forward(&mut self) {
        if self.cursor_position < self.char_count() {
            let at = self.byte_index();
            self.input.remove(at);
            self.selected = 0;
            self.update_filtered_commands();
        }
    }

    pub fn move_cursor_left(&mut self) {
        self.cursor_position = self.cursor_position.saturating_sub(1);
    }

    pub fn move_cursor_right(&mut self) {
        self.cursor_position = (self.cursor_position + 1).min(self.char_count());
    }

    pub fn move_cursor_start(&mut self) {
        self.cursor_position = 0;
    }

    pub fn move_cursor_end(&mut self) {
        self.cursor_position = self.char_count();
    }

    pub fn clear_input(&mut self) {
        self.input.clear();
        self.cursor_position = 0;
        self.selected = 0;
        self.update_filtered_commands();
    }

    /// Move selection up, wrapping to the bottom.
    pub fn select_previous(&mut self) {
        if self.filtered.is_empty() {
            return;
        }
        self.selected = if self.selected == 0 { self.filtered.len() - 1 } else { self.selected - 1 };
    }

    /// Move selection down, wrapping to the top.
    pub fn select_next(&mut self) {
        if self.filtered.is_empty() {
            return;
        }
        self.selected = (self.selected + 1) % self.filtered.len();
    }

    pub fn select_first(&mut self) {
        self.selected = 0;
    }

    pub fn select_last(&mut self) {
        self.selected = self.filtered.len().saturating_sub(1);
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
    }

    pub fn clear_status(&mut self) {
        self.status_message = None;
    }

    pub fn show_help(&mut self) {
        self.mode = PaletteMode::Help;
    }

    pub fn dismiss_help(&mut self) {
        self.mode = PaletteMode::Commands;
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }
}
