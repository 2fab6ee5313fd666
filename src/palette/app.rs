//! Palette runner.
//!
//! Handles the event loop and terminal setup/teardown.

use std::io::{self, stdout};
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use super::{draw, handle_key, CommandPalette, PaletteAction, Theme};
use crate::config::PaletteConfig;
use crate::loader::PluginLoader;
use crate::registry::CommandInfo;

/// Run the interactive palette until the user quits.
///
/// Plugin timers keep firing while the palette is open.
pub async fn run_palette(loader: &PluginLoader, config: &PaletteConfig) -> Result<()> {
    setup_terminal()?;
    let backend = CrosstermBackend::new(stdout());
    let mut terminal = match Terminal::new(backend) {
        Ok(terminal) => terminal,
        Err(e) => {
            restore_terminal()?;
            return Err(e.into());
        }
    };

    let result = run_main_loop(&mut terminal, loader, config).await;
    restore_terminal()?;
    result
}

/// Commands whose check callback currently allows them.
fn available_commands(loader: &PluginLoader) -> Vec<CommandInfo> {
    let registry = &loader.app().registry;
    registry.get_all_commands().into_iter().filter(|c| !c.checkable || registry.is_command_available(&c.id)).collect()
}

async fn run_main_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    loader: &PluginLoader,
    config: &PaletteConfig,
) -> Result<()> {
    let tick_rate = Duration::from_millis(100);
    let theme = Theme::detect();
    let mut palette = CommandPalette::new(config);
    palette.set_commands(available_commands(loader));

    loop {
        let notices = loader.app().notices.visible(chrono::Local::now());
        terminal.draw(|frame| draw(frame, &palette, &notices, &theme))?;

        let mut refresh = false;
        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(PaletteAction::Execute(id)) = handle_key(key, &mut palette) {
                        let ran = loader.execute_command(&id).await;
                        tracing::debug!(command = %id, ran, "Palette command");
                        palette.set_status(if ran { format!("Ran {}", id) } else { format!("{} is not available", id) });
                        refresh = true;
                    }
                }
            }
        }

        if palette.should_quit {
            break;
        }

        if loader.tick().await > 0 || refresh {
            palette.set_commands(available_commands(loader));
        }
    }

    Ok(())
}

/// Setup the terminal for TUI mode.
fn setup_terminal() -> Result<()> {
    enable_raw_mode()?;
    execute!(stdout(), EnterAlternateScreen)?;

    // Restore the terminal on panic
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));

    Ok(())
}

/// Restore the terminal to normal mode.
fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    execute!(stdout(), LeaveAlternateScreen)?;
    Ok(())
}
