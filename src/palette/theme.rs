//! Colors for the palette.

use ratatui::style::Color;

/// Palette color set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    pub name: &'static str,
    /// Borders of focused blocks, selected command
    pub primary: Color,
    /// Prompt and plugin names
    pub secondary: Color,
    /// Hotkeys and matched text
    pub accent: Color,
    pub text: Color,
    pub text_dim: Color,
    pub text_muted: Color,
    pub selected_bg: Color,
    pub border: Color,
    pub success: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self::default_theme()
    }
}

impl Theme {
    /// Works on both light and dark terminals.
    pub fn default_theme() -> Self {
        Self {
            name: "default",
            primary: Color::Rgb(124, 58, 237),   // Violet
            secondary: Color::Rgb(16, 185, 129), // Emerald
            accent: Color::Rgb(251, 146, 60),    // Orange
            text: Color::White,
            text_dim: Color::Rgb(156, 163, 175),
            text_muted: Color::Rgb(107, 114, 128),
            selected_bg: Color::Rgb(55, 65, 81),
            border: Color::Rgb(75, 85, 99),
            success: Color::Rgb(34, 197, 94),
            error: Color::Rgb(239, 68, 68),
        }
    }

    /// Plain ANSI colors for terminals without truecolor.
    pub fn basic() -> Self {
        Self {
            name: "basic",
            primary: Color::Magenta,
            secondary: Color::Green,
            accent: Color::Yellow,
            text: Color::Reset,
            text_dim: Color::Gray,
            text_muted: Color::DarkGray,
            selected_bg: Color::DarkGray,
            border: Color::DarkGray,
            success: Color::Green,
            error: Color::Red,
        }
    }

    /// Pick the theme the terminal can show, from `COLORTERM`.
    pub fn detect() -> Self {
        match std::env::var("COLORTERM").as_deref() {
            Ok("truecolor" | "24bit") => Self::default_theme(),
            _ => Self::basic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_theme() {
        assert_eq!(Theme::default().name, "default");
        assert_eq!(Theme::basic().primary, Color::Magenta);
    }
}
