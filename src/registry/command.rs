//! Command definitions.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::RegistryError;

/// Plain callback: runs the command.
pub type CallbackFn = Rc<dyn Fn() -> Result<(), RegistryError>>;

/// Check callback: with `true`, report availability without running;
/// with `false`, run.
pub type CheckFn = Rc<dyn Fn(bool) -> Result<bool, RegistryError>>;

/// How a command executes.
#[derive(Clone)]
pub enum CommandAction {
    Callback(CallbackFn),
    Check(CheckFn),
}

impl CommandAction {
    /// Wrap a closure as a plain callback.
    pub fn callback(f: impl Fn() -> Result<(), RegistryError> + 'static) -> Self {
        Self::Callback(Rc::new(f))
    }

    /// Wrap a closure as a check callback.
    pub fn check(f: impl Fn(bool) -> Result<bool, RegistryError> + 'static) -> Self {
        Self::Check(Rc::new(f))
    }

    pub fn is_check(&self) -> bool {
        matches!(self, Self::Check(_))
    }

    /// Whether the command can run now. Plain callbacks always can.
    pub fn is_available(&self) -> Result<bool, RegistryError> {
        match self {
            Self::Callback(_) => Ok(true),
            Self::Check(f) => f(true),
        }
    }

    /// Run the action, gating check callbacks on availability first.
    /// Returns whether the command ran.
    pub fn execute(&self) -> Result<bool, RegistryError> {
        match self {
            Self::Callback(f) => f().map(|()| true),
            Self::Check(f) => {
                if !f(true)? {
                    return Ok(false);
                }
                f(false)?;
                Ok(true)
            }
        }
    }
}

impl fmt::Debug for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback"),
            Self::Check(_) => f.write_str("Check"),
        }
    }
}

/// A key binding suggested by the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotkey {
    #[serde(default)]
    pub modifiers: Vec<String>,
    pub key: String,
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}+", modifier)?;
        }
        f.write_str(&self.key)
    }
}

/// A registered command.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub hotkeys: Vec<Hotkey>,
    pub owner: String,
    pub action: CommandAction,
}

impl Command {
    pub fn new(id: impl Into<String>, name: impl Into<String>, owner: impl Into<String>, action: CommandAction) -> Self {
        Self { id: id.into(), name: name.into(), icon: None, hotkeys: Vec::new(), owner: owner.into(), action }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_hotkeys(mut self, hotkeys: Vec<Hotkey>) -> Self {
        self.hotkeys = hotkeys;
        self
    }

    /// Serializable view without the action.
    pub fn info(&self) -> CommandInfo {
        CommandInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            hotkeys: self.hotkeys.clone(),
            plugin_id: self.owner.clone(),
            checkable: self.action.is_check(),
        }
    }
}

/// Read-only snapshot of a command, as listed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub hotkeys: Vec<Hotkey>,
    pub plugin_id: String,
    pub checkable: bool,
}

impl CommandInfo {
    /// Text the palette matches against.
    pub fn match_text(&self) -> String {
        format!("{} {}", self.name, self.id)
    }
}
