//! Plugin registry.
//!
//! The single table of everything loaded plugins contribute to the host UI:
//! commands, setting tabs, ribbon icons, markdown post-processors, views,
//! status-bar items and editor extensions. Each entry records the id of the
//! plugin that owns it so unloading is a filtered removal.
//!
//! Commands keep insertion order. Registering an id that already exists
//! replaces the entry in place (last write wins).

mod command;

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;

pub use command::{CallbackFn, CheckFn, Command, CommandAction, CommandInfo, Hotkey};

/// Errors raised by registry operations and command callbacks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A view type can only have one factory.
    #[error("View type '{view_type}' is already registered by '{owner}'")]
    ViewExists { view_type: String, owner: String },

    /// A command callback threw or failed.
    #[error("Command '{id}' failed: {message}")]
    Callback { id: String, message: String },

    /// The script engine is busy running plugin code.
    #[error("Cannot run '{0}' while plugin code is executing")]
    Busy(String),
}

/// Namespace a plugin's command id as `"{plugin}:{id}"`, unless the plugin
/// already did.
pub fn qualified_command_id(plugin_id: &str, id: &str) -> String {
    match id.strip_prefix(plugin_id).and_then(|rest| rest.strip_prefix(':')) {
        Some(_) => id.to_string(),
        None => format!("{}:{}", plugin_id, id),
    }
}

/// A settings tab contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingTabEntry {
    pub id: u32,
    pub plugin_id: String,
    pub name: String,
    pub handle: u32,
}

/// A ribbon icon contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RibbonIcon {
    pub id: u32,
    pub plugin_id: String,
    pub icon: String,
    pub title: String,
    pub handle: u32,
}

/// A markdown post-processor, optionally bound to a code block language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessorEntry {
    pub id: u32,
    pub plugin_id: String,
    pub handle: u32,
    pub sort_order: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A view factory keyed by view type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewEntry {
    pub view_type: String,
    pub plugin_id: String,
    pub handle: u32,
}

/// A status-bar item element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBarItem {
    pub id: u32,
    pub plugin_id: String,
    pub element: u32,
}

/// An opaque editor extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorExtension {
    pub id: u32,
    pub plugin_id: String,
}

/// How many entries of each kind [`PluginRegistry::remove_owned_by`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removed {
    pub commands: usize,
    pub setting_tabs: usize,
    pub ribbon_icons: usize,
    pub post_processors: usize,
    pub views: usize,
    pub status_bar_items: usize,
    pub editor_extensions: usize,
}

impl Removed {
    pub fn total(&self) -> usize {
        self.commands
            + self.setting_tabs
            + self.ribbon_icons
            + self.post_processors
            + self.views
            + self.status_bar_items
            + self.editor_extensions
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u32,
    commands: Vec<Command>,
    setting_tabs: Vec<SettingTabEntry>,
    ribbon_icons: Vec<RibbonIcon>,
    post_processors: Vec<PostProcessorEntry>,
    views: Vec<ViewEntry>,
    status_bar_items: Vec<StatusBarItem>,
    editor_extensions: Vec<EditorExtension>,
}

impl Inner {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared handle to the registry. Clones refer to the same table.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    inner: Rc<RefCell<Inner>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a command. An existing id is replaced in place and the
    /// displaced command is returned.
    pub fn register_command(&self, command: Command) -> Option<Command> {
        let mut inner = self.inner.borrow_mut();
        if let Some(slot) = inner.commands.iter_mut().find(|c| c.id == command.id) {
            if slot.owner != command.owner {
                tracing::warn!(
                    command = %command.id,
                    previous = %slot.owner,
                    owner = %command.owner,
                    "Command id collision, replacing previous registration"
                );
            } else {
                tracing::debug!(command = %command.id, "Command re-registered");
            }
            return Some(std::mem::replace(slot, command));
        }
        tracing::debug!(command = %command.id, owner = %command.owner, "Command registered");
        inner.commands.push(command);
        None
    }

    /// Remove a command. No-op for unknown ids.
    pub fn unregister_command(&self, id: &str) -> Option<Command> {
        let mut inner = self.inner.borrow_mut();
        let idx = inner.commands.iter().position(|c| c.id == id)?;
        Some(inner.commands.remove(idx))
    }

    /// Run a command. Returns whether it executed.
    ///
    /// Check-style commands are first asked whether they are available.
    /// Failures are logged and reported as `false`.
    pub fn execute_command(&self, id: &str) -> bool {
        let Some(action) = self.inner.borrow().commands.iter().find(|c| c.id == id).map(|c| c.action.clone())
        else {
            tracing::debug!(command = %id, "Unknown command");
            return false;
        };
        match action.execute() {
            Ok(ran) => ran,
            Err(e) => {
                tracing::warn!(command = %id, error = %e, "Command failed");
                false
            }
        }
    }

    /// Whether a command exists and its check callback currently allows it.
    pub fn is_command_available(&self, id: &str) -> bool {
        let Some(action) = self.command_action(id) else { return false };
        action.is_available().unwrap_or_else(|e| {
            tracing::debug!(command = %id, error = %e, "Availability check failed");
            false
        })
    }

    /// Every command in insertion order.
    pub fn get_all_commands(&self) -> Vec<CommandInfo> {
        self.inner.borrow().commands.iter().map(Command::info).collect()
    }

    pub fn get_command(&self, id: &str) -> Option<CommandInfo> {
        self.inner.borrow().commands.iter().find(|c| c.id == id).map(Command::info)
    }

    /// The action of a command, for callers that run it themselves.
    pub fn command_action(&self, id: &str) -> Option<CommandAction> {
        self.inner.borrow().commands.iter().find(|c| c.id == id).map(|c| c.action.clone())
    }

    pub fn commands_owned_by(&self, plugin_id: &str) -> Vec<CommandInfo> {
        self.inner.borrow().commands.iter().filter(|c| c.owner == plugin_id).map(Command::info).collect()
    }

    pub fn command_count(&self) -> usize {
        self.inner.borrow().commands.len()
    }

    pub fn add_setting_tab(&self, plugin_id: &str, name: &str, handle: u32) -> u32 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        inner.setting_tabs.push(SettingTabEntry { id, plugin_id: plugin_id.to_string(), name: name.to_string(), handle });
        id
    }

    pub fn setting_tabs(&self) -> Vec<SettingTabEntry> {
        self.inner.borrow().setting_tabs.clone()
    }

    /// First setting tab of a plugin.
    pub fn setting_tab_for(&self, plugin_id: &str) -> Option<SettingTabEntry> {
        self.inner.borrow().setting_tabs.iter().find(|t| t.plugin_id == plugin_id).cloned()
    }

    pub fn add_ribbon_icon(&self, plugin_id: &str, icon: &str, title: &str, handle: u32) -> u32 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        inner.ribbon_icons.push(RibbonIcon {
            id,
            plugin_id: plugin_id.to_string(),
            icon: icon.to_string(),
            title: title.to_string(),
            handle,
        });
        id
    }

    pub fn ribbon_icons(&self) -> Vec<RibbonIcon> {
        self.inner.borrow().ribbon_icons.clone()
    }

    pub fn add_post_processor(&self, plugin_id: &str, handle: u32, sort_order: i32, language: Option<String>) -> u32 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        inner.post_processors.push(PostProcessorEntry {
            id,
            plugin_id: plugin_id.to_string(),
            handle,
            sort_order,
            language,
        });
        id
    }

    /// Post-processors in execution order: by sort order, then registration.
    pub fn post_processors(&self) -> Vec<PostProcessorEntry> {
        let mut entries = self.inner.borrow().post_processors.clone();
        entries.sort_by_key(|p| (p.sort_order, p.id));
        entries
    }

    /// Register a view factory. Each view type has at most one.
    pub fn register_view(&self, plugin_id: &str, view_type: &str, handle: u32) -> Result<(), RegistryError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(existing) = inner.views.iter().find(|v| v.view_type == view_type) {
            return Err(RegistryError::ViewExists {
                view_type: view_type.to_string(),
                owner: existing.plugin_id.clone(),
            });
        }
        inner.views.push(ViewEntry { view_type: view_type.to_string(), plugin_id: plugin_id.to_string(), handle });
        Ok(())
    }

    pub fn view(&self, view_type: &str) -> Option<ViewEntry> {
        self.inner.borrow().views.iter().find(|v| v.view_type == view_type).cloned()
    }

    pub fn views(&self) -> Vec<ViewEntry> {
        self.inner.borrow().views.clone()
    }

    pub fn add_status_bar_item(&self, plugin_id: &str, element: u32) -> u32 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        inner.status_bar_items.push(StatusBarItem { id, plugin_id: plugin_id.to_string(), element });
        id
    }

    pub fn status_bar_items(&self) -> Vec<StatusBarItem> {
        self.inner.borrow().status_bar_items.clone()
    }

    pub fn add_editor_extension(&self, plugin_id: &str) -> u32 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        inner.editor_extensions.push(EditorExtension { id, plugin_id: plugin_id.to_string() });
        id
    }

    pub fn editor_extensions(&self) -> Vec<EditorExtension> {
        self.inner.borrow().editor_extensions.clone()
    }

    /// Remove a setting tab, ribbon icon, post-processor, status-bar item or
    /// editor extension by id.
    pub fn remove_entry(&self, id: u32) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.setting_tabs.len()
            + inner.ribbon_icons.len()
            + inner.post_processors.len()
            + inner.status_bar_items.len()
            + inner.editor_extensions.len();
        inner.setting_tabs.retain(|e| e.id != id);
        inner.ribbon_icons.retain(|e| e.id != id);
        inner.post_processors.retain(|e| e.id != id);
        inner.status_bar_items.retain(|e| e.id != id);
        inner.editor_extensions.retain(|e| e.id != id);
        let after = inner.setting_tabs.len()
            + inner.ribbon_icons.len()
            + inner.post_processors.len()
            + inner.status_bar_items.len()
            + inner.editor_extensions.len();
        before != after
    }

    pub fn unregister_view(&self, view_type: &str) -> Option<ViewEntry> {
        let mut inner = self.inner.borrow_mut();
        let idx = inner.views.iter().position(|v| v.view_type == view_type)?;
        Some(inner.views.remove(idx))
    }

    /// Remove every command owned by a plugin.
    pub fn remove_commands_owned_by(&self, plugin_id: &str) -> usize {
        let mut inner = self.inner.borrow_mut();
        let before = inner.commands.len();
        inner.commands.retain(|c| c.owner != plugin_id);
        before - inner.commands.len()
    }

    /// Remove every entry owned by a plugin.
    pub fn remove_owned_by(&self, plugin_id: &str) -> Removed {
        let commands = self.remove_commands_owned_by(plugin_id);
        let mut inner = self.inner.borrow_mut();
        fn sweep<T>(items: &mut Vec<T>, owned: impl Fn(&T) -> bool) -> usize {
            let before = items.len();
            items.retain(|item| !owned(item));
            before - items.len()
        }
        Removed {
            commands,
            setting_tabs: sweep(&mut inner.setting_tabs, |e| e.plugin_id == plugin_id),
            ribbon_icons: sweep(&mut inner.ribbon_icons, |e| e.plugin_id == plugin_id),
            post_processors: sweep(&mut inner.post_processors, |e| e.plugin_id == plugin_id),
            views: sweep(&mut inner.views, |e| e.plugin_id == plugin_id),
            status_bar_items: sweep(&mut inner.status_bar_items, |e| e.plugin_id == plugin_id),
            editor_extensions: sweep(&mut inner.editor_extensions, |e| e.plugin_id == plugin_id),
        }
    }

    /// Whether a plugin owns anything in the registry.
    pub fn owns_anything(&self, plugin_id: &str) -> bool {
        let inner = self.inner.borrow();
        inner.commands.iter().any(|c| c.owner == plugin_id)
            || inner.setting_tabs.iter().any(|e| e.plugin_id == plugin_id)
            || inner.ribbon_icons.iter().any(|e| e.plugin_id == plugin_id)
            || inner.post_processors.iter().any(|e| e.plugin_id == plugin_id)
            || inner.views.iter().any(|e| e.plugin_id == plugin_id)
            || inner.status_bar_items.iter().any(|e| e.plugin_id == plugin_id)
            || inner.editor_extensions.iter().any(|e| e.plugin_id == plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting(hits: &Rc<Cell<u32>>) -> CommandAction {
        let hits = Rc::clone(hits);
        CommandAction::callback(move || {
            hits.set(hits.get() + 1);
            Ok(())
        })
    }

    #[test]
    fn test_qualified_command_id() {
        assert_eq!(qualified_command_id("dice", "roll"), "dice:roll");
        assert_eq!(qualified_command_id("dice", "dice:roll"), "dice:roll");
        assert_eq!(qualified_command_id("dice", "dicey:roll"), "dice:dicey:roll");
    }

    #[test]
    fn test_insertion_order() {
        let registry = PluginRegistry::new();
        let hits = Rc::new(Cell::new(0));
        for id in ["b:one", "a:two", "c:three"] {
            registry.register_command(Command::new(id, id, &id[..1], counting(&hits)));
        }
        let ids: Vec<_> = registry.get_all_commands().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b:one", "a:two", "c:three"]);
    }

    #[test]
    fn test_last_write_wins() {
        let registry = PluginRegistry::new();
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));
        registry.register_command(Command::new("x:y", "Old", "x", counting(&first)));
        registry.register_command(Command::new("x:z", "Other", "x", counting(&first)));
        let displaced = registry.register_command(Command::new("x:y", "New", "x", counting(&second)));
        assert_eq!(displaced.unwrap().name, "Old");

        let all = registry.get_all_commands();
        assert_eq!(all.iter().filter(|c| c.id == "x:y").count(), 1);
        assert_eq!(all[0].name, "New");
        assert!(registry.execute_command("x:y"));
        assert_eq!(first.get(), 0);
        assert_eq!(second.get(), 1);
    }

    #[test]
    fn test_check_callback_gating() {
        let registry = PluginRegistry::new();
        let available = Rc::new(Cell::new(false));
        let runs = Rc::new(Cell::new(0));
        let (a, r) = (Rc::clone(&available), Rc::clone(&runs));
        registry.register_command(Command::new(
            "p:check",
            "Check",
            "p",
            CommandAction::check(move |checking| {
                if checking {
                    return Ok(a.get());
                }
                r.set(r.get() + 1);
                Ok(true)
            }),
        ));
        assert!(!registry.execute_command("p:check"));
        assert!(!registry.is_command_available("p:check"));
        assert_eq!(runs.get(), 0);
        available.set(true);
        assert!(registry.is_command_available("p:check"));
        assert_eq!(runs.get(), 0);
        assert!(registry.execute_command("p:check"));
        assert_eq!(runs.get(), 1);
        assert!(registry.get_command("p:check").unwrap().checkable);
    }

    #[test]
    fn test_unknown_and_failing_commands() {
        let registry = PluginRegistry::new();
        assert!(!registry.execute_command("nope"));
        registry.register_command(Command::new(
            "p:boom",
            "Boom",
            "p",
            CommandAction::callback(|| Err(RegistryError::Callback { id: "p:boom".into(), message: "bad".into() })),
        ));
        assert!(!registry.execute_command("p:boom"));
        assert!(registry.unregister_command("p:boom").is_some());
        assert!(registry.unregister_command("p:boom").is_none());
    }

    #[test]
    fn test_callback_may_mutate_registry() {
        let registry = PluginRegistry::new();
        let handle = registry.clone();
        registry.register_command(Command::new(
            "p:self-remove",
            "Self remove",
            "p",
            CommandAction::callback(move || {
                handle.unregister_command("p:self-remove");
                Ok(())
            }),
        ));
        assert!(registry.execute_command("p:self-remove"));
        assert_eq!(registry.command_count(), 0);
    }

    #[test]
    fn test_remove_owned_by() {
        let registry = PluginRegistry::new();
        let hits = Rc::new(Cell::new(0));
        registry.register_command(Command::new("a:1", "One", "a", counting(&hits)));
        registry.register_command(Command::new("b:1", "One", "b", counting(&hits)));
        registry.add_setting_tab("a", "A settings", 1);
        registry.add_ribbon_icon("a", "dice", "Roll", 2);
        registry.add_post_processor("a", 3, 0, None);
        registry.register_view("a", "a-view", 4).unwrap();
        registry.add_status_bar_item("a", 9);
        registry.add_editor_extension("a");
        registry.add_ribbon_icon("b", "star", "Star", 5);

        let removed = registry.remove_owned_by("a");
        assert_eq!(removed.total(), 7);
        assert!(!registry.owns_anything("a"));
        assert!(registry.owns_anything("b"));
        assert_eq!(registry.commands_owned_by("a").len(), 0);
        assert_eq!(registry.ribbon_icons().len(), 1);
    }

    #[test]
    fn test_view_types_are_unique() {
        let registry = PluginRegistry::new();
        registry.register_view("a", "kanban", 1).unwrap();
        let err = registry.register_view("b", "kanban", 2).unwrap_err();
        assert_eq!(err, RegistryError::ViewExists { view_type: "kanban".into(), owner: "a".into() });
        assert!(registry.unregister_view("kanban").is_some());
        registry.register_view("b", "kanban", 2).unwrap();
    }

    #[test]
    fn test_post_processor_order() {
        let registry = PluginRegistry::new();
        let late = registry.add_post_processor("a", 1, 10, None);
        let early = registry.add_post_processor("b", 2, -5, Some("mermaid".into()));
        let mid = registry.add_post_processor("c", 3, 0, None);
        let order: Vec<_> = registry.post_processors().into_iter().map(|p| p.id).collect();
        assert_eq!(order, vec![early, mid, late]);
        assert!(registry.remove_entry(mid));
        assert!(!registry.remove_entry(mid));
    }
}
