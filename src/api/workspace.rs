//! Workspace facade: leaves, the active leaf, and workspace events.

use std::cell::{Cell, RefCell};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::events::{Event, EventRef, Events};
use super::file::{AbstractFile, TFile};
use super::{ApiError, ApiResult};

/// View type of a leaf with nothing open.
pub const EMPTY_VIEW: &str = "empty";
/// View type of a leaf showing a note.
pub const MARKDOWN_VIEW: &str = "markdown";

/// Snapshot of one workspace leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaf {
    pub id: String,
    pub view_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<TFile>,
    #[serde(default)]
    pub state: Value,
}

impl Leaf {
    fn new() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string()[..16].to_string();
        Self { id, view_type: EMPTY_VIEW.to_string(), file: None, state: Value::Null }
    }

    /// Script-facing form, tagged `kind: "leaf"`.
    pub fn to_payload(&self) -> Value {
        let mut value = json!(self);
        if let Some(obj) = value.as_object_mut() {
            obj.insert("kind".into(), Value::String("leaf".into()));
        }
        value
    }
}

/// Events emitted by the workspace.
#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    FileOpen(Option<TFile>),
    ActiveLeafChange(Option<Leaf>),
    LayoutChange,
    Quit,
    Custom { name: String, args: Value },
}

impl Event for WorkspaceEvent {
    fn name(&self) -> &str {
        match self {
            Self::FileOpen(_) => "file-open",
            Self::ActiveLeafChange(_) => "active-leaf-change",
            Self::LayoutChange => "layout-change",
            Self::Quit => "quit",
            Self::Custom { name, .. } => name,
        }
    }

    fn args(&self) -> Value {
        match self {
            Self::FileOpen(file) => json!([file.clone().map(AbstractFile::File)]),
            Self::ActiveLeafChange(leaf) => json!([leaf.as_ref().map(Leaf::to_payload)]),
            Self::LayoutChange | Self::Quit => json!([]),
            Self::Custom { args, .. } => args.clone(),
        }
    }
}

/// The `app.workspace` facade.
#[derive(Debug)]
pub struct Workspace {
    leaves: RefCell<Vec<Leaf>>,
    active: RefCell<Option<String>>,
    layout_ready: Cell<bool>,
    events: Events<WorkspaceEvent>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            leaves: RefCell::new(Vec::new()),
            active: RefCell::new(None),
            layout_ready: Cell::new(false),
            events: Events::new("workspace"),
        }
    }

    pub fn events(&self) -> &Events<WorkspaceEvent> {
        &self.events
    }

    pub fn on(&self, name: &str, handler: impl Fn(&WorkspaceEvent) + 'static) -> EventRef {
        self.events.on(name, handler)
    }

    /// Mark the layout as ready and announce it.
    pub fn set_layout_ready(&self) {
        if !self.layout_ready.replace(true) {
            self.events.trigger(&WorkspaceEvent::LayoutChange);
        }
    }

    pub fn layout_ready(&self) -> bool {
        self.layout_ready.get()
    }

    /// Current active leaf.
    pub fn active_leaf(&self) -> Option<Leaf> {
        let active = self.active.borrow().clone()?;
        self.leaf(&active)
    }

    /// File shown by the active leaf.
    pub fn get_active_file(&self) -> Option<TFile> {
        self.active_leaf().and_then(|leaf| leaf.file)
    }

    /// The active leaf, when its view has the given type.
    pub fn get_active_view_of_type(&self, view_type: &str) -> Option<Leaf> {
        self.active_leaf().filter(|leaf| leaf.view_type == view_type)
    }

    pub fn leaf(&self, id: &str) -> Option<Leaf> {
        self.leaves.borrow().iter().find(|l| l.id == id).cloned()
    }

    pub fn leaves(&self) -> Vec<Leaf> {
        self.leaves.borrow().clone()
    }

    pub fn get_leaves_of_type(&self, view_type: &str) -> Vec<Leaf> {
        self.leaves.borrow().iter().filter(|l| l.view_type == view_type).cloned().collect()
    }

    /// Return the active leaf, or a fresh one when `create` is set or no
    /// leaf is active. A fresh leaf becomes active.
    pub fn get_leaf(&self, create: bool) -> Leaf {
        if !create {
            if let Some(leaf) = self.active_leaf() {
                return leaf;
            }
        }
        let leaf = Leaf::new();
        self.leaves.borrow_mut().push(leaf.clone());
        self.events.trigger(&WorkspaceEvent::LayoutChange);
        self.set_active_leaf(&leaf.id);
        leaf
    }

    /// Make a leaf active and fire `active-leaf-change`.
    pub fn set_active_leaf(&self, id: &str) -> bool {
        let Some(leaf) = self.leaf(id) else { return false };
        let changed = self.active.borrow().as_deref() != Some(id);
        if changed {
            *self.active.borrow_mut() = Some(id.to_string());
            self.events.trigger(&WorkspaceEvent::ActiveLeafChange(Some(leaf)));
        }
        true
    }

    /// Open a file in a leaf and fire `file-open`.
    pub fn open_file(&self, id: &str, file: TFile) -> ApiResult<Leaf> {
        let leaf = self.update(id, |leaf| {
            leaf.view_type = MARKDOWN_VIEW.to_string();
            leaf.file = Some(file.clone());
            leaf.state = json!({"file": file.path});
        })?;
        self.set_active_leaf(id);
        self.events.trigger(&WorkspaceEvent::FileOpen(Some(file)));
        Ok(leaf)
    }

    /// Switch a leaf to another view type.
    pub fn set_view_state(&self, id: &str, view_type: &str, state: Value) -> ApiResult<Leaf> {
        let leaf = self.update(id, |leaf| {
            leaf.view_type = view_type.to_string();
            if view_type != MARKDOWN_VIEW {
                leaf.file = None;
            }
            leaf.state = state.clone();
        })?;
        self.events.trigger(&WorkspaceEvent::LayoutChange);
        Ok(leaf)
    }

    /// Close a leaf. The most recent remaining leaf becomes active.
    pub fn detach(&self, id: &str) -> bool {
        let removed = {
            let mut leaves = self.leaves.borrow_mut();
            let before = leaves.len();
            leaves.retain(|l| l.id != id);
            before != leaves.len()
        };
        if !removed {
            return false;
        }
        let was_active = self.active.borrow().as_deref() == Some(id);
        if was_active {
            let next = self.leaves.borrow().last().cloned();
            *self.active.borrow_mut() = next.as_ref().map(|l| l.id.clone());
            self.events.trigger(&WorkspaceEvent::ActiveLeafChange(next));
        }
        self.events.trigger(&WorkspaceEvent::LayoutChange);
        true
    }

    /// Close every leaf of a view type. Returns the closed ids.
    pub fn detach_leaves_of_type(&self, view_type: &str) -> Vec<String> {
        let ids: Vec<String> = self.get_leaves_of_type(view_type).into_iter().map(|l| l.id).collect();
        for id in &ids {
            self.detach(id);
        }
        ids
    }

    /// Keep leaves in step with a vault rename.
    pub fn file_renamed(&self, old_path: &str, file: &TFile) {
        for leaf in self.leaves.borrow_mut().iter_mut() {
            if leaf.file.as_ref().is_some_and(|f| f.path == old_path) {
                leaf.file = Some(file.clone());
            }
        }
    }

    /// Keep leaves in step with a vault delete.
    pub fn file_deleted(&self, path: &str) {
        for leaf in self.leaves.borrow_mut().iter_mut() {
            if leaf.file.as_ref().is_some_and(|f| f.path == path) {
                leaf.file = None;
                leaf.view_type = EMPTY_VIEW.to_string();
            }
        }
    }

    /// Announce shutdown.
    pub fn quit(&self) {
        self.events.trigger(&WorkspaceEvent::Quit);
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut Leaf)) -> ApiResult<Leaf> {
        let mut leaves = self.leaves.borrow_mut();
        let leaf = leaves
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| ApiError::LeafNotFound(id.to_string()))?;
        f(leaf);
        Ok(leaf.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FileStat;
    use std::rc::Rc;

    #[test]
    fn test_get_leaf_reuses_active() {
        let ws = Workspace::new();
        let first = ws.get_leaf(false);
        let again = ws.get_leaf(false);
        assert_eq!(first.id, again.id);
        let fresh = ws.get_leaf(true);
        assert_ne!(first.id, fresh.id);
        assert_eq!(ws.active_leaf().unwrap().id, fresh.id);
        assert_eq!(ws.leaves().len(), 2);
    }

    #[test]
    fn test_open_file_event_order() {
        let ws = Workspace::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["active-leaf-change", "file-open", "layout-change"] {
            let log = Rc::clone(&log);
            ws.on(name, move |e: &WorkspaceEvent| log.borrow_mut().push(e.name().to_string()));
        }
        let leaf = ws.get_leaf(false);
        log.borrow_mut().clear();
        ws.open_file(&leaf.id, TFile::new("Notes/a.md", FileStat::default())).unwrap();
        assert_eq!(*log.borrow(), vec!["file-open"]);
        assert_eq!(ws.get_active_file().unwrap().path, "Notes/a.md");
        assert!(ws.get_active_view_of_type(MARKDOWN_VIEW).is_some());
        assert!(ws.get_active_view_of_type("graph").is_none());
    }

    #[test]
    fn test_detach_moves_focus() {
        let ws = Workspace::new();
        let a = ws.get_leaf(true);
        let b = ws.get_leaf(true);
        ws.set_view_state(&b.id, "calendar", Value::Null).unwrap();
        assert_eq!(ws.get_leaves_of_type("calendar").len(), 1);
        assert_eq!(ws.detach_leaves_of_type("calendar"), vec![b.id.clone()]);
        assert_eq!(ws.active_leaf().unwrap().id, a.id);
        assert!(!ws.detach(&b.id));
    }

    #[test]
    fn test_unknown_leaf() {
        let ws = Workspace::new();
        assert!(matches!(
            ws.open_file("nope", TFile::new("a.md", FileStat::default())),
            Err(ApiError::LeafNotFound(_))
        ));
    }

    #[test]
    fn test_leaf_payload_kind() {
        let leaf = Leaf::new();
        let args = WorkspaceEvent::ActiveLeafChange(Some(leaf.clone())).args();
        assert_eq!(args[0]["kind"], "leaf");
        assert_eq!(args[0]["viewType"], "empty");
        assert_eq!(args[0]["id"], leaf.id);
    }
}
