//! In-memory backend.
//!
//! Used by tests and benches. Besides storing plugins, notes and plugin data
//! it can inject failures and delays per command and records every call.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{
    markdown, vault_relative, Backend, BackendError, BackendRequest, BackendResult, FileEntry,
    FileKind, FileStat,
};

#[derive(Debug, Clone)]
struct StoredPlugin {
    manifest: Value,
    main: String,
    styles: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredNote {
    content: String,
    stat: FileStat,
}

#[derive(Debug, Default)]
struct State {
    plugins: BTreeMap<String, StoredPlugin>,
    enabled: Vec<String>,
    data: HashMap<String, Value>,
    notes: BTreeMap<String, StoredNote>,
    folders: BTreeSet<String>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: Vec<String>,
    clock: i64,
}

impl State {
    fn now(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }
}

/// Backend that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        let backend = Self::default();
        backend.state.lock().clock = chrono::Utc::now().timestamp_millis();
        backend
    }

    /// Builder form of [`add_plugin`](Self::add_plugin).
    pub fn with_plugin(self, manifest: Value, main: impl Into<String>) -> Self {
        self.add_plugin(manifest, main);
        self
    }

    /// Builder form of [`add_note`](Self::add_note).
    pub fn with_note(self, path: &str, content: impl Into<String>) -> Self {
        self.add_note(path, content);
        self
    }

    /// Builder form of [`set_enabled`](Self::set_enabled).
    pub fn with_enabled(self, id: &str) -> Self {
        self.set_enabled(id, true);
        self
    }

    /// Install a plugin. The manifest must carry an `id`.
    pub fn add_plugin(&self, manifest: Value, main: impl Into<String>) {
        let id = manifest.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        self.state
            .lock()
            .plugins
            .insert(id, StoredPlugin { manifest, main: main.into(), styles: None });
    }

    /// Attach a stylesheet to an installed plugin.
    pub fn set_styles(&self, id: &str, css: impl Into<String>) {
        if let Some(plugin) = self.state.lock().plugins.get_mut(id) {
            plugin.styles = Some(css.into());
        }
    }

    /// Replace the entry script of an installed plugin.
    pub fn set_main(&self, id: &str, main: impl Into<String>) {
        if let Some(plugin) = self.state.lock().plugins.get_mut(id) {
            plugin.main = main.into();
        }
    }

    /// Mark a plugin enabled or disabled without recording a call.
    pub fn set_enabled(&self, id: &str, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled.retain(|existing| existing != id);
        if enabled {
            state.enabled.push(id.to_string());
        }
    }

    /// Store a note.
    pub fn add_note(&self, path: &str, content: impl Into<String>) {
        let mut state = self.state.lock();
        let now = state.now();
        let content = content.into();
        let stat = FileStat { ctime: now, mtime: now, size: content.len() as u64 };
        state.notes.insert(path.to_string(), StoredNote { content, stat });
    }

    /// Make every call of `command` fail with `message`.
    pub fn fail(&self, command: &str, message: impl Into<String>) {
        self.state.lock().failures.insert(command.to_string(), message.into());
    }

    /// Stop injecting failures into `command`.
    pub fn clear_failure(&self, command: &str) {
        self.state.lock().failures.remove(command);
    }

    /// Delay every call of `command` by `delay`.
    pub fn delay(&self, command: &str, delay: Duration) {
        self.state.lock().delays.insert(command.to_string(), delay);
    }

    /// Names of every command invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of times `command` was invoked.
    pub fn call_count(&self, command: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| c.as_str() == command).count()
    }

    /// Current text of a note.
    pub fn note(&self, path: &str) -> Option<String> {
        self.state.lock().notes.get(path).map(|n| n.content.clone())
    }

    /// Persisted enabled list.
    pub fn enabled(&self) -> Vec<String> {
        self.state.lock().enabled.clone()
    }

    /// Persisted data of a plugin.
    pub fn plugin_data(&self, id: &str) -> Option<Value> {
        self.state.lock().data.get(id).cloned()
    }

    fn handle(&self, request: BackendRequest) -> BackendResult<Value> {
        let mut state = self.state.lock();
        match request {
            BackendRequest::ListPlugins => {
                let manifests = state
                    .plugins
                    .values()
                    .map(|p| {
                        let mut manifest = p.manifest.clone();
                        if let Some(obj) = manifest.as_object_mut() {
                            obj.insert("hasStyles".into(), Value::Bool(p.styles.is_some()));
                        }
                        manifest
                    })
                    .collect();
                Ok(Value::Array(manifests))
            }
            BackendRequest::GetEnabledPlugins => Ok(json!(state.enabled)),
            BackendRequest::TogglePlugin { plugin_id, enabled } => {
                state.enabled.retain(|existing| existing != &plugin_id);
                if enabled {
                    state.enabled.push(plugin_id);
                }
                Ok(Value::Null)
            }
            BackendRequest::ReadPluginMain { plugin_id } => state
                .plugins
                .get(&plugin_id)
                .map(|p| Value::String(p.main.clone()))
                .ok_or(BackendError::NotFound(plugin_id)),
            BackendRequest::ReadPluginStyles { plugin_id } => Ok(state
                .plugins
                .get(&plugin_id)
                .and_then(|p| p.styles.clone())
                .map_or(Value::Null, Value::String)),
            BackendRequest::LoadPluginData { plugin_id } => {
                Ok(state.data.get(&plugin_id).cloned().unwrap_or(Value::Null))
            }
            BackendRequest::SavePluginData { plugin_id, data } => {
                state.data.insert(plugin_id, data);
                Ok(Value::Null)
            }
            BackendRequest::ListFiles => {
                let mut entries: Vec<FileEntry> = state
                    .folders
                    .iter()
                    .map(|path| FileEntry { path: path.clone(), kind: FileKind::Folder, stat: None })
                    .collect();
                let mut implied = BTreeSet::new();
                for path in state.notes.keys() {
                    let mut parts: Vec<&str> = path.split('/').collect();
                    parts.pop();
                    for i in 1..=parts.len() {
                        let folder = parts[..i].join("/");
                        if !state.folders.contains(&folder) {
                            implied.insert(folder);
                        }
                    }
                }
                entries.extend(
                    implied.into_iter().map(|path| FileEntry { path, kind: FileKind::Folder, stat: None }),
                );
                entries.extend(state.notes.iter().map(|(path, note)| FileEntry {
                    path: path.clone(),
                    kind: FileKind::File,
                    stat: Some(note.stat),
                }));
                Ok(serde_json::to_value(entries)?)
            }
            BackendRequest::ReadNote { path } => {
                check_path(&path)?;
                state
                    .notes
                    .get(&path)
                    .map(|n| Value::String(n.content.clone()))
                    .ok_or(BackendError::NotFound(path))
            }
            BackendRequest::WriteNote { path, content } => {
                check_path(&path)?;
                let now = state.now();
                let ctime = state.notes.get(&path).map_or(now, |n| n.stat.ctime);
                let stat = FileStat { ctime, mtime: now, size: content.len() as u64 };
                state.notes.insert(path, StoredNote { content, stat });
                Ok(serde_json::to_value(stat)?)
            }
            BackendRequest::CreateNote { path, content } => {
                check_path(&path)?;
                if state.notes.contains_key(&path) || state.folders.contains(&path) {
                    return Err(BackendError::AlreadyExists(path));
                }
                let now = state.now();
                let stat = FileStat { ctime: now, mtime: now, size: content.len() as u64 };
                state.notes.insert(path, StoredNote { content, stat });
                Ok(serde_json::to_value(stat)?)
            }
            BackendRequest::CreateFolder { path } => {
                check_path(&path)?;
                state.folders.insert(path);
                Ok(Value::Null)
            }
            BackendRequest::DeletePath { path } => {
                check_path(&path)?;
                let prefix = format!("{}/", path);
                let had_note = state.notes.remove(&path).is_some();
                let had_folder = state.folders.remove(&path);
                let before = state.notes.len();
                state.notes.retain(|p, _| !p.starts_with(&prefix));
                state.folders.retain(|p| !p.starts_with(&prefix));
                if !had_note && !had_folder && before == state.notes.len() {
                    return Err(BackendError::NotFound(path));
                }
                Ok(Value::Null)
            }
            BackendRequest::RenamePath { from, to } => {
                check_path(&from)?;
                check_path(&to)?;
                if state.notes.contains_key(&to) || state.folders.contains(&to) {
                    return Err(BackendError::AlreadyExists(to));
                }
                let Some(mut note) = state.notes.remove(&from) else {
                    return Err(BackendError::NotFound(from));
                };
                note.stat.mtime = state.now();
                let stat = note.stat;
                state.notes.insert(to, note);
                Ok(serde_json::to_value(stat)?)
            }
            BackendRequest::GetFileCache { path } => Ok(state
                .notes
                .get(&path)
                .filter(|_| path.ends_with(".md"))
                .map(|n| markdown::parse(&n.content))
                .map(serde_json::to_value)
                .transpose()?
                .unwrap_or(Value::Null)),
        }
    }
}

fn check_path(path: &str) -> BackendResult<()> {
    vault_relative(path).map(|_| ())
}

#[async_trait(?Send)]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn invoke(&self, command: &str, args: Value) -> BackendResult<Value> {
        let (delay, failure) = {
            let mut state = self.state.lock();
            state.calls.push(command.to_string());
            (state.delays.get(command).copied(), state.failures.get(command).cloned())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            return Err(BackendError::Failed(message));
        }
        let request = BackendRequest::parse(command, &args)?;
        self.handle(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::commands;

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
    }

    #[test]
    fn test_injected_failure() {
        let backend = MemoryBackend::new().with_note("a.md", "x");
        backend.fail(commands::READ_NOTE, "disk on fire");
        let err = block_on(backend.invoke(commands::READ_NOTE, json!({"path": "a.md"}))).unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
        backend.clear_failure(commands::READ_NOTE);
        let text = block_on(backend.invoke(commands::READ_NOTE, json!({"path": "a.md"}))).unwrap();
        assert_eq!(text, "x");
        assert_eq!(backend.call_count(commands::READ_NOTE), 2);
    }

    #[test]
    fn test_list_files_implies_folders() {
        let backend = MemoryBackend::new().with_note("Daily/2024/01.md", "").with_note("Inbox.md", "");
        let files: Vec<FileEntry> =
            serde_json::from_value(block_on(backend.invoke(commands::LIST_FILES, Value::Null)).unwrap())
                .unwrap();
        let folders: Vec<_> =
            files.iter().filter(|f| f.kind == FileKind::Folder).map(|f| f.path.as_str()).collect();
        assert_eq!(folders, vec!["Daily", "Daily/2024"]);
        assert_eq!(files.iter().filter(|f| f.kind == FileKind::File).count(), 2);
    }

    #[test]
    fn test_write_bumps_mtime() {
        let backend = MemoryBackend::new();
        let first: FileStat = serde_json::from_value(
            block_on(backend.invoke(commands::CREATE_NOTE, json!({"path": "n.md", "content": "a"}))).unwrap(),
        )
        .unwrap();
        let second: FileStat = serde_json::from_value(
            block_on(backend.invoke(commands::WRITE_NOTE, json!({"path": "n.md", "content": "bb"}))).unwrap(),
        )
        .unwrap();
        assert!(second.mtime > first.mtime);
        assert_eq!(second.ctime, first.ctime);
        assert_eq!(second.size, 2);
    }

    #[test]
    fn test_delete_folder_removes_children() {
        let backend = MemoryBackend::new().with_note("Old/a.md", "").with_note("Old/b.md", "");
        block_on(backend.invoke(commands::DELETE_PATH, json!({"path": "Old"}))).unwrap();
        assert!(backend.note("Old/a.md").is_none());
        let err = block_on(backend.invoke(commands::DELETE_PATH, json!({"path": "Old"}))).unwrap_err();
        assert!(err.is_not_found());
    }
}
