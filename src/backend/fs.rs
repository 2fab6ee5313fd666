//! Filesystem vault backend.
//!
//! Serves a vault directory laid out the way the desktop app does it:
//! notes anywhere under the root, plugins under
//! `<config_dir>/plugins/<id>/`, and the enabled list in
//! `<config_dir>/community-plugins.json`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::{
    is_valid_plugin_id, markdown, vault_relative, Backend, BackendError, BackendRequest,
    BackendResult, FileEntry, FileKind, FileStat,
};

const MANIFEST_FILE: &str = "manifest.json";
const STYLES_FILE: &str = "styles.css";
const DATA_FILE: &str = "data.json";
const ENABLED_FILE: &str = "community-plugins.json";

/// Backend over a vault directory on disk.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
    config_dir: String,
}

impl FsBackend {
    /// Create a backend for the vault at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), config_dir: ".obsidian".to_string() }
    }

    /// Use a different config directory name than `.obsidian`.
    pub fn with_config_dir(mut self, config_dir: impl Into<String>) -> Self {
        self.config_dir = config_dir.into();
        self
    }

    /// Vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn plugins_dir(&self) -> PathBuf {
        self.root.join(&self.config_dir).join("plugins")
    }

    fn plugin_dir(&self, id: &str) -> BackendResult<PathBuf> {
        if !is_valid_plugin_id(id) {
            return Err(BackendError::InvalidPath(id.to_string()));
        }
        Ok(self.plugins_dir().join(id))
    }

    fn note_path(&self, path: &str) -> BackendResult<PathBuf> {
        let rel = vault_relative(path)?;
        if rel.starts_with(&self.config_dir) {
            return Err(BackendError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    async fn list_plugins(&self) -> BackendResult<Value> {
        let dir = self.plugins_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(json!([])),
            Err(e) => return Err(e.into()),
        };

        let mut manifests = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            let manifest_path = entry.path().join(MANIFEST_FILE);
            let raw = match tokio::fs::read_to_string(&manifest_path).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(dir = %name, error = %e, "Skipping plugin without manifest");
                    continue;
                }
            };
            let mut manifest: Value = match serde_json::from_str(&raw) {
                Ok(value @ Value::Object(_)) => value,
                Ok(_) => {
                    tracing::warn!(dir = %name, "Skipping plugin: manifest is not an object");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(dir = %name, error = %e, "Skipping plugin: malformed manifest");
                    continue;
                }
            };
            let has_styles = tokio::fs::try_exists(entry.path().join(STYLES_FILE)).await?;
            if let Some(obj) = manifest.as_object_mut() {
                obj.insert("hasStyles".to_string(), Value::Bool(has_styles));
                obj.insert("dir".to_string(), Value::String(name));
            }
            manifests.push(manifest);
        }

        manifests.sort_by(|a, b| {
            a.get("id").and_then(Value::as_str).cmp(&b.get("id").and_then(Value::as_str))
        });
        Ok(Value::Array(manifests))
    }

    async fn enabled_ids(&self) -> BackendResult<Vec<String>> {
        let path = self.root.join(&self.config_dir).join(ENABLED_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> BackendResult<()> {
        let mut ids = self.enabled_ids().await?;
        ids.retain(|existing| existing != id);
        if enabled {
            ids.push(id.to_string());
        }
        let dir = self.root.join(&self.config_dir);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(ENABLED_FILE), serde_json::to_string_pretty(&ids)?).await?;
        Ok(())
    }

    async fn read_main(&self, id: &str) -> BackendResult<String> {
        let dir = self.plugin_dir(id)?;
        let manifest: Value = match tokio::fs::read_to_string(dir.join(MANIFEST_FILE)).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) => return Err(not_found_or(id, e)),
        };
        let entry = manifest.get("main").and_then(Value::as_str).unwrap_or("main.js");
        let rel = vault_relative(entry)?;
        tokio::fs::read_to_string(dir.join(rel)).await.map_err(|e| not_found_or(id, e))
    }

    async fn read_optional(&self, path: PathBuf) -> BackendResult<Option<String>> {
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_files(&self) -> BackendResult<Vec<FileEntry>> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root).min_depth(1).sort_by_file_name().into_iter();
        for entry in walker.filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.')) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable vault entry");
                    continue;
                }
            };
            let Ok(rel) = entry.path().strip_prefix(&self.root) else { continue };
            let path = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
            if entry.file_type().is_dir() {
                out.push(FileEntry { path, kind: FileKind::Folder, stat: None });
            } else if entry.file_type().is_file() {
                let stat = entry.metadata().ok().map(|m| stat_of(&m));
                out.push(FileEntry { path, kind: FileKind::File, stat });
            }
        }
        Ok(out)
    }

    async fn stat(&self, path: &Path) -> BackendResult<FileStat> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(stat_of(&meta))
    }

    async fn handle(&self, request: BackendRequest) -> BackendResult<Value> {
        match request {
            BackendRequest::ListPlugins => self.list_plugins().await,
            BackendRequest::GetEnabledPlugins => Ok(json!(self.enabled_ids().await?)),
            BackendRequest::TogglePlugin { plugin_id, enabled } => {
                self.set_enabled(&plugin_id, enabled).await?;
                Ok(Value::Null)
            }
            BackendRequest::ReadPluginMain { plugin_id } => {
                Ok(Value::String(self.read_main(&plugin_id).await?))
            }
            BackendRequest::ReadPluginStyles { plugin_id } => {
                let path = self.plugin_dir(&plugin_id)?.join(STYLES_FILE);
                Ok(self.read_optional(path).await?.map_or(Value::Null, Value::String))
            }
            BackendRequest::LoadPluginData { plugin_id } => {
                let path = self.plugin_dir(&plugin_id)?.join(DATA_FILE);
                match self.read_optional(path).await? {
                    Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
                    _ => Ok(Value::Null),
                }
            }
            BackendRequest::SavePluginData { plugin_id, data } => {
                let dir = self.plugin_dir(&plugin_id)?;
                tokio::fs::create_dir_all(&dir).await?;
                tokio::fs::write(dir.join(DATA_FILE), serde_json::to_string_pretty(&data)?).await?;
                Ok(Value::Null)
            }
            BackendRequest::ListFiles => Ok(serde_json::to_value(self.list_files()?)?),
            BackendRequest::ReadNote { path } => {
                let full = self.note_path(&path)?;
                let text = tokio::fs::read_to_string(&full).await.map_err(|e| not_found_or(&path, e))?;
                Ok(Value::String(text))
            }
            BackendRequest::WriteNote { path, content } => {
                let full = self.note_path(&path)?;
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&full, content).await?;
                Ok(serde_json::to_value(self.stat(&full).await?)?)
            }
            BackendRequest::CreateNote { path, content } => {
                let full = self.note_path(&path)?;
                if tokio::fs::try_exists(&full).await? {
                    return Err(BackendError::AlreadyExists(path));
                }
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&full, content).await?;
                Ok(serde_json::to_value(self.stat(&full).await?)?)
            }
            BackendRequest::CreateFolder { path } => {
                tokio::fs::create_dir_all(self.note_path(&path)?).await?;
                Ok(Value::Null)
            }
            BackendRequest::DeletePath { path } => {
                let full = self.note_path(&path)?;
                let meta = tokio::fs::metadata(&full).await.map_err(|e| not_found_or(&path, e))?;
                if meta.is_dir() {
                    tokio::fs::remove_dir_all(&full).await?;
                } else {
                    tokio::fs::remove_file(&full).await?;
                }
                Ok(Value::Null)
            }
            BackendRequest::RenamePath { from, to } => {
                let src = self.note_path(&from)?;
                let dst = self.note_path(&to)?;
                if !tokio::fs::try_exists(&src).await? {
                    return Err(BackendError::NotFound(from));
                }
                if tokio::fs::try_exists(&dst).await? {
                    return Err(BackendError::AlreadyExists(to));
                }
                if let Some(parent) = dst.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::rename(&src, &dst).await?;
                Ok(serde_json::to_value(self.stat(&dst).await?)?)
            }
            BackendRequest::GetFileCache { path } => {
                if !path.ends_with(".md") {
                    return Ok(Value::Null);
                }
                let full = self.note_path(&path)?;
                match self.read_optional(full).await? {
                    Some(text) => Ok(serde_json::to_value(markdown::parse(&text))?),
                    None => Ok(Value::Null),
                }
            }
        }
    }
}

#[async_trait(?Send)]
impl Backend for FsBackend {
    fn name(&self) -> &str {
        "fs"
    }

    async fn invoke(&self, command: &str, args: Value) -> BackendResult<Value> {
        let request = BackendRequest::parse(command, &args)?;
        self.handle(request).await
    }
}

fn not_found_or(what: &str, e: std::io::Error) -> BackendError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BackendError::NotFound(what.to_string())
    } else {
        BackendError::Io(e)
    }
}

fn stat_of(meta: &std::fs::Metadata) -> FileStat {
    let mtime = meta.modified().map(millis).unwrap_or_default();
    let ctime = meta.created().map(millis).unwrap_or(mtime);
    FileStat { ctime, mtime, size: meta.len() }
}

fn millis(time: SystemTime) -> i64 {
    chrono::DateTime::<chrono::Utc>::from(time).timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::commands;
    use tempfile::TempDir;

    fn vault() -> (TempDir, FsBackend) {
        let dir = TempDir::new().unwrap();
        let plugin = dir.path().join(".obsidian/plugins/hello");
        std::fs::create_dir_all(&plugin).unwrap();
        std::fs::write(
            plugin.join("manifest.json"),
            r#"{"id":"hello","name":"Hello","version":"1.0.0","minAppVersion":"0.15.0"}"#,
        )
        .unwrap();
        std::fs::write(plugin.join("main.js"), "module.exports = class {};").unwrap();
        std::fs::write(plugin.join("styles.css"), ".hello {}").unwrap();
        let broken = dir.path().join(".obsidian/plugins/broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join("manifest.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("Welcome.md"), "# Welcome\n[[Other]]").unwrap();
        let backend = FsBackend::new(dir.path());
        (dir, backend)
    }

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
    }

    #[test]
    fn test_list_plugins_skips_malformed() {
        let (_dir, backend) = vault();
        let manifests = rt().block_on(backend.invoke(commands::LIST_PLUGINS, Value::Null)).unwrap();
        let manifests = manifests.as_array().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0]["id"], "hello");
        assert_eq!(manifests[0]["hasStyles"], true);
    }

    #[test]
    fn test_toggle_round_trip() {
        let (_dir, backend) = vault();
        let rt = rt();
        rt.block_on(backend.invoke(commands::TOGGLE_PLUGIN, json!({"pluginId": "hello", "enabled": true})))
            .unwrap();
        let enabled = rt.block_on(backend.invoke(commands::GET_ENABLED_PLUGINS, Value::Null)).unwrap();
        assert_eq!(enabled, json!(["hello"]));
        rt.block_on(backend.invoke(commands::TOGGLE_PLUGIN, json!({"pluginId": "hello", "enabled": false})))
            .unwrap();
        let enabled = rt.block_on(backend.invoke(commands::GET_ENABLED_PLUGINS, Value::Null)).unwrap();
        assert_eq!(enabled, json!([]));
    }

    #[test]
    fn test_plugin_files() {
        let (_dir, backend) = vault();
        let rt = rt();
        let main = rt.block_on(backend.invoke(commands::READ_PLUGIN_MAIN, json!({"pluginId": "hello"}))).unwrap();
        assert!(main.as_str().unwrap().contains("module.exports"));
        let data = rt.block_on(backend.invoke(commands::LOAD_PLUGIN_DATA, json!({"pluginId": "hello"}))).unwrap();
        assert!(data.is_null());
        rt.block_on(backend.invoke(
            commands::SAVE_PLUGIN_DATA,
            json!({"pluginId": "hello", "data": {"count": 3}}),
        ))
        .unwrap();
        let data = rt.block_on(backend.invoke(commands::LOAD_PLUGIN_DATA, json!({"pluginId": "hello"}))).unwrap();
        assert_eq!(data, json!({"count": 3}));
    }

    #[test]
    fn test_notes_crud() {
        let (dir, backend) = vault();
        let rt = rt();
        rt.block_on(backend.invoke(commands::CREATE_NOTE, json!({"path": "a/b.md", "content": "hi"})))
            .unwrap();
        assert!(dir.path().join("a/b.md").exists());
        let err = rt
            .block_on(backend.invoke(commands::CREATE_NOTE, json!({"path": "a/b.md", "content": "x"})))
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));

        rt.block_on(backend.invoke(commands::RENAME_PATH, json!({"from": "a/b.md", "to": "c.md"})))
            .unwrap();
        let text = rt.block_on(backend.invoke(commands::READ_NOTE, json!({"path": "c.md"}))).unwrap();
        assert_eq!(text, "hi");

        rt.block_on(backend.invoke(commands::DELETE_PATH, json!({"path": "c.md"}))).unwrap();
        let err = rt.block_on(backend.invoke(commands::READ_NOTE, json!({"path": "c.md"}))).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_files_hides_config_dir() {
        let (_dir, backend) = vault();
        let files = rt().block_on(backend.invoke(commands::LIST_FILES, Value::Null)).unwrap();
        let paths: Vec<_> = files.as_array().unwrap().iter().map(|f| f["path"].as_str().unwrap().to_string()).collect();
        assert_eq!(paths, vec!["Welcome.md"]);
    }

    #[test]
    fn test_rejects_path_escape() {
        let (_dir, backend) = vault();
        let rt = rt();
        let err = rt.block_on(backend.invoke(commands::READ_NOTE, json!({"path": "../etc/passwd"}))).unwrap_err();
        assert!(matches!(err, BackendError::InvalidPath(_)));
        let err = rt
            .block_on(backend.invoke(commands::READ_NOTE, json!({"path": ".obsidian/community-plugins.json"})))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidPath(_)));
        let err = rt.block_on(backend.invoke(commands::READ_PLUGIN_MAIN, json!({"pluginId": ".."}))).unwrap_err();
        assert!(matches!(err, BackendError::InvalidPath(_)));
    }

    #[test]
    fn test_file_cache() {
        let (_dir, backend) = vault();
        let cache = rt().block_on(backend.invoke(commands::GET_FILE_CACHE, json!({"path": "Welcome.md"}))).unwrap();
        assert_eq!(cache["headings"][0]["heading"], "Welcome");
        assert_eq!(cache["links"][0]["link"], "Other");
    }
}
