//! Typed access to a [`Backend`].

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::{commands, Backend, BackendError, BackendResult, CachedMetadata, FileEntry, FileStat};

/// Cheap-to-clone handle that invokes backend commands with a timeout.
#[derive(Clone)]
pub struct BackendClient {
    backend: Rc<dyn Backend>,
    timeout: Duration,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BackendClient {
    /// Wrap a backend, applying `timeout` to every call.
    pub fn new(backend: Rc<dyn Backend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke a raw command.
    pub async fn invoke(&self, command: &str, args: Value) -> BackendResult<Value> {
        tracing::trace!(backend = self.backend.name(), command, "Backend call");
        match tokio::time::timeout(self.timeout, self.backend.invoke(command, args)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                command: command.to_string(),
                millis: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, args: Value) -> BackendResult<T> {
        let value = self.invoke(command, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Raw manifests of every installed plugin.
    pub async fn list_plugins(&self) -> BackendResult<Vec<Value>> {
        self.call(commands::LIST_PLUGINS, Value::Null).await
    }

    /// Persisted enabled plugin ids.
    pub async fn enabled_plugins(&self) -> BackendResult<Vec<String>> {
        self.call(commands::GET_ENABLED_PLUGINS, Value::Null).await
    }

    /// Persist a plugin's enabled flag.
    pub async fn toggle_plugin(&self, id: &str, enabled: bool) -> BackendResult<()> {
        self.invoke(commands::TOGGLE_PLUGIN, json!({"pluginId": id, "enabled": enabled})).await?;
        Ok(())
    }

    /// Entry script source.
    pub async fn read_plugin_main(&self, id: &str) -> BackendResult<String> {
        self.call(commands::READ_PLUGIN_MAIN, json!({"pluginId": id})).await
    }

    /// Optional stylesheet.
    pub async fn read_plugin_styles(&self, id: &str) -> BackendResult<Option<String>> {
        self.call(commands::READ_PLUGIN_STYLES, json!({"pluginId": id})).await
    }

    /// Plugin-scoped data blob, `Null` when nothing is stored.
    pub async fn load_plugin_data(&self, id: &str) -> BackendResult<Value> {
        self.invoke(commands::LOAD_PLUGIN_DATA, json!({"pluginId": id})).await
    }

    /// Store the plugin-scoped data blob.
    pub async fn save_plugin_data(&self, id: &str, data: &Value) -> BackendResult<()> {
        self.invoke(commands::SAVE_PLUGIN_DATA, json!({"pluginId": id, "data": data})).await?;
        Ok(())
    }

    /// Every file and folder in the vault.
    pub async fn list_files(&self) -> BackendResult<Vec<FileEntry>> {
        self.call(commands::LIST_FILES, Value::Null).await
    }

    /// Text of a note.
    pub async fn read_note(&self, path: &str) -> BackendResult<String> {
        self.call(commands::READ_NOTE, json!({"path": path})).await
    }

    /// Overwrite (or create) a note.
    pub async fn write_note(&self, path: &str, content: &str) -> BackendResult<FileStat> {
        self.call(commands::WRITE_NOTE, json!({"path": path, "content": content})).await
    }

    /// Create a note that must not exist yet.
    pub async fn create_note(&self, path: &str, content: &str) -> BackendResult<FileStat> {
        self.call(commands::CREATE_NOTE, json!({"path": path, "content": content})).await
    }

    pub async fn create_folder(&self, path: &str) -> BackendResult<()> {
        self.invoke(commands::CREATE_FOLDER, json!({"path": path})).await?;
        Ok(())
    }

    pub async fn delete_path(&self, path: &str) -> BackendResult<()> {
        self.invoke(commands::DELETE_PATH, json!({"path": path})).await?;
        Ok(())
    }

    pub async fn rename_path(&self, from: &str, to: &str) -> BackendResult<FileStat> {
        self.call(commands::RENAME_PATH, json!({"from": from, "to": to})).await
    }

    /// Parsed metadata of a note, if the backend has any.
    pub async fn file_cache(&self, path: &str) -> BackendResult<Option<CachedMetadata>> {
        self.call(commands::GET_FILE_CACHE, json!({"path": path})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_timeout() {
        let backend = Rc::new(MemoryBackend::new().with_note("slow.md", "zzz"));
        backend.delay(commands::READ_NOTE, Duration::from_millis(200));
        let client = BackendClient::new(backend, Duration::from_millis(20));
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let err = rt.block_on(client.read_note("slow.md")).unwrap_err();
        assert!(matches!(err, BackendError::Timeout { millis: 20, .. }));
    }

    #[test]
    fn test_typed_calls() {
        let backend = Rc::new(MemoryBackend::new().with_note("a.md", "# A"));
        let client = BackendClient::new(backend, Duration::from_secs(1));
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            assert_eq!(client.read_note("a.md").await.unwrap(), "# A");
            assert!(client.read_plugin_styles("missing").await.unwrap().is_none());
            let cache = client.file_cache("a.md").await.unwrap().unwrap();
            assert_eq!(cache.headings[0].heading, "A");
            assert!(client.file_cache("nope.md").await.unwrap().is_none());
        });
    }
}
