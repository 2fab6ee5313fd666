//! The `app` object shared by every plugin.

use std::rc::{Rc, Weak};

use serde::Serialize;
use serde_json::Value;

use super::dom::DomListeners;
use super::file::TFile;
use super::metadata::{MetadataCache, MetadataEvent};
use super::notice::NoticeCenter;
use super::plugin::Ledger;
use super::styles::StyleSheets;
use super::vault::{Vault, VaultEvent};
use super::workspace::{Workspace, WorkspaceEvent};
use super::ApiResult;
use crate::backend::BackendClient;
use crate::registry::PluginRegistry;

/// Version of the plugin API this runtime implements. Compared against a
/// manifest's `minAppVersion`.
pub const API_VERSION: &str = "1.5.0";

/// Static facts about the running app, exposed to scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub api_version: String,
    pub vault_name: String,
    pub config_dir: String,
}

/// Long-lived facade composed of every API object.
///
/// Created once and never rebuilt while plugins are loaded.
#[derive(Debug)]
pub struct App {
    pub client: BackendClient,
    pub vault: Vault,
    pub workspace: Workspace,
    pub metadata_cache: MetadataCache,
    pub notices: NoticeCenter,
    pub styles: StyleSheets,
    pub dom: DomListeners,
    pub ledger: Ledger,
    pub registry: PluginRegistry,
    info: AppInfo,
}

impl App {
    /// Build the facade and wire vault changes into the workspace and the
    /// metadata cache.
    pub fn new(client: BackendClient, vault_name: &str, config_dir: &str) -> Rc<Self> {
        let app = Rc::new(Self {
            vault: Vault::new(client.clone()),
            workspace: Workspace::new(),
            metadata_cache: MetadataCache::new(client.clone()),
            notices: NoticeCenter::new(),
            styles: StyleSheets::new(),
            dom: DomListeners::new(),
            ledger: Ledger::new(),
            registry: PluginRegistry::new(),
            info: AppInfo {
                api_version: API_VERSION.to_string(),
                vault_name: vault_name.to_string(),
                config_dir: config_dir.to_string(),
            },
            client,
        });
        wire_vault(&app);
        app
    }

    pub fn info(&self) -> &AppInfo {
        &self.info
    }

    /// Index the vault and compute metadata for every markdown file.
    pub async fn load(&self) -> ApiResult<usize> {
        let files = self.vault.load().await?;
        let cached = self.metadata_cache.resolve_all(&self.vault).await?;
        tracing::debug!(files, cached, "App state loaded");
        Ok(files)
    }

    /// Drop a subscription on the emitter named by `source`.
    pub fn offref(&self, source: &str, id: u64) -> bool {
        match source {
            "vault" => self.vault.events().remove_id(id),
            "workspace" => self.workspace.events().remove_id(id),
            "metadataCache" => self.metadata_cache.events().remove_id(id),
            _ => false,
        }
    }

    /// Raise a plugin-defined event on the emitter named by `source`.
    pub fn trigger(&self, source: &str, name: &str, args: Value) -> bool {
        let name = name.to_string();
        match source {
            "vault" => self.vault.events().trigger(&VaultEvent::Custom { name, args }),
            "workspace" => self.workspace.events().trigger(&WorkspaceEvent::Custom { name, args }),
            "metadataCache" => self.metadata_cache.events().trigger(&MetadataEvent::Custom { name, args }),
            _ => return false,
        }
        true
    }

    /// Refresh the metadata entry of a file after its text changed.
    ///
    /// Failures are logged; the write itself already succeeded.
    pub async fn refresh_metadata(&self, file: &TFile, content: &str) {
        if !file.is_markdown() {
            return;
        }
        if let Err(e) = self.metadata_cache.refresh(file, content).await {
            tracing::warn!(path = %file.path, error = %e, "Metadata refresh failed");
        }
    }
}

fn wire_vault(app: &Rc<App>) {
    let weak: Weak<App> = Rc::downgrade(app);
    app.vault.on("rename", move |event| {
        let (Some(app), VaultEvent::Rename { file, old_path }) = (weak.upgrade(), event) else { return };
        app.metadata_cache.rename(old_path, file.path());
        if let Some(file) = file.as_file() {
            app.workspace.file_renamed(old_path, file);
        }
    });

    let weak: Weak<App> = Rc::downgrade(app);
    app.vault.on("delete", move |event| {
        let (Some(app), VaultEvent::Delete(target)) = (weak.upgrade(), event) else { return };
        if let Some(file) = target.as_file() {
            app.metadata_cache.forget(file);
        }
        app.workspace.file_deleted(target.path());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::time::Duration;

    fn setup() -> (Rc<App>, tokio::runtime::Runtime) {
        let backend = Rc::new(MemoryBackend::new().with_note("a.md", "# A\n[[b]]").with_note("b.md", "# B"));
        let app = App::new(BackendClient::new(backend, Duration::from_secs(1)), "Test", ".obsidian");
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(app.load()).unwrap();
        (app, rt)
    }

    #[test]
    fn test_load_indexes_and_caches() {
        let (app, _rt) = setup();
        assert_eq!(app.vault.get_files().len(), 2);
        assert!(app.metadata_cache.get_file_cache("a.md").is_some());
        assert_eq!(app.info().api_version, API_VERSION);
    }

    #[test]
    fn test_rename_moves_cache_and_leaves() {
        let (app, rt) = setup();
        let leaf = app.workspace.get_leaf(false);
        app.workspace.open_file(&leaf.id, app.vault.get_file("b.md").unwrap()).unwrap();
        rt.block_on(app.vault.rename("b.md", "c.md")).unwrap();
        assert!(app.metadata_cache.get_file_cache("b.md").is_none());
        assert!(app.metadata_cache.get_file_cache("c.md").is_some());
        assert_eq!(app.workspace.get_active_file().unwrap().path, "c.md");
    }

    #[test]
    fn test_custom_trigger_and_offref() {
        let (app, _rt) = setup();
        let hits = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&hits);
        let sub = app.workspace.on("my-event", move |_| counter.set(counter.get() + 1));
        assert!(app.trigger("workspace", "my-event", serde_json::json!([1])));
        assert!(!app.trigger("nowhere", "my-event", Value::Null));
        assert!(app.offref("workspace", sub.id));
        assert!(!app.offref("workspace", sub.id));
        app.trigger("workspace", "my-event", Value::Null);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_delete_forgets_cache() {
        let (app, rt) = setup();
        rt.block_on(app.vault.delete("a.md")).unwrap();
        assert!(app.metadata_cache.get_file_cache("a.md").is_none());
    }
}
