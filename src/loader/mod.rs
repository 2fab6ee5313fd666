//! Plugin discovery, loading and lifecycle management.
//!
//! The loader owns the script engine and is the only place plugin instances
//! are created or destroyed. Each plugin moves through
//! `Discovered -> Loading -> Loaded -> Unloading -> Unloaded`; a failed load
//! goes straight back to `Unloaded` after its partial registrations are torn
//! down.

mod error;
mod manifest;
mod state;

pub use error::{LoadErrorKind, PluginError, PluginResult};
pub use manifest::PluginManifest;
pub use state::{InitSummary, LoadOutcome, LoadedPlugin, PluginInfo, PluginState};

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::api::{plugin_style_tag, ApiError, App, Contributions, Leaf, API_VERSION};
use crate::backend::markdown::code_blocks;
use crate::registry::CommandInfo;
use crate::sandbox::{resolve_export, Sandbox, SandboxError};

/// Loader tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    /// How long `onload()`/`onunload()` promises may take.
    pub load_timeout: Duration,
    /// Persist a plugin back to disabled when enabling it fails to load.
    pub revert_on_load_failure: bool,
    /// Script engine heap limit in bytes.
    pub memory_limit: Option<usize>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(30),
            revert_on_load_failure: false,
            memory_limit: Some(256 * 1024 * 1024),
        }
    }
}

/// Discovers, loads and unloads plugins against one [`App`].
pub struct PluginLoader {
    app: Rc<App>,
    sandbox: Sandbox,
    options: LoaderOptions,
    manifests: RefCell<BTreeMap<String, PluginManifest>>,
    enabled: RefCell<BTreeSet<String>>,
    states: RefCell<HashMap<String, PluginState>>,
    loaded: RefCell<BTreeMap<String, LoadedPlugin>>,
    /// Signalled on every state change.
    transitions: Notify,
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("discovered", &self.manifests.borrow().len())
            .field("enabled", &self.enabled.borrow().len())
            .field("loaded", &self.loaded.borrow().len())
            .finish()
    }
}

impl PluginLoader {
    /// Create a loader with its own script engine.
    pub fn new(app: Rc<App>, options: LoaderOptions) -> PluginResult<Self> {
        let sandbox = Sandbox::new(Rc::clone(&app), options.memory_limit)?;
        Ok(Self {
            app,
            sandbox,
            options,
            manifests: RefCell::new(BTreeMap::new()),
            enabled: RefCell::new(BTreeSet::new()),
            states: RefCell::new(HashMap::new()),
            loaded: RefCell::new(BTreeMap::new()),
            transitions: Notify::new(),
        })
    }

    pub fn app(&self) -> &Rc<App> {
        &self.app
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Index the vault, discover plugins and load the enabled ones.
    pub async fn init(&self) -> PluginResult<InitSummary> {
        self.app.load().await?;
        let discovered = self.discover_plugins().await?;
        let outcomes = self.load_enabled_plugins().await;
        self.app.workspace.set_layout_ready();
        self.pump().await;

        let summary = InitSummary {
            discovered,
            loaded: outcomes.iter().filter(|(_, o)| o.is_loaded()).count(),
            failed: outcomes.iter().filter(|(_, o)| !o.is_loaded()).map(|(id, _)| id.clone()).collect(),
        };
        tracing::info!(
            discovered = summary.discovered,
            loaded = summary.loaded,
            failed = summary.failed.len(),
            "Plugins initialized"
        );
        Ok(summary)
    }

    /// Read every manifest and the enabled list from the backend.
    ///
    /// Invalid manifests are skipped with a warning. An unreadable enabled
    /// list counts as empty. Returns the number of valid plugins.
    pub async fn discover_plugins(&self) -> PluginResult<usize> {
        let listed = self.app.client.list_plugins().await?;
        let mut manifests = BTreeMap::new();
        for value in listed {
            let manifest = match PluginManifest::from_value(value).and_then(|m| m.validate().map(|()| m)) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping plugin");
                    continue;
                }
            };
            if manifests.contains_key(&manifest.id) {
                tracing::warn!(plugin = %manifest.id, "Duplicate plugin id, keeping the first");
                continue;
            }
            manifests.insert(manifest.id.clone(), manifest);
        }

        let enabled: BTreeSet<String> = match self.app.client.enabled_plugins().await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read enabled plugins");
                BTreeSet::new()
            }
        };

        let count = manifests.len();
        {
            let mut states = self.states.borrow_mut();
            for id in manifests.keys() {
                states.entry(id.clone()).or_insert(PluginState::Discovered);
            }
        }
        *self.manifests.borrow_mut() = manifests;
        *self.enabled.borrow_mut() = enabled;
        self.publish_plugin_info();
        tracing::debug!(count, "Plugins discovered");
        Ok(count)
    }

    fn publish_plugin_info(&self) {
        let manifests: serde_json::Map<String, Value> =
            self.manifests.borrow().iter().map(|(id, m)| (id.clone(), m.to_value())).collect();
        let enabled: Vec<String> = self.enabled.borrow().iter().cloned().collect();
        self.sandbox.set_plugin_info(json!({"manifests": manifests, "enabled": enabled}));
    }

    /// Load one plugin.
    ///
    /// Returns `Err` only for an unknown id. Every load failure is rolled
    /// back, announced with one notice and reported as
    /// [`LoadOutcome::Failed`].
    pub async fn load_plugin(&self, id: &str) -> PluginResult<LoadOutcome> {
        let manifest = self.manifest(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        match self.state(id) {
            Some(PluginState::Loaded) => return Ok(LoadOutcome::AlreadyLoaded),
            Some(PluginState::Loading) | Some(PluginState::Unloading) => return Ok(LoadOutcome::InFlight),
            _ => {}
        }
        self.set_state(id, PluginState::Loading);
        tracing::debug!(plugin = %id, "Loading plugin");

        match self.try_load(&manifest).await {
            Ok(adapted) => {
                self.loaded.borrow_mut().insert(
                    id.to_string(),
                    LoadedPlugin { manifest: manifest.clone(), loaded_at: chrono::Local::now(), adapted },
                );
                self.set_state(id, PluginState::Loaded);
                tracing::info!(plugin = %id, version = %manifest.version, adapted, "Plugin loaded");
                Ok(LoadOutcome::Loaded)
            }
            Err((kind, reason)) => {
                tracing::error!(plugin = %id, kind = %kind, error = %reason, "Plugin failed to load");
                self.app.notices.show(
                    format!("Failed to load plugin \"{}\": {}", manifest.name, reason),
                    None,
                    Some(id),
                );
                self.teardown(id, false).await;
                self.set_state(id, PluginState::Unloaded);
                Ok(LoadOutcome::Failed { kind, reason })
            }
        }
    }

    async fn try_load(&self, manifest: &PluginManifest) -> Result<bool, (LoadErrorKind, String)> {
        let id = manifest.id.as_str();
        if !manifest.is_compatible_with(API_VERSION) {
            return Err((
                LoadErrorKind::Incompatible,
                format!(
                    "requires API version {}, but this runtime provides {}",
                    manifest.min_app_version.as_deref().unwrap_or_default(),
                    API_VERSION
                ),
            ));
        }
        self.app.ledger.open(id);

        let fetch = |e: crate::backend::BackendError| (LoadErrorKind::Fetch, e.to_string());
        let source = self.app.client.read_plugin_main(id).await.map_err(fetch)?;
        let styles = self.app.client.read_plugin_styles(id).await.map_err(fetch)?;

        if let Some(css) = styles.filter(|css| !css.trim().is_empty()) {
            let tag = plugin_style_tag(id);
            self.app.styles.inject(&tag, &css);
            self.app.ledger.record(id, |c| c.stylesheets.push(tag));
        }

        let shape = self
            .sandbox
            .evaluate(id, &manifest.to_value(), &source)
            .map_err(|e| (LoadErrorKind::Evaluate, e.to_string()))?;
        let choice = resolve_export(&shape).ok_or((LoadErrorKind::Export, SandboxError::NoExport.to_string()))?;
        tracing::debug!(plugin = %id, export = ?choice, "Resolved plugin class");

        let adapted = self.sandbox.instantiate(id, &choice).map_err(|e| (LoadErrorKind::Instantiate, e.to_string()))?;
        self.sandbox
            .run_hook(id, "load", self.options.load_timeout)
            .await
            .map_err(|e| (LoadErrorKind::Onload, e.to_string()))?;
        Ok(adapted)
    }

    /// Reverse everything a plugin registered, then drop its instance.
    async fn teardown(&self, id: &str, run_unload: bool) {
        if run_unload && self.sandbox.has_instance(id) {
            if let Err(e) = self.sandbox.run_hook(id, "unload", self.options.load_timeout).await {
                let e = PluginError::Unload { id: id.to_string(), reason: e.to_string() };
                tracing::warn!(plugin = %id, error = %e, "onunload failed, continuing teardown");
            }
        }
        let contributions = self.app.ledger.get(id).unwrap_or_default();

        let timers = self.sandbox.clear_timers(id);
        let dom = self.app.dom.remove_owned_by(id).len();
        if let Err(e) = self.sandbox.detach_listeners(id) {
            tracing::debug!(plugin = %id, error = %e, "Could not detach script listeners");
        }

        let commands = self.app.registry.remove_commands_owned_by(id);
        let view_types: Vec<String> = self
            .app
            .registry
            .views()
            .into_iter()
            .filter(|v| v.plugin_id == id)
            .map(|v| v.view_type)
            .collect();
        let removed = self.app.registry.remove_owned_by(id);
        for view_type in &view_types {
            self.app.workspace.detach_leaves_of_type(view_type);
        }

        for event in &contributions.events {
            self.app.offref(event.source, event.id);
        }
        for tag in &contributions.stylesheets {
            self.app.styles.remove(tag);
        }

        if let Err(e) = self.sandbox.release(id) {
            tracing::debug!(plugin = %id, error = %e, "Could not release script instance");
        }
        self.app.ledger.take(id);
        self.sandbox.deliver_events();
        tracing::debug!(
            plugin = %id,
            timers,
            dom,
            commands,
            entries = removed.total(),
            events = contributions.events.len(),
            "Plugin torn down"
        );
    }

    /// Unload a loaded plugin. Returns whether anything was unloaded.
    ///
    /// A load or unload already in flight finishes first.
    pub async fn unload_plugin(&self, id: &str) -> bool {
        self.settled(id).await;
        if self.state(id) != Some(PluginState::Loaded) {
            return false;
        }
        self.set_state(id, PluginState::Unloading);
        self.teardown(id, true).await;
        self.loaded.borrow_mut().remove(id);
        self.set_state(id, PluginState::Unloaded);
        tracing::info!(plugin = %id, "Plugin unloaded");
        true
    }

    /// Persist the enabled flag, then load or unload.
    ///
    /// Toggles of the same plugin apply in call order: each one waits for
    /// the transition started before it, so the last toggle decides whether
    /// the plugin ends up loaded.
    pub async fn toggle_plugin(&self, id: &str, enabled: bool) -> PluginResult<()> {
        if self.manifest(id).is_none() {
            return Err(PluginError::NotFound(id.to_string()));
        }
        self.app.client.toggle_plugin(id, enabled).await?;
        self.set_enabled(id, enabled);

        if !enabled {
            self.unload_plugin(id).await;
            return Ok(());
        }

        self.settled(id).await;
        let (kind, reason) = match self.load_plugin(id).await? {
            LoadOutcome::Loaded | LoadOutcome::AlreadyLoaded => return Ok(()),
            LoadOutcome::Failed { kind, reason } => (kind, reason),
            LoadOutcome::InFlight => {
                return Err(PluginError::EnabledButNotLoaded {
                    id: id.to_string(),
                    reason: "another transition is in flight".to_string(),
                })
            }
        };
        if !self.options.revert_on_load_failure {
            return Err(PluginError::EnabledButNotLoaded { id: id.to_string(), reason });
        }
        match self.app.client.toggle_plugin(id, false).await {
            Ok(()) => self.set_enabled(id, false),
            Err(e) => tracing::warn!(plugin = %id, error = %e, "Could not revert enabled flag"),
        }
        Err(PluginError::Load { id: id.to_string(), kind, reason })
    }

    fn set_enabled(&self, id: &str, enabled: bool) {
        {
            let mut set = self.enabled.borrow_mut();
            if enabled {
                set.insert(id.to_string());
            } else {
                set.remove(id);
            }
        }
        self.publish_plugin_info();
    }

    /// Load every enabled, discovered plugin in id order.
    pub async fn load_enabled_plugins(&self) -> Vec<(String, LoadOutcome)> {
        let ids: Vec<String> = {
            let manifests = self.manifests.borrow();
            self.enabled.borrow().iter().filter(|id| manifests.contains_key(*id)).cloned().collect()
        };
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_plugin(&id).await {
                Ok(outcome) => outcomes.push((id, outcome)),
                Err(e) => tracing::warn!(plugin = %id, error = %e, "Skipping plugin"),
            }
        }
        outcomes
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.enabled.borrow().contains(id)
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.state(id) == Some(PluginState::Loaded)
    }

    pub fn state(&self, id: &str) -> Option<PluginState> {
        self.states.borrow().get(id).copied()
    }

    fn set_state(&self, id: &str, state: PluginState) {
        self.states.borrow_mut().insert(id.to_string(), state);
        self.transitions.notify_waiters();
    }

    /// Wait until `id` is neither loading nor unloading.
    async fn settled(&self, id: &str) {
        loop {
            let notified = self.transitions.notified();
            if !self.state(id).is_some_and(PluginState::is_transient) {
                return;
            }
            tracing::debug!(plugin = %id, "Waiting for in-flight transition");
            notified.await;
        }
    }

    /// Every discovered manifest, ordered by id.
    pub fn manifests(&self) -> Vec<PluginManifest> {
        self.manifests.borrow().values().cloned().collect()
    }

    pub fn manifest(&self, id: &str) -> Option<PluginManifest> {
        self.manifests.borrow().get(id).cloned()
    }

    /// Every discovered plugin with its enabled flag and state.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.manifests()
            .into_iter()
            .map(|manifest| {
                let enabled = self.is_enabled(&manifest.id);
                let state = self.state(&manifest.id).unwrap_or(PluginState::Discovered);
                PluginInfo { manifest, enabled, state }
            })
            .collect()
    }

    pub fn loaded_plugin(&self, id: &str) -> Option<LoadedPlugin> {
        self.loaded.borrow().get(id).cloned()
    }

    /// The first settings tab a plugin registered.
    pub fn get_plugin_setting_tab(&self, id: &str) -> Option<crate::registry::SettingTabEntry> {
        self.app.registry.setting_tab_for(id)
    }

    /// Run a plugin's settings tab `display()` and return its outline.
    pub async fn open_setting_tab(&self, id: &str) -> PluginResult<String> {
        let tab = self.get_plugin_setting_tab(id).ok_or_else(|| PluginError::NoSettingTab(id.to_string()))?;
        let outline = self.sandbox.display_setting_tab(tab.handle)?;
        self.pump().await;
        Ok(outline)
    }

    /// Unload every loaded plugin, in reverse id order.
    pub async fn unload_all(&self) -> usize {
        let ids: Vec<String> = self.loaded.borrow().keys().rev().cloned().collect();
        let mut count = 0;
        for id in ids {
            if self.unload_plugin(&id).await {
                count += 1;
            }
        }
        count
    }

    /// Close the workspace and unload everything.
    pub async fn shutdown(&self) {
        self.app.workspace.quit();
        self.sandbox.deliver_events();
        let count = self.unload_all().await;
        tracing::info!(count, "Plugins shut down");
    }

    /// Unload and load one plugin again, re-reading its entry code.
    pub async fn reload_plugin(&self, id: &str) -> PluginResult<LoadOutcome> {
        self.unload_plugin(id).await;
        self.load_plugin(id).await
    }

    /// Unload everything, rediscover, and load the enabled set again
    /// against the same app.
    pub async fn reload_all(&self) -> PluginResult<Vec<(String, LoadOutcome)>> {
        self.unload_all().await;
        self.discover_plugins().await?;
        Ok(self.load_enabled_plugins().await)
    }

    /// Run a registered command and drive whatever async work it started.
    pub async fn execute_command(&self, id: &str) -> bool {
        let ran = self.app.registry.execute_command(id);
        self.pump().await;
        ran
    }

    pub fn commands(&self) -> Vec<CommandInfo> {
        self.app.registry.get_all_commands()
    }

    /// What a loaded (or partially loaded) plugin has registered.
    pub fn contributions(&self, id: &str) -> Option<Contributions> {
        self.app.ledger.get(id)
    }

    /// Feed rendered note text through every registered post-processor.
    pub async fn run_post_processors(&self, path: &str, text: &str) -> PluginResult<String> {
        let processors: Vec<Value> = self
            .app
            .registry
            .post_processors()
            .into_iter()
            .map(|p| json!({"handle": p.handle, "language": p.language}))
            .collect();
        if processors.is_empty() {
            return Ok(text.to_string());
        }
        let payload = json!({
            "text": text,
            "sourcePath": path,
            "processors": processors,
            "blocks": code_blocks(text),
        });
        let rendered = self.sandbox.post_process(&payload)?;
        self.pump().await;
        Ok(rendered)
    }

    /// Open a vault file in a leaf and let subscribers react.
    pub async fn open_file(&self, path: &str) -> PluginResult<Leaf> {
        let file = self.app.vault.get_file(path).ok_or_else(|| ApiError::FileNotFound(path.to_string()))?;
        let leaf = self.app.workspace.get_leaf(false);
        let leaf = self.app.workspace.open_file(&leaf.id, file)?;
        self.pump().await;
        Ok(leaf)
    }

    /// Drive pending script jobs, events and backend requests.
    pub async fn pump(&self) -> usize {
        self.sandbox.pump().await
    }

    /// Fire due timers, then drive the work they started.
    pub async fn tick(&self) -> usize {
        let fired = self.sandbox.tick();
        self.pump().await;
        fired
    }

    /// Live interval timers owned by a plugin.
    pub fn live_intervals(&self, id: &str) -> usize {
        self.sandbox.timers().intervals_of(id)
    }

    /// Live DOM listeners owned by a plugin.
    pub fn live_dom_listeners(&self, id: &str) -> usize {
        self.app.dom.count_for(id)
    }
}
