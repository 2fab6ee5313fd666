//! Plugin lifecycle states and load outcomes.

use chrono::{DateTime, Local};
use serde::Serialize;

use super::{LoadErrorKind, PluginManifest};

/// Where a plugin is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Discovered,
    Loading,
    Loaded,
    Unloading,
    Unloaded,
}

impl PluginState {
    /// Whether a load or unload is in flight.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Loading | Self::Unloading)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
            Self::Unloaded => "unloaded",
        }
    }
}

/// Result of a `load_plugin` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LoadOutcome {
    /// The plugin was loaded by this call.
    Loaded,
    /// It was already loaded; nothing happened.
    AlreadyLoaded,
    /// Another load of the same id is running; nothing happened.
    InFlight,
    /// The load failed and was rolled back.
    Failed { kind: LoadErrorKind, reason: String },
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded | Self::AlreadyLoaded)
    }
}

/// Rust-side record of a live plugin instance.
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub manifest: PluginManifest,
    pub loaded_at: DateTime<Local>,
    /// The instance lacked base-class methods and was wrapped.
    pub adapted: bool,
}

/// Summary returned by `init`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitSummary {
    pub discovered: usize,
    pub loaded: usize,
    pub failed: Vec<String>,
}

/// One row of the plugin listing.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub manifest: PluginManifest,
    pub enabled: bool,
    pub state: PluginState,
}

impl PluginInfo {
    pub fn is_loaded(&self) -> bool {
        self.state == PluginState::Loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_is_loaded() {
        assert!(LoadOutcome::Loaded.is_loaded());
        assert!(LoadOutcome::AlreadyLoaded.is_loaded());
        assert!(!LoadOutcome::InFlight.is_loaded());
        assert!(!LoadOutcome::Failed { kind: LoadErrorKind::Fetch, reason: "x".into() }.is_loaded());
    }

    #[test]
    fn test_transient_states() {
        assert!(PluginState::Loading.is_transient());
        assert!(!PluginState::Loaded.is_transient());
        assert_eq!(PluginState::Unloaded.label(), "unloaded");
    }
}
