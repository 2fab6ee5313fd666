//! Plugin loader error types.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::api::ApiError;
use crate::backend::BackendError;
use crate::sandbox::SandboxError;

/// Result type for loader operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// The step of a load that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadErrorKind {
    /// Reading `main.js` or `styles.css` from the backend.
    Fetch,
    /// Running the entry code.
    Evaluate,
    /// Finding the plugin class among the exports.
    Export,
    /// Constructing the instance.
    Instantiate,
    /// `onload()` threw, rejected or timed out.
    Onload,
    /// The plugin needs a newer API than this runtime provides.
    Incompatible,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::Evaluate => "evaluate",
            Self::Export => "export",
            Self::Instantiate => "instantiate",
            Self::Onload => "onload",
            Self::Incompatible => "incompatible",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while discovering and managing plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A manifest was malformed or failed validation.
    #[error("Invalid manifest for '{id}': {reason}")]
    Discovery { id: String, reason: String },

    /// A load step failed.
    #[error("Failed to load plugin '{id}' ({kind}): {reason}")]
    Load { id: String, kind: LoadErrorKind, reason: String },

    /// The backend refused a request.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An API call made on behalf of the host failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The script engine failed.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// `onunload()` or a cleanup failed. Teardown still ran.
    #[error("Failed to unload plugin '{id}': {reason}")]
    Unload { id: String, reason: String },

    /// No plugin with this id was discovered.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// The plugin registered no settings tab.
    #[error("Plugin '{0}' has no settings tab")]
    NoSettingTab(String),

    /// The enabled flag was persisted but the load failed.
    #[error("Plugin '{id}' is enabled but failed to load: {reason}")]
    EnabledButNotLoaded { id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = PluginError::Load { id: "p".into(), kind: LoadErrorKind::Evaluate, reason: "boom".into() };
        assert_eq!(err.to_string(), "Failed to load plugin 'p' (evaluate): boom");

        let err: PluginError = SandboxError::Reentrant.into();
        assert_eq!(err.to_string(), "Script engine is busy");
    }

    #[test]
    fn test_kind_wire_name() {
        assert_eq!(serde_json::to_value(LoadErrorKind::Onload).unwrap(), serde_json::json!("onload"));
    }
}
