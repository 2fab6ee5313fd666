//! Plugin manifest parsing and validation.
//!
//! A manifest is the `manifest.json` next to a plugin's entry file. The
//! backend reports it as JSON and adds `hasStyles`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PluginError, PluginResult};

/// Plugin manifest as read during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin id, also the directory name.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Lowest API version the plugin runs on.
    #[serde(default)]
    pub min_app_version: Option<String>,
    /// Entry file relative to the plugin directory.
    #[serde(rename = "main", default = "default_entry_file")]
    pub entry_file: String,
    /// Whether a `styles.css` ships with the plugin.
    #[serde(default)]
    pub has_styles: bool,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_url: Option<String>,
    #[serde(default)]
    pub is_desktop_only: bool,
    #[serde(default)]
    pub funding_url: Option<Value>,
}

fn default_entry_file() -> String {
    "main.js".to_string()
}

impl PluginManifest {
    /// Parse a manifest from the backend's JSON.
    pub fn from_value(value: Value) -> PluginResult<Self> {
        let id = value.get("id").and_then(Value::as_str).unwrap_or("<unknown>").to_string();
        serde_json::from_value(value).map_err(|e| PluginError::Discovery { id, reason: e.to_string() })
    }

    /// Parse a manifest from a JSON string.
    pub fn from_json(content: &str) -> PluginResult<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| PluginError::Discovery { id: "<unknown>".to_string(), reason: e.to_string() })?;
        Self::from_value(value)
    }

    /// Serialize back to the wire shape handed to scripts.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Validate the manifest.
    pub fn validate(&self) -> PluginResult<()> {
        let invalid = |reason: &str| PluginError::Discovery { id: self.id.clone(), reason: reason.to_string() };

        if self.id.is_empty() {
            return Err(invalid("Plugin id is required"));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(
                "Plugin id must contain only lowercase letters, digits, hyphens, underscores and dots",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("Plugin name is required"));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("Plugin version is required"));
        }

        let entry = self.entry_file.replace('\\', "/");
        if entry.is_empty() || entry.starts_with('/') || entry.split('/').any(|part| part == "..") {
            return Err(invalid("Entry file must be a relative path inside the plugin directory"));
        }

        Ok(())
    }

    /// Check whether this plugin runs on the given API version.
    ///
    /// Versions compare numerically component by component. A missing or
    /// unparseable `minAppVersion` counts as compatible.
    pub fn is_compatible_with(&self, host_api_version: &str) -> bool {
        let Some(required) = self.min_app_version.as_deref().and_then(parse_version) else {
            return true;
        };
        let Some(available) = parse_version(host_api_version) else {
            return true;
        };

        let len = required.len().max(available.len());
        let pad = |v: &[u32], i: usize| v.get(i).copied().unwrap_or(0);
        for i in 0..len {
            let (a, r) = (pad(&available, i), pad(&required, i));
            if a != r {
                return a > r;
            }
        }
        true
    }
}

fn parse_version(version: &str) -> Option<Vec<u32>> {
    let parts: Option<Vec<u32>> = version.trim().split('.').map(|s| s.parse().ok()).collect();
    parts.filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE_MANIFEST: &str = r#"{
        "id": "daily-notes-plus",
        "name": "Daily Notes Plus",
        "version": "1.2.0",
        "minAppVersion": "0.15.0",
        "description": "Extra commands for daily notes",
        "author": "community",
        "isDesktopOnly": false
    }"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = PluginManifest::from_json(SAMPLE_MANIFEST).unwrap();

        assert_eq!(manifest.id, "daily-notes-plus");
        assert_eq!(manifest.version, "1.2.0");
        assert_eq!(manifest.entry_file, "main.js");
        assert_eq!(manifest.min_app_version.as_deref(), Some("0.15.0"));
        assert!(!manifest.has_styles);
        assert_eq!(manifest.author.as_deref(), Some("community"));
    }

    #[test]
    fn test_validate_manifest() {
        let manifest = PluginManifest::from_json(SAMPLE_MANIFEST).unwrap();
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_missing_field_is_discovery_error() {
        let err = PluginManifest::from_value(json!({"id": "p", "version": "1.0.0"})).unwrap_err();
        assert!(matches!(err, PluginError::Discovery { ref id, .. } if id == "p"));
    }

    #[test]
    fn test_invalid_id() {
        for id in ["", "My Plugin", "UPPER", "a/b"] {
            let manifest =
                PluginManifest::from_value(json!({"id": id, "name": "n", "version": "1.0.0"})).unwrap();
            assert!(manifest.validate().is_err(), "{id:?} should be rejected");
        }
        let manifest =
            PluginManifest::from_value(json!({"id": "ok-id_1.x", "name": "n", "version": "1"})).unwrap();
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_invalid_entry_file() {
        for main in ["../evil.js", "/abs.js", "lib/../../x.js", ""] {
            let manifest =
                PluginManifest::from_value(json!({"id": "p", "name": "n", "version": "1", "main": main})).unwrap();
            assert!(manifest.validate().is_err(), "{main:?} should be rejected");
        }
        let manifest =
            PluginManifest::from_value(json!({"id": "p", "name": "n", "version": "1", "main": "dist/main.js"}))
                .unwrap();
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_api_compatibility() {
        let mut manifest = PluginManifest::from_json(SAMPLE_MANIFEST).unwrap();
        assert!(manifest.is_compatible_with("1.5.0"));
        assert!(manifest.is_compatible_with("0.15"));

        manifest.min_app_version = Some("1.5.1".to_string());
        assert!(!manifest.is_compatible_with("1.5.0"));
        assert!(manifest.is_compatible_with("1.10.0"));

        manifest.min_app_version = Some("latest".to_string());
        assert!(manifest.is_compatible_with("1.5.0"));

        manifest.min_app_version = None;
        assert!(manifest.is_compatible_with("0.1.0"));
    }

    #[test]
    fn test_round_trips_wire_names() {
        let manifest = PluginManifest::from_json(SAMPLE_MANIFEST).unwrap();
        let value = manifest.to_value();
        assert_eq!(value["main"], "main.js");
        assert_eq!(value["minAppVersion"], "0.15.0");
    }
}
