//! Configuration management for plugbridge.
//!
//! Handles loading and saving configuration from TOML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::loader::LoaderOptions;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Vault location
    pub vault: VaultConfig,

    /// Plugin loader settings
    pub loader: LoaderConfig,

    /// Command palette settings
    pub palette: PaletteConfig,
}

/// Vault settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault root; `~` and environment variables are expanded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Directory under the vault root holding plugins and their state
    pub config_dir: String,
}

/// Plugin loader settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Timeout for a single backend call
    pub backend_timeout_ms: u64,

    /// How long `onload()` and `onunload()` may take
    pub load_timeout_ms: u64,

    /// Persist a plugin back to disabled when enabling it fails to load
    pub revert_on_load_failure: bool,

    /// Script engine heap limit; 0 disables the limit
    pub memory_limit_mb: usize,

    /// Load enabled plugins on startup
    pub autoload: bool,
}

/// Command palette settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    /// Maximum number of commands to display
    pub max_results: usize,

    /// Show the owning plugin next to each command
    pub show_plugin_name: bool,

    /// Show command icons
    pub show_icons: bool,
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// Looks for config in:
    /// 1. `.plugbridge.toml` in current directory
    /// 2. `~/.config/plugbridge/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self::locate().map(|path| Self::load_from_file(&path)).transpose()?.unwrap_or_default())
    }

    /// The file `load` would read, if any exists.
    pub fn locate() -> Option<PathBuf> {
        let local_config = PathBuf::from(".plugbridge.toml");
        if local_config.exists() {
            return Some(local_config);
        }
        Self::config_path().filter(|p| p.exists())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the global config file.
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let config_path =
            Self::config_path().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    /// Save configuration to a specific file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("plugbridge"))
    }

    /// Get the global config file path.
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.toml"))
    }

    /// Vault root with `~` and environment variables expanded.
    pub fn vault_path(&self) -> Option<PathBuf> {
        let raw = self.vault.path.as_deref()?;
        let expanded = shellexpand::full(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_string());
        Some(PathBuf::from(expanded))
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self { path: None, config_dir: ".obsidian".to_string() }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 10_000,
            load_timeout_ms: 30_000,
            revert_on_load_failure: false,
            memory_limit_mb: 256,
            autoload: true,
        }
    }
}

impl LoaderConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

impl From<&LoaderConfig> for LoaderOptions {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            load_timeout: Duration::from_millis(config.load_timeout_ms),
            revert_on_load_failure: config.revert_on_load_failure,
            memory_limit: (config.memory_limit_mb > 0).then(|| config.memory_limit_mb * 1024 * 1024),
        }
    }
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self { max_results: 50, show_plugin_name: true, show_icons: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.vault.config_dir, ".obsidian");
        assert_eq!(config.loader.backend_timeout_ms, 10_000);
        assert!(!config.loader.revert_on_load_failure);
        assert!(config.loader.autoload);
        assert_eq!(config.palette.max_results, 50);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[loader]"));
        assert!(toml_str.contains("[palette]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [vault]
            path = "/notes"

            [loader]
            revert_on_load_failure = true
            memory_limit_mb = 0

            [palette]
            show_icons = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.vault_path(), Some(PathBuf::from("/notes")));
        assert_eq!(config.vault.config_dir, ".obsidian");
        assert!(config.loader.revert_on_load_failure);
        assert_eq!(config.loader.load_timeout_ms, 30_000);
        assert!(!config.palette.show_icons);
        assert_eq!(config.palette.max_results, 50);

        let options = LoaderOptions::from(&config.loader);
        assert!(options.revert_on_load_failure);
        assert_eq!(options.memory_limit, None);
    }

    #[test]
    fn test_loader_options_conversion() {
        let options = LoaderOptions::from(&LoaderConfig::default());
        assert_eq!(options.load_timeout, Duration::from_secs(30));
        assert_eq!(options.memory_limit, Some(256 * 1024 * 1024));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.palette.max_results = 7;
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap(), config);
    }
}
