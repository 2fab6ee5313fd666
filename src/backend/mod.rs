//! Storage backend boundary.
//!
//! Everything the runtime knows about plugins on disk and notes in the vault
//! comes through [`Backend::invoke`]: a command name plus a JSON parameter
//! object, answered asynchronously. [`BackendClient`] puts typed methods and
//! timeouts on top of that; [`FsBackend`] and [`MemoryBackend`] are the two
//! shipped implementations.

mod client;
mod error;
mod fs;
pub mod markdown;
mod memory;

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::BackendClient;
pub use error::{BackendError, BackendResult};
pub use fs::FsBackend;
pub use markdown::{code_blocks, CachedMetadata, CodeBlock};
pub use memory::MemoryBackend;

/// Backend command names.
pub mod commands {
    pub const LIST_PLUGINS: &str = "list_obsidian_plugins";
    pub const GET_ENABLED_PLUGINS: &str = "get_enabled_plugins";
    pub const TOGGLE_PLUGIN: &str = "toggle_plugin";
    pub const READ_PLUGIN_MAIN: &str = "read_plugin_main";
    pub const READ_PLUGIN_STYLES: &str = "read_plugin_styles";
    pub const LOAD_PLUGIN_DATA: &str = "load_plugin_data";
    pub const SAVE_PLUGIN_DATA: &str = "save_plugin_data";
    pub const LIST_FILES: &str = "list_files";
    pub const READ_NOTE: &str = "read_note";
    pub const WRITE_NOTE: &str = "write_note";
    pub const CREATE_NOTE: &str = "create_note";
    pub const CREATE_FOLDER: &str = "create_folder";
    pub const DELETE_PATH: &str = "delete_path";
    pub const RENAME_PATH: &str = "rename_path";
    pub const GET_FILE_CACHE: &str = "get_file_cache";
}

/// The asynchronous storage/rendering layer the runtime talks to.
///
/// Implementations are driven from a single-threaded event loop, so futures
/// are not required to be `Send`.
#[async_trait(?Send)]
pub trait Backend {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "backend"
    }

    /// Invoke a backend command by name.
    async fn invoke(&self, command: &str, args: Value) -> BackendResult<Value>;
}

/// Timestamps and size of a vault file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Creation time in milliseconds since the epoch.
    pub ctime: i64,
    /// Modification time in milliseconds since the epoch.
    pub mtime: i64,
    /// Size in bytes.
    pub size: u64,
}

/// Kind of a vault entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

/// One entry of the vault listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<FileStat>,
}

/// A decoded backend command.
///
/// Both shipped backends parse the wire form into this before doing any
/// work, so argument validation behaves the same everywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendRequest {
    ListPlugins,
    GetEnabledPlugins,
    TogglePlugin { plugin_id: String, enabled: bool },
    ReadPluginMain { plugin_id: String },
    ReadPluginStyles { plugin_id: String },
    LoadPluginData { plugin_id: String },
    SavePluginData { plugin_id: String, data: Value },
    ListFiles,
    ReadNote { path: String },
    WriteNote { path: String, content: String },
    CreateNote { path: String, content: String },
    CreateFolder { path: String },
    DeletePath { path: String },
    RenamePath { from: String, to: String },
    GetFileCache { path: String },
}

impl BackendRequest {
    /// Decode a command name and its parameter object.
    pub fn parse(command: &str, args: &Value) -> BackendResult<Self> {
        let req = match command {
            commands::LIST_PLUGINS => Self::ListPlugins,
            commands::GET_ENABLED_PLUGINS => Self::GetEnabledPlugins,
            commands::TOGGLE_PLUGIN => Self::TogglePlugin {
                plugin_id: str_arg(command, args, "pluginId")?,
                enabled: args.get("enabled").and_then(Value::as_bool).ok_or_else(|| {
                    BackendError::InvalidArgs {
                        command: command.to_string(),
                        reason: "missing boolean 'enabled'".to_string(),
                    }
                })?,
            },
            commands::READ_PLUGIN_MAIN => {
                Self::ReadPluginMain { plugin_id: str_arg(command, args, "pluginId")? }
            }
            commands::READ_PLUGIN_STYLES => {
                Self::ReadPluginStyles { plugin_id: str_arg(command, args, "pluginId")? }
            }
            commands::LOAD_PLUGIN_DATA => {
                Self::LoadPluginData { plugin_id: str_arg(command, args, "pluginId")? }
            }
            commands::SAVE_PLUGIN_DATA => Self::SavePluginData {
                plugin_id: str_arg(command, args, "pluginId")?,
                data: args.get("data").cloned().unwrap_or(Value::Null),
            },
            commands::LIST_FILES => Self::ListFiles,
            commands::READ_NOTE => Self::ReadNote { path: str_arg(command, args, "path")? },
            commands::WRITE_NOTE => Self::WriteNote {
                path: str_arg(command, args, "path")?,
                content: str_arg(command, args, "content")?,
            },
            commands::CREATE_NOTE => Self::CreateNote {
                path: str_arg(command, args, "path")?,
                content: str_arg(command, args, "content")?,
            },
            commands::CREATE_FOLDER => Self::CreateFolder { path: str_arg(command, args, "path")? },
            commands::DELETE_PATH => Self::DeletePath { path: str_arg(command, args, "path")? },
            commands::RENAME_PATH => Self::RenamePath {
                from: str_arg(command, args, "from")?,
                to: str_arg(command, args, "to")?,
            },
            commands::GET_FILE_CACHE => Self::GetFileCache { path: str_arg(command, args, "path")? },
            other => return Err(BackendError::UnknownCommand(other.to_string())),
        };
        Ok(req)
    }
}

fn str_arg(command: &str, args: &Value, key: &str) -> BackendResult<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string).ok_or_else(|| {
        BackendError::InvalidArgs {
            command: command.to_string(),
            reason: format!("missing string '{}'", key),
        }
    })
}

/// Turn a vault path into a relative filesystem path, rejecting anything
/// that could land outside the vault root.
pub fn vault_relative(path: &str) -> BackendResult<PathBuf> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(BackendError::InvalidPath(path.to_string()));
    }
    let candidate = Path::new(trimmed);
    let mut out = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(BackendError::InvalidPath(path.to_string())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(BackendError::InvalidPath(path.to_string()));
    }
    Ok(out)
}

/// Whether a plugin id is safe to use as a directory name.
pub fn is_valid_plugin_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_toggle() {
        let req = BackendRequest::parse(
            commands::TOGGLE_PLUGIN,
            &json!({"pluginId": "calendar", "enabled": true}),
        )
        .unwrap();
        assert_eq!(req, BackendRequest::TogglePlugin { plugin_id: "calendar".into(), enabled: true });
    }

    #[test]
    fn test_parse_missing_arg() {
        let err = BackendRequest::parse(commands::READ_NOTE, &json!({})).unwrap_err();
        assert!(matches!(err, BackendError::InvalidArgs { .. }));
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = BackendRequest::parse("format_disk", &Value::Null).unwrap_err();
        assert!(matches!(err, BackendError::UnknownCommand(_)));
    }

    #[test]
    fn test_vault_relative_rejects_escape() {
        assert!(vault_relative("../secret.md").is_err());
        assert!(vault_relative("notes/../../x").is_err());
        assert!(vault_relative("").is_err());
        assert_eq!(vault_relative("/notes/a.md").unwrap(), PathBuf::from("notes/a.md"));
        assert_eq!(vault_relative("./a.md").unwrap(), PathBuf::from("a.md"));
    }

    #[test]
    fn test_plugin_id_validation() {
        assert!(is_valid_plugin_id("obsidian-git"));
        assert!(is_valid_plugin_id("dataview_2.0"));
        assert!(!is_valid_plugin_id(".."));
        assert!(!is_valid_plugin_id("a/b"));
        assert!(!is_valid_plugin_id(""));
    }
}
