//! `TFile` / `TFolder` descriptors.

use serde::{Deserialize, Serialize};

use crate::backend::FileStat;

/// A file in the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TFile {
    pub path: String,
    pub name: String,
    pub basename: String,
    pub extension: String,
    pub stat: FileStat,
}

impl TFile {
    /// Build a descriptor for `path`.
    pub fn new(path: &str, stat: FileStat) -> Self {
        let path = normalize_path(path);
        let name = file_name(&path).to_string();
        let (basename, extension) = match name.rfind('.') {
            Some(idx) if idx > 0 => (name[..idx].to_string(), name[idx + 1..].to_string()),
            _ => (name.clone(), String::new()),
        };
        Self { path, name, basename, extension, stat }
    }

    /// Path of the containing folder, `/` for the root.
    pub fn parent_path(&self) -> String {
        parent_path(&self.path)
    }

    pub fn is_markdown(&self) -> bool {
        self.extension == "md"
    }
}

/// A folder in the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TFolder {
    pub path: String,
    pub name: String,
    /// Paths of direct children.
    pub children: Vec<String>,
}

impl TFolder {
    pub fn new(path: &str, children: Vec<String>) -> Self {
        let path = normalize_path(path);
        let name = if path == "/" { String::new() } else { file_name(&path).to_string() };
        Self { path, name, children }
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }
}

/// Either kind of vault entry, tagged for the script side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AbstractFile {
    File(TFile),
    Folder(TFolder),
}

impl AbstractFile {
    pub fn path(&self) -> &str {
        match self {
            Self::File(f) => &f.path,
            Self::Folder(f) => &f.path,
        }
    }

    pub fn as_file(&self) -> Option<&TFile> {
        match self {
            Self::File(f) => Some(f),
            Self::Folder(_) => None,
        }
    }
}

/// Normalize a vault path the way plugins expect.
///
/// Backslashes become slashes, repeated slashes collapse, and leading and
/// trailing slashes are dropped. The empty path is the root, `/`.
pub fn normalize_path(path: &str) -> String {
    let joined = path
        .replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
        .replace('\u{00A0}', " ");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

/// Final component of a path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent folder of a path, `/` at the top level.
pub fn parent_path(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) if idx > 0 => path[..idx].to_string(),
        _ => "/".to_string(),
    }
}
