//! Vault facade.
//!
//! Keeps a synchronous index of every file and folder so enumeration and
//! lookups never suspend, and routes reads and mutations to the backend.
//! Mutations update the index and fire `create`, `modify`, `delete` and
//! `rename` after the backend has accepted them.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::{json, Value};

use super::events::{Event, EventRef, Events};
use super::file::{normalize_path, parent_path, AbstractFile, TFile, TFolder};
use super::{ApiError, ApiResult};
use crate::backend::{BackendClient, FileKind};

/// Events emitted by the vault.
#[derive(Debug, Clone)]
pub enum VaultEvent {
    Create(AbstractFile),
    Modify(TFile),
    Delete(AbstractFile),
    Rename { file: AbstractFile, old_path: String },
    /// Raised by plugin code through `vault.trigger`.
    Custom { name: String, args: Value },
}

impl Event for VaultEvent {
    fn name(&self) -> &str {
        match self {
            Self::Create(_) => "create",
            Self::Modify(_) => "modify",
            Self::Delete(_) => "delete",
            Self::Rename { .. } => "rename",
            Self::Custom { name, .. } => name,
        }
    }

    fn args(&self) -> Value {
        match self {
            Self::Create(file) | Self::Delete(file) => json!([file]),
            Self::Modify(file) => json!([AbstractFile::File(file.clone())]),
            Self::Rename { file, old_path } => json!([file, old_path]),
            Self::Custom { args, .. } => args.clone(),
        }
    }
}

/// The `app.vault` facade.
#[derive(Debug)]
pub struct Vault {
    client: BackendClient,
    files: RefCell<BTreeMap<String, TFile>>,
    folders: RefCell<BTreeSet<String>>,
    contents: RefCell<HashMap<String, (i64, String)>>,
    events: Events<VaultEvent>,
}

impl Vault {
    pub fn new(client: BackendClient) -> Self {
        Self {
            client,
            files: RefCell::new(BTreeMap::new()),
            folders: RefCell::new(BTreeSet::new()),
            contents: RefCell::new(HashMap::new()),
            events: Events::new("vault"),
        }
    }

    /// Event emitter for vault changes.
    pub fn events(&self) -> &Events<VaultEvent> {
        &self.events
    }

    /// Subscribe a native handler.
    pub fn on(&self, name: &str, handler: impl Fn(&VaultEvent) + 'static) -> EventRef {
        self.events.on(name, handler)
    }

    /// Rebuild the index from the backend listing. Returns the file count.
    pub async fn load(&self) -> ApiResult<usize> {
        let entries = self.client.list_files().await?;
        let mut files = BTreeMap::new();
        let mut folders = BTreeSet::new();
        for entry in entries {
            let path = normalize_path(&entry.path);
            match entry.kind {
                FileKind::Folder => {
                    folders.insert(path);
                }
                FileKind::File => {
                    add_parents(&mut folders, &path);
                    files.insert(path.clone(), TFile::new(&path, entry.stat.unwrap_or_default()));
                }
            }
        }
        let count = files.len();
        self.contents
            .borrow_mut()
            .retain(|path, (mtime, _)| files.get(path).is_some_and(|f| f.stat.mtime == *mtime));
        *self.files.borrow_mut() = files;
        *self.folders.borrow_mut() = folders;
        tracing::debug!(files = count, "Vault index loaded");
        Ok(count)
    }

    /// Every file.
    pub fn get_files(&self) -> Vec<TFile> {
        self.files.borrow().values().cloned().collect()
    }

    /// Every markdown file.
    pub fn get_markdown_files(&self) -> Vec<TFile> {
        self.files.borrow().values().filter(|f| f.is_markdown()).cloned().collect()
    }

    /// Root, every folder, then every file.
    pub fn get_all_loaded_files(&self) -> Vec<AbstractFile> {
        let mut out = vec![AbstractFile::Folder(self.get_root())];
        let folders: Vec<String> = self.folders.borrow().iter().cloned().collect();
        out.extend(folders.iter().filter_map(|p| self.get_folder(p)).map(AbstractFile::Folder));
        out.extend(self.get_files().into_iter().map(AbstractFile::File));
        out
    }

    pub fn get_file(&self, path: &str) -> Option<TFile> {
        self.files.borrow().get(&normalize_path(path)).cloned()
    }

    /// Folder with its direct children.
    pub fn get_folder(&self, path: &str) -> Option<TFolder> {
        let path = normalize_path(path);
        if path != "/" && !self.folders.borrow().contains(&path) {
            return None;
        }
        let mut children: Vec<String> = self
            .folders
            .borrow()
            .iter()
            .filter(|f| parent_path(f) == path)
            .cloned()
            .collect();
        children.extend(self.files.borrow().keys().filter(|f| parent_path(f) == path).cloned());
        Some(TFolder::new(&path, children))
    }

    pub fn get_root(&self) -> TFolder {
        self.get_folder("/").unwrap_or_else(|| TFolder::new("/", Vec::new()))
    }

    pub fn get_abstract_file_by_path(&self, path: &str) -> Option<AbstractFile> {
        if let Some(file) = self.get_file(path) {
            return Some(AbstractFile::File(file));
        }
        self.get_folder(path).map(AbstractFile::Folder)
    }

    pub fn exists(&self, path: &str) -> bool {
        let path = normalize_path(path);
        path == "/" || self.files.borrow().contains_key(&path) || self.folders.borrow().contains(&path)
    }

    fn require_file(&self, path: &str) -> ApiResult<TFile> {
        let normalized = normalize_path(path);
        if let Some(file) = self.files.borrow().get(&normalized) {
            return Ok(file.clone());
        }
        if self.folders.borrow().contains(&normalized) {
            return Err(ApiError::NotAFile(normalized));
        }
        Err(ApiError::FileNotFound(normalized))
    }

    /// Read a file from the backend.
    pub async fn read(&self, path: &str) -> ApiResult<String> {
        let file = self.require_file(path)?;
        let text = self.client.read_note(&file.path).await?;
        self.contents.borrow_mut().insert(file.path.clone(), (file.stat.mtime, text.clone()));
        Ok(text)
    }

    /// Serve the cached text when it is as new as the index entry.
    pub async fn cached_read(&self, path: &str) -> ApiResult<String> {
        let file = self.require_file(path)?;
        let cached = self
            .contents
            .borrow()
            .get(&file.path)
            .filter(|(mtime, _)| *mtime == file.stat.mtime)
            .map(|(_, text)| text.clone());
        match cached {
            Some(text) => Ok(text),
            None => self.read(&file.path).await,
        }
    }

    /// Whether `cached_read` would be served without a backend call.
    pub fn is_cached(&self, path: &str) -> bool {
        let Some(file) = self.get_file(path) else { return false };
        self.contents.borrow().get(&file.path).is_some_and(|(mtime, _)| *mtime == file.stat.mtime)
    }

    /// Last text read or written for a file, without touching the backend.
    pub fn peek(&self, path: &str) -> Option<String> {
        self.contents.borrow().get(&normalize_path(path)).map(|(_, text)| text.clone())
    }

    /// Create a new file.
    pub async fn create(&self, path: &str, content: &str) -> ApiResult<TFile> {
        let path = normalize_path(path);
        if self.exists(&path) {
            return Err(ApiError::AlreadyExists(path));
        }
        let stat = self.client.create_note(&path, content).await?;
        let file = TFile::new(&path, stat);
        self.insert(&file, content);
        self.events.trigger(&VaultEvent::Create(AbstractFile::File(file.clone())));
        Ok(file)
    }

    /// Create a folder, including missing parents.
    pub async fn create_folder(&self, path: &str) -> ApiResult<TFolder> {
        let path = normalize_path(path);
        if self.exists(&path) {
            return Err(ApiError::AlreadyExists(path));
        }
        self.client.create_folder(&path).await?;
        {
            let mut folders = self.folders.borrow_mut();
            add_parents(&mut folders, &path);
            folders.insert(path.clone());
        }
        let folder = TFolder::new(&path, Vec::new());
        self.events.trigger(&VaultEvent::Create(AbstractFile::Folder(folder.clone())));
        Ok(folder)
    }

    /// Replace a file's text.
    pub async fn modify(&self, path: &str, content: &str) -> ApiResult<TFile> {
        let existing = self.require_file(path)?;
        let stat = self.client.write_note(&existing.path, content).await?;
        let file = TFile::new(&existing.path, stat);
        self.insert(&file, content);
        self.events.trigger(&VaultEvent::Modify(file.clone()));
        Ok(file)
    }

    /// Append text to a file.
    pub async fn append(&self, path: &str, text: &str) -> ApiResult<TFile> {
        let current = self.read(path).await?;
        self.modify(path, &format!("{}{}", current, text)).await
    }

    /// Delete a file or folder.
    pub async fn delete(&self, path: &str) -> ApiResult<()> {
        let path = normalize_path(path);
        let Some(target) = self.get_abstract_file_by_path(&path) else {
            return Err(ApiError::FileNotFound(path));
        };
        self.client.delete_path(&path).await?;
        let prefix = format!("{}/", path);
        self.files.borrow_mut().retain(|p, _| p != &path && !p.starts_with(&prefix));
        self.folders.borrow_mut().retain(|p| p != &path && !p.starts_with(&prefix));
        self.contents.borrow_mut().retain(|p, _| p != &path && !p.starts_with(&prefix));
        self.events.trigger(&VaultEvent::Delete(target));
        Ok(())
    }

    /// Move a file.
    pub async fn rename(&self, path: &str, new_path: &str) -> ApiResult<TFile> {
        let existing = self.require_file(path)?;
        let new_path = normalize_path(new_path);
        if self.exists(&new_path) {
            return Err(ApiError::AlreadyExists(new_path));
        }
        let stat = self.client.rename_path(&existing.path, &new_path).await?;
        let file = TFile::new(&new_path, stat);
        self.files.borrow_mut().remove(&existing.path);
        let cached = self.contents.borrow_mut().remove(&existing.path);
        {
            let mut folders = self.folders.borrow_mut();
            add_parents(&mut folders, &file.path);
        }
        self.files.borrow_mut().insert(file.path.clone(), file.clone());
        if let Some((_, text)) = cached {
            self.contents.borrow_mut().insert(file.path.clone(), (file.stat.mtime, text));
        }
        self.events.trigger(&VaultEvent::Rename {
            file: AbstractFile::File(file.clone()),
            old_path: existing.path,
        });
        Ok(file)
    }

    fn insert(&self, file: &TFile, content: &str) {
        {
            let mut folders = self.folders.borrow_mut();
            add_parents(&mut folders, &file.path);
        }
        self.files.borrow_mut().insert(file.path.clone(), file.clone());
        self.contents
            .borrow_mut()
            .insert(file.path.clone(), (file.stat.mtime, content.to_string()));
    }
}

fn add_parents(folders: &mut BTreeSet<String>, path: &str) {
    let mut parent = parent_path(path);
    while parent != "/" {
        let next = parent_path(&parent);
        folders.insert(parent);
        parent = next;
    }
}
