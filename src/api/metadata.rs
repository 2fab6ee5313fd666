//! Metadata cache facade.
//!
//! Entries are fetched lazily from the backend's `get_file_cache` and kept
//! until the file changes. Plugins only ever read from it.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Value};

use super::events::{Event, EventRef, Events};
use super::file::{normalize_path, parent_path, AbstractFile, TFile};
use super::vault::Vault;
use super::ApiResult;
use crate::backend::markdown::LinkCache;
use crate::backend::{BackendClient, CachedMetadata};

/// Events emitted by the metadata cache.
#[derive(Debug, Clone)]
pub enum MetadataEvent {
    /// A file's entry was (re)computed.
    Changed { file: TFile, data: String, cache: CachedMetadata },
    /// A file's entry was dropped because the file was deleted.
    Deleted { file: TFile },
    /// Every markdown file has an entry.
    Resolved,
    Custom { name: String, args: Value },
}

impl Event for MetadataEvent {
    fn name(&self) -> &str {
        match self {
            Self::Changed { .. } => "changed",
            Self::Deleted { .. } => "deleted",
            Self::Resolved => "resolved",
            Self::Custom { name, .. } => name,
        }
    }

    fn args(&self) -> Value {
        match self {
            Self::Changed { file, data, cache } => {
                json!([AbstractFile::File(file.clone()), data, cache])
            }
            Self::Deleted { file } => json!([AbstractFile::File(file.clone())]),
            Self::Resolved => json!([]),
            Self::Custom { args, .. } => args.clone(),
        }
    }
}

/// Link counts keyed by source path, then by target path.
pub type LinkTable = BTreeMap<String, BTreeMap<String, u32>>;

/// The `app.metadataCache` facade.
#[derive(Debug)]
pub struct MetadataCache {
    client: BackendClient,
    entries: RefCell<HashMap<String, CachedMetadata>>,
    events: Events<MetadataEvent>,
}

impl MetadataCache {
    pub fn new(client: BackendClient) -> Self {
        Self { client, entries: RefCell::new(HashMap::new()), events: Events::new("metadataCache") }
    }

    pub fn events(&self) -> &Events<MetadataEvent> {
        &self.events
    }

    pub fn on(&self, name: &str, handler: impl Fn(&MetadataEvent) + 'static) -> EventRef {
        self.events.on(name, handler)
    }

    /// Cached metadata of a file, `None` when not (yet) computed.
    pub fn get_file_cache(&self, path: &str) -> Option<CachedMetadata> {
        self.entries.borrow().get(&normalize_path(path)).cloned()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute the entry for one file and fire `changed`.
    pub async fn refresh(&self, file: &TFile, data: &str) -> ApiResult<Option<CachedMetadata>> {
        let Some(cache) = self.client.file_cache(&file.path).await? else {
            self.entries.borrow_mut().remove(&file.path);
            return Ok(None);
        };
        self.entries.borrow_mut().insert(file.path.clone(), cache.clone());
        self.events.trigger(&MetadataEvent::Changed {
            file: file.clone(),
            data: data.to_string(),
            cache: cache.clone(),
        });
        Ok(Some(cache))
    }

    /// Compute every markdown file that has no entry, then fire `resolved`.
    pub async fn resolve_all(&self, vault: &Vault) -> ApiResult<usize> {
        let mut computed = 0;
        for file in vault.get_markdown_files() {
            if self.entries.borrow().contains_key(&file.path) {
                continue;
            }
            match self.client.file_cache(&file.path).await {
                Ok(Some(cache)) => {
                    self.entries.borrow_mut().insert(file.path.clone(), cache);
                    computed += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "Could not compute file cache");
                }
            }
        }
        self.events.trigger(&MetadataEvent::Resolved);
        Ok(computed)
    }

    /// Drop an entry after its file was deleted.
    pub fn forget(&self, file: &TFile) {
        if self.entries.borrow_mut().remove(&file.path).is_some() {
            self.events.trigger(&MetadataEvent::Deleted { file: file.clone() });
        }
    }

    /// Move an entry after its file was renamed.
    pub fn rename(&self, old_path: &str, new_path: &str) {
        let mut entries = self.entries.borrow_mut();
        if let Some(entry) = entries.remove(old_path) {
            entries.insert(new_path.to_string(), entry);
        }
    }

    /// Resolve a link text as seen from `source_path`.
    ///
    /// Tries the exact path, then with `.md` appended, then the closest file
    /// with a matching name (same folder first, then shortest path).
    pub fn get_first_link_path_dest(&self, vault: &Vault, link: &str, source_path: &str) -> Option<TFile> {
        let target = link.split('#').next().unwrap_or_default().trim();
        if target.is_empty() {
            return vault.get_file(source_path);
        }
        for candidate in [target.to_string(), format!("{}.md", target)] {
            if let Some(file) = vault.get_file(&candidate) {
                return Some(file);
            }
        }

        let wanted = target.to_lowercase();
        let wanted_md = format!("{}.md", wanted);
        let source_dir = parent_path(source_path);
        let mut matches: Vec<TFile> = vault
            .get_files()
            .into_iter()
            .filter(|f| {
                let path = f.path.to_lowercase();
                [&wanted, &wanted_md]
                    .iter()
                    .any(|w| path == **w || path.ends_with(&format!("/{}", w)))
            })
            .collect();
        matches.sort_by_key(|f| (f.parent_path() != source_dir, f.path.len(), f.path.clone()));
        matches.into_iter().next()
    }

    /// Link counts from every cached source to resolved and unresolved targets.
    pub fn link_tables(&self, vault: &Vault) -> (LinkTable, LinkTable) {
        let mut resolved = LinkTable::new();
        let mut unresolved = LinkTable::new();
        let entries: Vec<(String, Vec<LinkCache>)> = self
            .entries
            .borrow()
            .iter()
            .map(|(path, cache)| (path.clone(), cache.links.iter().chain(&cache.embeds).cloned().collect()))
            .collect();
        for (source, links) in entries {
            let resolved_row = resolved.entry(source.clone()).or_default();
            let mut unresolved_row = BTreeMap::new();
            for link in links {
                match self.get_first_link_path_dest(vault, &link.link, &source) {
                    Some(dest) => *resolved_row.entry(dest.path).or_insert(0) += 1,
                    None => *unresolved_row.entry(link.path().to_string()).or_insert(0) += 1,
                }
            }
            unresolved.insert(source, unresolved_row);
        }
        (resolved, unresolved)
    }

    /// Links pointing at `path`, keyed by source file.
    pub fn get_backlinks_for_file(&self, vault: &Vault, path: &str) -> BTreeMap<String, Vec<LinkCache>> {
        let path = normalize_path(path);
        let entries: Vec<(String, Vec<LinkCache>)> = self
            .entries
            .borrow()
            .iter()
            .map(|(source, cache)| (source.clone(), cache.links.iter().chain(&cache.embeds).cloned().collect()))
            .collect();
        let mut out = BTreeMap::new();
        for (source, links) in entries {
            let hits: Vec<LinkCache> = links
                .into_iter()
                .filter(|l| {
                    self.get_first_link_path_dest(vault, &l.link, &source).is_some_and(|d| d.path == path)
                })
                .collect();
            if !hits.is_empty() {
                out.insert(source, hits);
            }
        }
        out
    }
}
