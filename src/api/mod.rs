//! Compatibility API surface.
//!
//! The state behind the objects plugins see as `app`, `app.vault`,
//! `app.workspace` and `app.metadataCache`, plus the notice log, injected
//! stylesheets, DOM listener table and per-plugin contribution ledgers.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`) and shared through
//! one long-lived [`App`]. The class shells plugins extend live in the
//! script prelude and call into these types through the sandbox bridge.

mod app;
mod dom;
mod error;
pub mod events;
mod file;
mod metadata;
mod notice;
mod plugin;
mod styles;
mod vault;
mod workspace;

pub use app::{App, AppInfo, API_VERSION};
pub use dom::{DomListener, DomListeners};
pub use error::{ApiError, ApiResult};
pub use events::{Event, EventRef, Events};
pub use file::{file_name, normalize_path, parent_path, AbstractFile, TFile, TFolder};
pub use metadata::{LinkTable, MetadataCache, MetadataEvent};
pub use notice::{Notice, NoticeCenter, DEFAULT_NOTICE_TIMEOUT_MS};
pub use plugin::{Contributions, Ledger};
pub use styles::{plugin_style_tag, StyleSheet, StyleSheets};
pub use vault::{Vault, VaultEvent};
pub use workspace::{Leaf, Workspace, WorkspaceEvent, EMPTY_VIEW, MARKDOWN_VIEW};
