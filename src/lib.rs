#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::future_not_send)]
#![allow(clippy::significant_drop_in_scrutinee)]

//! # plugbridge
//!
//! Compatibility runtime for Obsidian-style community plugins.
//!
//! plugbridge discovers the plugins installed in a vault, runs their
//! JavaScript in an embedded QuickJS engine against a compatible `obsidian`
//! API, and exposes what they register (commands, setting tabs, views,
//! post-processors) through a registry, a CLI and a fuzzy command palette.
//!
//! ## Layers
//!
//! - [`backend`]: async storage boundary (`FsBackend` for a vault on disk,
//!   `MemoryBackend` for tests)
//! - [`api`]: the `App` facade: vault, workspace, metadata cache, notices
//! - [`registry`]: commands and other plugin contributions
//! - [`sandbox`]: the script engine and the JS side of the API
//! - [`loader`]: discovery and the plugin lifecycle
//! - [`palette`]: terminal command palette
//!
//! ## Quick Start
//!
//! ```bash
//! # List plugins in a vault
//! plugbridge --vault ~/notes list
//!
//! # Open the command palette
//! plugbridge --vault ~/notes
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod backend;
pub mod config;
pub mod loader;
pub mod palette;
pub mod registry;
pub mod sandbox;

pub use api::{App, API_VERSION};
pub use backend::{Backend, BackendClient, FsBackend, MemoryBackend};
pub use config::Config;
pub use loader::{
    InitSummary, LoadErrorKind, LoadOutcome, LoaderOptions, PluginError, PluginInfo, PluginLoader,
    PluginManifest, PluginResult, PluginState,
};
pub use palette::CommandPalette;
pub use registry::{CommandInfo, PluginRegistry};
pub use sandbox::{Sandbox, SandboxError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Binary name.
pub const APP_NAME: &str = "plugbridge";
