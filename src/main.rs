//! plugbridge - run Obsidian-style community plugins from the terminal.
//!
//! Loads the plugins enabled in a vault and exposes their commands through
//! a CLI and a fuzzy command palette.

use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plugbridge::config::Config;
use plugbridge::palette::run_palette;
use plugbridge::{App, BackendClient, FsBackend, LoaderOptions, PluginLoader, PluginState, APP_NAME};

/// Run Obsidian-style community plugins from the terminal
#[derive(Parser)]
#[command(name = "plugbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,

    /// Vault directory (defaults to the configured vault, then the current directory)
    #[arg(long, global = true, env = "PLUGBRIDGE_VAULT")]
    vault: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed plugins with their enabled and loaded state
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Enable a plugin and load it
    Enable {
        /// Plugin id
        id: String,
    },

    /// Disable a plugin and unload it
    Disable {
        /// Plugin id
        id: String,
    },

    /// List the commands registered by enabled plugins
    Commands {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a command by id
    Exec {
        /// Command id, e.g. `my-plugin:do-thing`
        id: String,
    },

    /// Render a plugin's settings tab
    Settings {
        /// Plugin id
        id: String,
    },

    /// Show notices raised while loading plugins
    Notices,

    /// Open the command palette (default)
    Palette,

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Some(Commands::Config { path, init }) => cmd_config(path, init),
        Some(Commands::Completions { shell }) => {
            cmd_completions(shell);
            Ok(())
        }
        command => {
            let config = Config::load()?;
            let vault = resolve_vault(cli.vault, &config)?;
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            runtime.block_on(run(command.unwrap_or(Commands::Palette), &vault, &config))
        }
    }
}

fn resolve_vault(flag: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    let vault = match flag.or_else(|| config.vault_path()) {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    if !vault.is_dir() {
        bail!("Vault directory not found: {}", vault.display());
    }
    Ok(vault)
}

fn build_loader(vault: &Path, config: &Config) -> Result<PluginLoader> {
    let backend = FsBackend::new(vault).with_config_dir(config.vault.config_dir.clone());
    let client = BackendClient::new(Rc::new(backend), config.loader.backend_timeout());
    let name = vault.file_name().and_then(|n| n.to_str()).unwrap_or("vault");
    let app = App::new(client, name, &config.vault.config_dir);
    Ok(PluginLoader::new(app, LoaderOptions::from(&config.loader))?)
}

/// Load enabled plugins, or only discover them when autoload is off.
async fn start(loader: &PluginLoader, config: &Config) -> Result<()> {
    if config.loader.autoload {
        let summary = loader.init().await?;
        tracing::debug!(?summary, "Startup complete");
    } else {
        loader.app().load().await?;
        loader.discover_plugins().await?;
        loader.app().workspace.set_layout_ready();
    }
    Ok(())
}

async fn run(command: Commands, vault: &Path, config: &Config) -> Result<()> {
    let loader = build_loader(vault, config)?;
    start(&loader, config).await?;
    let result = match command {
        Commands::List { format } => cmd_list(&loader, &format),
        Commands::Enable { id } => cmd_toggle(&loader, &id, true).await,
        Commands::Disable { id } => cmd_toggle(&loader, &id, false).await,
        Commands::Commands { format } => cmd_commands(&loader, &format),
        Commands::Exec { id } => cmd_exec(&loader, &id).await,
        Commands::Settings { id } => cmd_settings(&loader, &id).await,
        Commands::Notices => cmd_notices(&loader),
        _ => run_palette(&loader, &config.palette).await,
    };
    loader.shutdown().await;
    result
}

/// List plugins.
fn cmd_list(loader: &PluginLoader, format: &str) -> Result<()> {
    let plugins = loader.plugins();

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&plugins)?;
            println!("{json}");
        }
        _ => {
            for info in &plugins {
                let mark = if info.enabled { "[x]" } else { "[ ]" };
                let state = match info.state {
                    PluginState::Loaded => "loaded",
                    PluginState::Unloaded if info.enabled => "failed",
                    _ if info.enabled => "not loaded",
                    _ => "disabled",
                };
                println!("{} {} {} - {} ({})", mark, info.manifest.id, info.manifest.version, info.manifest.name, state);
            }
            println!("\nTotal: {} plugins", plugins.len());
        }
    }

    Ok(())
}

async fn cmd_toggle(loader: &PluginLoader, id: &str, enabled: bool) -> Result<()> {
    loader.toggle_plugin(id, enabled).await?;
    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!("{} {}", verb, id);
    Ok(())
}

/// List registered commands.
fn cmd_commands(loader: &PluginLoader, format: &str) -> Result<()> {
    let commands = loader.commands();

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&commands)?;
            println!("{json}");
        }
        _ => {
            for cmd in &commands {
                let hotkeys: Vec<String> = cmd.hotkeys.iter().map(ToString::to_string).collect();
                if hotkeys.is_empty() {
                    println!("{}  {}", cmd.id, cmd.name);
                } else {
                    println!("{}  {}  [{}]", cmd.id, cmd.name, hotkeys.join(", "));
                }
            }
            println!("\nTotal: {} commands", commands.len());
        }
    }

    Ok(())
}

/// Run a command by id.
async fn cmd_exec(loader: &PluginLoader, id: &str) -> Result<()> {
    if loader.app().registry.get_command(id).is_none() {
        bail!("No command with id '{id}'");
    }
    let before = loader.app().notices.len();
    if !loader.execute_command(id).await {
        bail!("Command '{id}' is not available or failed");
    }
    for notice in loader.app().notices.all().into_iter().skip(before) {
        println!("{}", notice.message);
    }
    Ok(())
}

/// Render a settings tab.
async fn cmd_settings(loader: &PluginLoader, id: &str) -> Result<()> {
    if !loader.is_loaded(id) {
        bail!("Plugin '{id}' is not loaded");
    }
    let outline = loader.open_setting_tab(id).await.with_context(|| format!("Could not open settings of '{id}'"))?;
    println!("{outline}");
    Ok(())
}

/// Show notices.
fn cmd_notices(loader: &PluginLoader) -> Result<()> {
    let notices = loader.app().notices.all();
    for notice in &notices {
        let time = notice.created_at.format("%H:%M:%S");
        match &notice.plugin_id {
            Some(plugin) => println!("{} [{}] {}", time, plugin, notice.message),
            None => println!("{} {}", time, notice.message),
        }
    }
    if notices.is_empty() {
        println!("No notices");
    }
    Ok(())
}

/// Show or initialize configuration.
fn cmd_config(show_path: bool, init: bool) -> Result<()> {
    if init {
        let path = Config::config_path().context("Could not determine config directory")?;
        if path.exists() {
            bail!("Config file already exists: {}", path.display());
        }
        Config::default().save_to(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    if show_path {
        match Config::locate().or_else(Config::config_path) {
            Some(path) => println!("{}", path.display()),
            None => bail!("Could not determine config directory"),
        }
        return Ok(());
    }

    let config = Config::load()?;
    let toml = toml::to_string_pretty(&config)?;
    println!("{toml}");

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}
