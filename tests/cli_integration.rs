//! CLI Integration Tests
//!
//! Runs the binary against a temporary vault.

use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

const HELLO_MAIN: &str = r#"
const { Plugin, Notice } = require('obsidian');
module.exports = class extends Plugin {
    onload() {
        this.addCommand({ id: 'greet', name: 'Greet the user', callback: () => new Notice('Hello from plugin') });
    }
};
"#;

const BROKEN_MAIN: &str = "throw new Error('broken on purpose');";

fn write_plugin(vault: &TempDir, id: &str, name: &str, main: &str) {
    let dir = vault.child(format!(".obsidian/plugins/{id}"));
    dir.child("manifest.json")
        .write_str(&format!(r#"{{"id": "{id}", "name": "{name}", "version": "1.0.0", "minAppVersion": "0.15.0"}}"#))
        .unwrap();
    dir.child("main.js").write_str(main).unwrap();
}

fn set_enabled(vault: &TempDir, ids: &[&str]) {
    let list = serde_json::to_string(ids).unwrap();
    vault.child(".obsidian/community-plugins.json").write_str(&list).unwrap();
}

/// A vault with one enabled working plugin and one disabled plugin.
fn sample_vault() -> TempDir {
    let vault = TempDir::new().unwrap();
    write_plugin(&vault, "hello", "Hello", HELLO_MAIN);
    write_plugin(&vault, "other", "Other", HELLO_MAIN);
    set_enabled(&vault, &["hello"]);
    vault.child("Welcome.md").write_str("# Welcome\n").unwrap();
    vault
}

/// The binary, isolated from the user's config.
fn plugbridge(vault: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("plugbridge").unwrap();
    cmd.current_dir(vault.path())
        .env("HOME", vault.path())
        .env("XDG_CONFIG_HOME", vault.path().join(".config"))
        .env_remove("PLUGBRIDGE_VAULT")
        .env_remove("RUST_LOG");
    cmd
}

// ============================================================================
// Help & Version Tests
// ============================================================================

#[test]
fn test_help_flag() {
    let vault = TempDir::new().unwrap();
    plugbridge(&vault)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Obsidian-style community plugins"));
}

#[test]
fn test_version_flag() {
    let vault = TempDir::new().unwrap();
    plugbridge(&vault)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_subcommand_help() {
    let vault = TempDir::new().unwrap();
    plugbridge(&vault)
        .args(["exec", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run a command by id"));
}

// ============================================================================
// List Command Tests
// ============================================================================

#[test]
fn test_list_shows_state() {
    let vault = sample_vault();
    plugbridge(&vault)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("[x] hello 1.0.0 - Hello (loaded)"))
        .stdout(predicate::str::contains("[ ] other 1.0.0 - Other (disabled)"))
        .stdout(predicate::str::contains("Total: 2 plugins"));
}

#[test]
fn test_list_with_vault_flag() {
    let vault = sample_vault();
    let elsewhere = TempDir::new().unwrap();
    plugbridge(&elsewhere)
        .arg("--vault")
        .arg(vault.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));
}

#[test]
fn test_list_json() {
    let vault = sample_vault();
    let output = plugbridge(&vault).args(["list", "--format", "json"]).output().unwrap();
    assert!(output.status.success());

    let plugins: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let plugins = plugins.as_array().unwrap();
    assert_eq!(plugins.len(), 2);
    let hello = plugins.iter().find(|p| p["manifest"]["id"] == "hello").unwrap();
    assert_eq!(hello["enabled"], true);
}

#[test]
fn test_list_reports_failed_plugin() {
    let vault = sample_vault();
    write_plugin(&vault, "broken", "Broken", BROKEN_MAIN);
    set_enabled(&vault, &["hello", "broken"]);
    plugbridge(&vault)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("[x] broken 1.0.0 - Broken (failed)"))
        .stdout(predicate::str::contains("(loaded)"));
}

#[test]
fn test_list_empty_vault() {
    let vault = TempDir::new().unwrap();
    plugbridge(&vault).arg("list").assert().success().stdout(predicate::str::contains("Total: 0 plugins"));
}

#[test]
fn test_missing_vault_fails() {
    let vault = TempDir::new().unwrap();
    plugbridge(&vault)
        .args(["--vault", "/definitely/not/a/vault", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Vault directory not found"));
}

// ============================================================================
// Command Tests
// ============================================================================

#[test]
fn test_commands_lists_enabled_plugin_commands() {
    let vault = sample_vault();
    plugbridge(&vault)
        .arg("commands")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello:greet  Greet the user"))
        .stdout(predicate::str::contains("other:greet").not())
        .stdout(predicate::str::contains("Total: 1 commands"));
}

#[test]
fn test_commands_json() {
    let vault = sample_vault();
    let output = plugbridge(&vault).args(["commands", "-f", "json"]).output().unwrap();
    assert!(output.status.success());

    let commands: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(commands[0]["id"], "hello:greet");
    assert_eq!(commands[0]["pluginId"], "hello");
}

#[test]
fn test_exec_runs_command() {
    let vault = sample_vault();
    plugbridge(&vault)
        .args(["exec", "hello:greet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello from plugin"));
}

#[test]
fn test_exec_unknown_command() {
    let vault = sample_vault();
    plugbridge(&vault)
        .args(["exec", "hello:missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No command with id 'hello:missing'"));
}

// ============================================================================
// Enable / Disable Tests
// ============================================================================

#[test]
fn test_enable_persists_flag() {
    let vault = sample_vault();
    plugbridge(&vault).args(["enable", "other"]).assert().success().stdout(predicate::str::contains("Enabled other"));

    let list = std::fs::read_to_string(vault.path().join(".obsidian/community-plugins.json")).unwrap();
    assert!(list.contains("\"other\""));

    plugbridge(&vault).arg("commands").assert().success().stdout(predicate::str::contains("other:greet"));
}

#[test]
fn test_disable_persists_flag() {
    let vault = sample_vault();
    plugbridge(&vault).args(["disable", "hello"]).assert().success().stdout(predicate::str::contains("Disabled hello"));

    let list = std::fs::read_to_string(vault.path().join(".obsidian/community-plugins.json")).unwrap();
    assert!(!list.contains("\"hello\""));
}

#[test]
fn test_enable_unknown_plugin() {
    let vault = sample_vault();
    plugbridge(&vault).args(["enable", "ghost"]).assert().failure().stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_enable_broken_plugin_reports_failure() {
    let vault = sample_vault();
    write_plugin(&vault, "broken", "Broken", BROKEN_MAIN);
    plugbridge(&vault).args(["enable", "broken"]).assert().failure().stderr(predicate::str::contains("broken"));
}

// ============================================================================
// Settings & Notices Tests
// ============================================================================

#[test]
fn test_settings_without_tab() {
    let vault = sample_vault();
    plugbridge(&vault)
        .args(["settings", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not open settings of 'hello'"));
}

#[test]
fn test_notices_empty() {
    let vault = sample_vault();
    plugbridge(&vault).arg("notices").assert().success().stdout(predicate::str::contains("No notices"));
}

#[test]
fn test_notices_include_load_failures() {
    let vault = sample_vault();
    write_plugin(&vault, "broken", "Broken", BROKEN_MAIN);
    set_enabled(&vault, &["broken"]);
    plugbridge(&vault)
        .arg("notices")
        .assert()
        .success()
        .stdout(predicate::str::contains("[broken] Failed to load plugin \"Broken\""));
}

// ============================================================================
// Completions Tests
// ============================================================================

#[test]
fn test_completions_bash() {
    let vault = TempDir::new().unwrap();
    plugbridge(&vault)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("plugbridge"));
}

#[test]
fn test_completions_invalid_shell() {
    let vault = TempDir::new().unwrap();
    plugbridge(&vault).args(["completions", "invalid"]).assert().failure();
}
