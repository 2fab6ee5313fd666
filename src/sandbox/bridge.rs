//! Host side of the script bridge.
//!
//! Builds the `host` object handed to the prelude and implements the
//! operations behind `host.call` (synchronous) and `host.request`
//! (performed later by the pump). Arguments and results are JSON.

use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use rquickjs::{Ctx, Function, Object};
use serde::Serialize;
use serde_json::{json, Value};

use super::{CommandHandle, QueuedEvent, Request, Sandbox, SandboxError, SandboxInner};
use crate::api::{normalize_path, AbstractFile, ApiResult, App, Event, EventRef, Events, Leaf};
use crate::registry::{qualified_command_id, Command, CommandAction, Hotkey, RegistryError};

type OpResult = Result<Value, String>;

pub(super) fn host_object<'js>(ctx: &Ctx<'js>, weak: &Weak<SandboxInner>) -> rquickjs::Result<Object<'js>> {
    let host = Object::new(ctx.clone())?;

    let inner = weak.clone();
    let call = Function::new(ctx.clone(), move |op: String, args: String| -> String {
        match inner.upgrade() {
            Some(inner) => Sandbox::from_inner(inner).host_call(&op, &args),
            None => json!({"ok": false, "error": "script engine shut down", "events": []}).to_string(),
        }
    })?;
    host.set("call", call)?;

    let inner = weak.clone();
    let request = Function::new(ctx.clone(), move |op: String, args: String| -> u32 {
        let Some(inner) = inner.upgrade() else { return 0 };
        let args = serde_json::from_str(&args).unwrap_or(Value::Null);
        Sandbox::from_inner(inner).queue_request(op, args)
    })?;
    host.set("request", request)?;

    let log = Function::new(ctx.clone(), |level: String, plugin: String, message: String| {
        forward_console(&level, &plugin, &message);
    })?;
    host.set("log", log)?;

    Ok(host)
}

fn forward_console(level: &str, plugin: &str, message: &str) {
    let plugin = if plugin.is_empty() { "-" } else { plugin };
    match level {
        "error" => tracing::error!(target: "plugbridge::console", plugin = %plugin, "{}", message),
        "warn" => tracing::warn!(target: "plugbridge::console", plugin = %plugin, "{}", message),
        "debug" => tracing::debug!(target: "plugbridge::console", plugin = %plugin, "{}", message),
        _ => tracing::info!(target: "plugbridge::console", plugin = %plugin, "{}", message),
    }
}

fn err(e: impl fmt::Display) -> String {
    e.to_string()
}

fn to_value<T: Serialize>(value: T) -> OpResult {
    serde_json::to_value(value).map_err(err)
}

fn api<T: Serialize>(result: ApiResult<T>) -> OpResult {
    result.map_err(err).and_then(to_value)
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| format!("missing string argument '{}'", key))
}

fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn u32_arg(args: &Value, key: &str) -> Result<u32, String> {
    args.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| format!("missing numeric argument '{}'", key))
}

fn bool_arg(args: &Value, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn plugin_arg(args: &Value) -> Option<&str> {
    opt_str(args, "plugin").filter(|p| !p.is_empty())
}

fn leaf_payload(leaf: Option<Leaf>) -> Value {
    leaf.as_ref().map_or(Value::Null, Leaf::to_payload)
}

fn leaves_payload(leaves: Vec<Leaf>) -> Value {
    Value::Array(leaves.iter().map(Leaf::to_payload).collect())
}

fn parse_yaml(text: &str) -> OpResult {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str::<Value>(text).map_err(err)
}

/// Queue an emitter's events for a script subscriber.
fn subscribe<E: Event + 'static>(events: &Events<E>, sandbox: Weak<SandboxInner>, name: &str, handle: u32) -> EventRef {
    events.on(name, move |event: &E| {
        if let Some(inner) = sandbox.upgrade() {
            inner.queued.borrow_mut().push(QueuedEvent { handle, args: event.args() });
        }
    })
}

fn run_command(sandbox: &Weak<SandboxInner>, id: &str, handle: u32, args: Value) -> Result<Value, RegistryError> {
    let inner = sandbox.upgrade().ok_or_else(|| RegistryError::Callback {
        id: id.to_string(),
        message: "script engine shut down".to_string(),
    })?;
    Sandbox::from_inner(inner).invoke(handle, args).map_err(|e| match e {
        SandboxError::Reentrant => RegistryError::Busy(id.to_string()),
        other => RegistryError::Callback { id: id.to_string(), message: other.to_string() },
    })
}

impl Sandbox {
    /// Entry point of `host.call`: run one operation and wrap the result,
    /// together with any events it raised, in an envelope.
    fn host_call(&self, op: &str, args: &str) -> String {
        let result = serde_json::from_str::<Value>(args).map_err(err).and_then(|args| self.call_op(op, &args));
        let events = self.take_events();
        let envelope = match result {
            Ok(value) => json!({"ok": true, "value": value, "events": events}),
            Err(error) => {
                tracing::debug!(op, error = %error, "Host call failed");
                json!({"ok": false, "error": error, "events": events})
            }
        };
        envelope.to_string()
    }

    fn call_op(&self, op: &str, args: &Value) -> OpResult {
        let app = Rc::clone(self.app());
        match op {
            "app.info" => to_value(app.info()),
            "path.normalize" => Ok(Value::String(normalize_path(str_arg(args, "path")?))),
            "yaml.parse" => parse_yaml(str_arg(args, "text")?),
            "yaml.stringify" => serde_yaml::to_string(args.get("value").unwrap_or(&Value::Null))
                .map(Value::String)
                .map_err(err),
            "notice.show" => {
                let message = opt_str(args, "message").unwrap_or_default();
                let timeout = args.get("timeout").and_then(Value::as_u64);
                Ok(json!(app.notices.show(message, timeout, plugin_arg(args))))
            }
            "notice.setMessage" => Ok(json!(app.notices.set_message(u32_arg(args, "id")?, str_arg(args, "message")?))),
            "notice.hide" => Ok(json!(app.notices.hide(u32_arg(args, "id")?))),
            "plugins.info" => Ok(self.inner.plugins.borrow().clone()),
            "hook.settle" => {
                let ticket = u32_arg(args, "ticket")?;
                let result = if bool_arg(args, "ok") {
                    Ok(())
                } else {
                    Err(opt_str(args, "error").unwrap_or("rejected").to_string())
                };
                self.inner.hooks.borrow_mut().insert(ticket, result);
                Ok(Value::Null)
            }
            op if op.starts_with("registry.") => self.registry_op(&app, op, args),
            op if op.starts_with("events.") => self.events_op(&app, op, args),
            op if op.starts_with("timers.") || op.starts_with("dom.") || op == "interval.register" => {
                self.lifecycle_op(&app, op, args)
            }
            op if op.starts_with("vault.") => vault_op(&app, op, args),
            op if op.starts_with("workspace.") => workspace_op(&app, op, args),
            op if op.starts_with("metadata.") => metadata_op(&app, op, args),
            _ => Err(format!("unknown host operation '{}'", op)),
        }
    }

    fn command_action(&self, id: &str, handle: u32, check: bool) -> CommandAction {
        let sandbox = self.downgrade();
        let id = id.to_string();
        if check {
            CommandAction::check(move |checking| {
                let value = run_command(&sandbox, &id, handle, json!([checking]))?;
                Ok(!checking || value.as_bool().unwrap_or(false))
            })
        } else {
            CommandAction::callback(move || run_command(&sandbox, &id, handle, json!([])).map(|_| ()))
        }
    }

    fn registry_op(&self, app: &App, op: &str, args: &Value) -> OpResult {
        let registry = &app.registry;
        match op {
            "registry.addCommand" => {
                let plugin = str_arg(args, "plugin")?;
                let id = qualified_command_id(plugin, str_arg(args, "id")?);
                let handle = u32_arg(args, "handle")?;
                let check = bool_arg(args, "check");
                let hotkeys: Vec<Hotkey> = match args.get("hotkeys") {
                    Some(v) if !v.is_null() => serde_json::from_value(v.clone()).map_err(err)?,
                    _ => Vec::new(),
                };
                let mut command = Command::new(&id, str_arg(args, "name")?, plugin, self.command_action(&id, handle, check))
                    .with_hotkeys(hotkeys);
                if let Some(icon) = opt_str(args, "icon") {
                    command = command.with_icon(icon);
                }
                registry.register_command(command);
                self.inner
                    .commands
                    .borrow_mut()
                    .insert(id.clone(), CommandHandle { handle, check, owner: plugin.to_string() });
                app.ledger.record(plugin, |c| c.commands.push(id.clone()));
                Ok(json!({"id": id}))
            }
            "registry.removeCommand" => {
                let plugin = str_arg(args, "plugin")?;
                let id = qualified_command_id(plugin, str_arg(args, "id")?);
                let owned = registry.get_command(&id).is_some_and(|c| c.plugin_id == plugin);
                if owned {
                    registry.unregister_command(&id);
                    self.inner.commands.borrow_mut().remove(&id);
                }
                Ok(json!(owned))
            }
            "registry.command" => {
                let id = str_arg(args, "id")?;
                let Some(info) = registry.get_command(id) else { return Ok(Value::Null) };
                let script = self.inner.commands.borrow().get(id).filter(|c| c.owner == info.plugin_id).cloned();
                match script {
                    Some(c) => Ok(json!({"id": id, "handle": c.handle, "check": c.check})),
                    // Native command: safe to run from here.
                    None => Ok(json!({"id": id, "ran": registry.execute_command(id)})),
                }
            }
            "registry.commands" => to_value(registry.get_all_commands()),
            "registry.addSettingTab" => {
                let plugin = str_arg(args, "plugin")?;
                let id = registry.add_setting_tab(plugin, opt_str(args, "name").unwrap_or(plugin), u32_arg(args, "handle")?);
                app.ledger.record(plugin, |c| c.setting_tabs.push(id));
                Ok(json!(id))
            }
            "registry.addRibbonIcon" => {
                let plugin = str_arg(args, "plugin")?;
                let id = registry.add_ribbon_icon(
                    plugin,
                    opt_str(args, "icon").unwrap_or_default(),
                    opt_str(args, "title").unwrap_or_default(),
                    u32_arg(args, "handle")?,
                );
                app.ledger.record(plugin, |c| c.ribbon_icons.push(id));
                Ok(json!(id))
            }
            "registry.addPostProcessor" => {
                let plugin = str_arg(args, "plugin")?;
                let sort_order = args.get("sortOrder").and_then(Value::as_i64).unwrap_or(0);
                let id = registry.add_post_processor(
                    plugin,
                    u32_arg(args, "handle")?,
                    i32::try_from(sort_order).unwrap_or_default(),
                    opt_str(args, "language").map(str::to_string),
                );
                app.ledger.record(plugin, |c| c.post_processors.push(id));
                Ok(json!(id))
            }
            "registry.registerView" => {
                let plugin = str_arg(args, "plugin")?;
                let view_type = str_arg(args, "type")?;
                registry.register_view(plugin, view_type, u32_arg(args, "handle")?).map_err(err)?;
                app.ledger.record(plugin, |c| c.views.push(view_type.to_string()));
                Ok(Value::Null)
            }
            "registry.viewFactory" => Ok(registry.view(str_arg(args, "type")?).map_or(Value::Null, |v| json!(v.handle))),
            "registry.addStatusBarItem" => {
                let plugin = str_arg(args, "plugin")?;
                let id = registry.add_status_bar_item(plugin, u32_arg(args, "element")?);
                app.ledger.record(plugin, |c| c.status_bar_items.push(id));
                Ok(json!(id))
            }
            "registry.addEditorExtension" => {
                let plugin = str_arg(args, "plugin")?;
                let id = registry.add_editor_extension(plugin);
                app.ledger.record(plugin, |c| c.editor_extensions.push(id));
                Ok(json!(id))
            }
            "registry.remove" => Ok(json!(registry.remove_entry(u32_arg(args, "id")?))),
            _ => Err(format!("unknown host operation '{}'", op)),
        }
    }

    fn events_op(&self, app: &App, op: &str, args: &Value) -> OpResult {
        match op {
            "events.on" => {
                let name = str_arg(args, "name")?;
                let handle = u32_arg(args, "handle")?;
                let event_ref = match str_arg(args, "source")? {
                    "vault" => subscribe(app.vault.events(), self.downgrade(), name, handle),
                    "workspace" => subscribe(app.workspace.events(), self.downgrade(), name, handle),
                    "metadataCache" => subscribe(app.metadata_cache.events(), self.downgrade(), name, handle),
                    other => return Err(format!("unknown event source '{}'", other)),
                };
                if let Some(plugin) = plugin_arg(args) {
                    app.ledger.record(plugin, |c| c.events.push(event_ref.clone()));
                }
                to_value(&event_ref)
            }
            "events.offref" => {
                let id = args.get("id").and_then(Value::as_u64).ok_or("missing numeric argument 'id'")?;
                Ok(json!(app.offref(str_arg(args, "source")?, id)))
            }
            "events.trigger" => {
                let payload = args.get("args").cloned().unwrap_or_else(|| json!([]));
                Ok(json!(app.trigger(str_arg(args, "source")?, str_arg(args, "name")?, payload)))
            }
            _ => Err(format!("unknown host operation '{}'", op)),
        }
    }

    fn lifecycle_op(&self, app: &App, op: &str, args: &Value) -> OpResult {
        match op {
            "timers.set" => {
                let millis = args.get("ms").and_then(Value::as_f64).unwrap_or(0.0).max(0.0);
                let id = self.inner.timers.set(
                    plugin_arg(args),
                    u32_arg(args, "handle")?,
                    Duration::from_millis(millis as u64),
                    bool_arg(args, "repeat"),
                    Instant::now(),
                );
                Ok(json!(id))
            }
            "timers.clear" => Ok(self.inner.timers.clear(u32_arg(args, "id")?).map_or(Value::Null, |t| json!(t.handle))),
            "interval.register" => {
                let id = u32_arg(args, "id")?;
                if let Some(plugin) = plugin_arg(args) {
                    app.ledger.record(plugin, |c| c.intervals.push(id));
                }
                Ok(Value::Null)
            }
            "dom.add" => {
                let plugin = str_arg(args, "plugin")?;
                let id = app.dom.add(plugin, u32_arg(args, "element").unwrap_or(0), str_arg(args, "type")?);
                app.ledger.record(plugin, |c| c.dom_events.push(id));
                Ok(json!(id))
            }
            "dom.remove" => Ok(json!(app.dom.remove(u32_arg(args, "id")?).is_some())),
            _ => Err(format!("unknown host operation '{}'", op)),
        }
    }
}

fn vault_op(app: &App, op: &str, args: &Value) -> OpResult {
    let vault = &app.vault;
    match op {
        "vault.files" => to_value(vault.get_files().into_iter().map(AbstractFile::File).collect::<Vec<_>>()),
        "vault.markdownFiles" => {
            to_value(vault.get_markdown_files().into_iter().map(AbstractFile::File).collect::<Vec<_>>())
        }
        "vault.allLoaded" => to_value(vault.get_all_loaded_files()),
        "vault.abstractFile" => to_value(vault.get_abstract_file_by_path(str_arg(args, "path")?)),
        "vault.root" => to_value(AbstractFile::Folder(vault.get_root())),
        "vault.exists" => Ok(json!(vault.exists(str_arg(args, "path")?))),
        "vault.peek" => Ok(vault.peek(str_arg(args, "path")?).map_or(Value::Null, Value::String)),
        _ => Err(format!("unknown host operation '{}'", op)),
    }
}

fn workspace_op(app: &App, op: &str, args: &Value) -> OpResult {
    let ws = &app.workspace;
    match op {
        "workspace.getLeaf" => Ok(ws.get_leaf(bool_arg(args, "create")).to_payload()),
        "workspace.activeLeaf" => Ok(leaf_payload(ws.active_leaf())),
        "workspace.leaf" => Ok(leaf_payload(ws.leaf(str_arg(args, "id")?))),
        "workspace.leaves" => Ok(leaves_payload(ws.leaves())),
        "workspace.leavesOfType" => Ok(leaves_payload(ws.get_leaves_of_type(str_arg(args, "type")?))),
        "workspace.setActiveLeaf" => Ok(json!(ws.set_active_leaf(str_arg(args, "id")?))),
        "workspace.activeFile" => to_value(ws.get_active_file().map(AbstractFile::File)),
        "workspace.detach" => Ok(json!(ws.detach(str_arg(args, "id")?))),
        "workspace.detachLeavesOfType" => to_value(ws.detach_leaves_of_type(str_arg(args, "type")?)),
        "workspace.layoutReady" => Ok(json!(ws.layout_ready())),
        "workspace.openFile" => {
            let path = str_arg(args, "path")?;
            let file = app.vault.get_file(path).ok_or_else(|| format!("File does not exist: {}", path))?;
            ws.open_file(str_arg(args, "leaf")?, file).map(|leaf| leaf.to_payload()).map_err(err)
        }
        "workspace.setViewState" => {
            let state = args.get("state").cloned().unwrap_or(Value::Null);
            ws.set_view_state(str_arg(args, "leaf")?, str_arg(args, "type")?, state)
                .map(|leaf| leaf.to_payload())
                .map_err(err)
        }
        "workspace.openLinkText" => {
            let link = str_arg(args, "link")?;
            let source = opt_str(args, "source").unwrap_or_default();
            let file = app
                .metadata_cache
                .get_first_link_path_dest(&app.vault, link, source)
                .ok_or_else(|| format!("Cannot resolve link: {}", link))?;
            let leaf = ws.get_leaf(bool_arg(args, "newLeaf"));
            ws.open_file(&leaf.id, file).map(|leaf| leaf.to_payload()).map_err(err)
        }
        _ => Err(format!("unknown host operation '{}'", op)),
    }
}

fn metadata_op(app: &App, op: &str, args: &Value) -> OpResult {
    let cache = &app.metadata_cache;
    match op {
        "metadata.fileCache" => to_value(cache.get_file_cache(str_arg(args, "path")?)),
        "metadata.linkpathDest" => {
            let source = opt_str(args, "source").unwrap_or_default();
            let dest = cache.get_first_link_path_dest(&app.vault, str_arg(args, "link")?, source);
            to_value(dest.map(AbstractFile::File))
        }
        "metadata.resolvedLinks" => to_value(cache.link_tables(&app.vault).0),
        "metadata.unresolvedLinks" => to_value(cache.link_tables(&app.vault).1),
        "metadata.backlinks" => to_value(cache.get_backlinks_for_file(&app.vault, str_arg(args, "path")?)),
        _ => Err(format!("unknown host operation '{}'", op)),
    }
}

/// Perform one queued request. Runs with no script code on the stack.
pub(super) async fn perform(sandbox: &Sandbox, request: &Request) -> OpResult {
    let app = Rc::clone(sandbox.app());
    let args = &request.args;
    match request.op.as_str() {
        "vault.read" => api(app.vault.read(str_arg(args, "path")?).await),
        "vault.cachedRead" => api(app.vault.cached_read(str_arg(args, "path")?).await),
        "vault.create" => {
            let data = opt_str(args, "data").unwrap_or_default();
            let file = app.vault.create(str_arg(args, "path")?, data).await.map_err(err)?;
            app.refresh_metadata(&file, data).await;
            to_value(AbstractFile::File(file))
        }
        "vault.createFolder" => api(app.vault.create_folder(str_arg(args, "path")?).await.map(AbstractFile::Folder)),
        "vault.modify" => {
            let data = opt_str(args, "data").unwrap_or_default();
            let file = app.vault.modify(str_arg(args, "path")?, data).await.map_err(err)?;
            app.refresh_metadata(&file, data).await;
            Ok(Value::Null)
        }
        "vault.append" => {
            let data = opt_str(args, "data").unwrap_or_default();
            let file = app.vault.append(str_arg(args, "path")?, data).await.map_err(err)?;
            let content = app.vault.peek(&file.path).unwrap_or_default();
            app.refresh_metadata(&file, &content).await;
            Ok(Value::Null)
        }
        "vault.delete" => api(app.vault.delete(str_arg(args, "path")?).await),
        "vault.rename" => {
            let file = app.vault.rename(str_arg(args, "path")?, str_arg(args, "newPath")?).await.map_err(err)?;
            if let Some(content) = app.vault.peek(&file.path) {
                app.refresh_metadata(&file, &content).await;
            }
            to_value(AbstractFile::File(file))
        }
        "vault.process" => process(sandbox, &app, args).await,
        "adapter.exists" => Ok(json!(app.vault.exists(str_arg(args, "path")?))),
        "adapter.read" => {
            let path = str_arg(args, "path")?;
            if app.vault.get_file(path).is_some() {
                api(app.vault.read(path).await)
            } else {
                app.client.read_note(&normalize_path(path)).await.map(Value::String).map_err(err)
            }
        }
        "adapter.write" => {
            let path = str_arg(args, "path")?;
            let data = opt_str(args, "data").unwrap_or_default();
            let file = if app.vault.get_file(path).is_some() {
                app.vault.modify(path, data).await
            } else {
                app.vault.create(path, data).await
            }
            .map_err(err)?;
            app.refresh_metadata(&file, data).await;
            Ok(Value::Null)
        }
        "data.load" => app.client.load_plugin_data(str_arg(args, "plugin")?).await.map_err(err),
        "data.save" => {
            let data = args.get("data").unwrap_or(&Value::Null);
            app.client.save_plugin_data(str_arg(args, "plugin")?, data).await.map_err(err)?;
            Ok(Value::Null)
        }
        other => Err(format!("unknown request '{}'", other)),
    }
}

/// Read, transform in script, write. The pump performs one request at a
/// time, so nothing interleaves between the read and the write.
async fn process(sandbox: &Sandbox, app: &App, args: &Value) -> OpResult {
    let path = str_arg(args, "path")?;
    let handle = u32_arg(args, "handle")?;
    let text = app.vault.read(path).await.map_err(err)?;
    let Value::String(next) = sandbox.invoke(handle, json!([text])).map_err(err)? else {
        return Err("process() callback must return a string".to_string());
    };
    let file = app.vault.modify(path, &next).await.map_err(err)?;
    app.refresh_metadata(&file, &next).await;
    Ok(Value::String(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendClient, MemoryBackend};

    fn sandbox() -> (Sandbox, tokio::runtime::Runtime) {
        let backend = Rc::new(MemoryBackend::new().with_note("Notes/a.md", "---\ntags: [x]\n---\n# A"));
        let app = App::new(BackendClient::new(backend, Duration::from_secs(1)), "Test", ".obsidian");
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(app.load()).unwrap();
        (Sandbox::new(app, None).unwrap(), rt)
    }

    fn call(sandbox: &Sandbox, op: &str, args: Value) -> Value {
        serde_json::from_str(&sandbox.host_call(op, &args.to_string())).unwrap()
    }

    #[test]
    fn test_envelope_shape() {
        let (sandbox, _rt) = sandbox();
        let reply = call(&sandbox, "path.normalize", json!({"path": "/a//b/"}));
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["value"], "a/b");
        let reply = call(&sandbox, "no.such.op", json!({}));
        assert_eq!(reply["ok"], false);
        assert!(reply["error"].as_str().unwrap().contains("unknown host operation"));
    }

    #[test]
    fn test_yaml_ops() {
        let (sandbox, _rt) = sandbox();
        let reply = call(&sandbox, "yaml.parse", json!({"text": "a: 1\nb: [x, y]"}));
        assert_eq!(reply["value"], json!({"a": 1, "b": ["x", "y"]}));
        assert_eq!(call(&sandbox, "yaml.parse", json!({"text": "  "}))["value"], Value::Null);
        let reply = call(&sandbox, "yaml.stringify", json!({"value": {"k": "v"}}));
        assert_eq!(reply["value"], "k: v\n");
    }

    #[test]
    fn test_command_ids_are_qualified() {
        let (sandbox, _rt) = sandbox();
        let reply = call(
            &sandbox,
            "registry.addCommand",
            json!({"plugin": "p", "id": "go", "name": "Go", "handle": 1, "check": false}),
        );
        assert_eq!(reply["value"]["id"], "p:go");
        assert_eq!(sandbox.app().ledger.get("p").unwrap().commands, vec!["p:go"]);
        assert_eq!(call(&sandbox, "registry.command", json!({"id": "p:go"}))["value"]["handle"], 1);
        assert_eq!(call(&sandbox, "registry.removeCommand", json!({"plugin": "q", "id": "p:go"}))["value"], false);
        assert_eq!(call(&sandbox, "registry.removeCommand", json!({"plugin": "p", "id": "go"}))["value"], true);
    }

    #[test]
    fn test_events_ride_back_with_the_call() {
        let (sandbox, _rt) = sandbox();
        call(&sandbox, "events.on", json!({"plugin": "p", "source": "workspace", "name": "active-leaf-change", "handle": 9}));
        let reply = call(&sandbox, "workspace.getLeaf", json!({"create": true}));
        assert_eq!(reply["value"]["kind"], "leaf");
        let events = reply["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["handle"], 9);
        assert_eq!(sandbox.app().ledger.get("p").unwrap().events.len(), 1);
    }

    #[test]
    fn test_vault_queries() {
        let (sandbox, _rt) = sandbox();
        let reply = call(&sandbox, "vault.abstractFile", json!({"path": "Notes"}));
        assert_eq!(reply["value"]["kind"], "folder");
        assert_eq!(reply["value"]["children"], json!(["Notes/a.md"]));
        assert_eq!(call(&sandbox, "vault.abstractFile", json!({"path": "nope.md"}))["value"], Value::Null);
        let cache = call(&sandbox, "metadata.fileCache", json!({"path": "Notes/a.md"}));
        assert_eq!(cache["value"]["frontmatter"]["tags"], json!(["x"]));
    }

    #[test]
    fn test_timer_ops() {
        let (sandbox, _rt) = sandbox();
        let id = call(&sandbox, "timers.set", json!({"plugin": "p", "handle": 4, "ms": 1000, "repeat": true}))["value"].clone();
        call(&sandbox, "interval.register", json!({"plugin": "p", "id": id}));
        assert_eq!(sandbox.timers().intervals_of("p"), 1);
        assert_eq!(call(&sandbox, "timers.clear", json!({"id": id}))["value"], 4);
        assert_eq!(sandbox.app().ledger.get("p").unwrap().intervals.len(), 1);
    }
}
