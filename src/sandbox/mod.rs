//! Embedded script engine that runs plugin code.
//!
//! One QuickJS runtime and context per loader. A prelude script builds the
//! class shells plugins extend (`Plugin`, `Component`, `Modal`, ...) and
//! returns an internals object, the only script value Rust keeps. Script
//! callbacks are referred to by numeric handles.
//!
//! # Bridge
//!
//! The prelude talks to Rust through three host functions:
//!
//! - `host.call(op, json)`: synchronous operation. Returns an envelope with
//!   the result and any events raised meanwhile, which the prelude
//!   dispatches before returning to plugin code.
//! - `host.request(op, json)`: asynchronous operation. Queued and performed
//!   by [`Sandbox::pump`], which settles the script promise afterwards.
//! - `host.log(level, plugin, message)`: console forwarding.
//!
//! Rust never enters the engine while script code is on the stack; see
//! [`SandboxError::Reentrant`].

mod bridge;
mod exports;
mod timers;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use rquickjs::{CatchResultExt, CaughtError, Coerced, Context, Ctx, Function, Object, Persistent, Runtime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::api::App;

pub use exports::{resolve_export, ExportChoice, ExportShape};
pub use timers::{Fired, Timer, Timers};

const PRELUDE: &str = include_str!("prelude.js");

/// Upper bound on how long a hook wait sleeps between pumps.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors raised while running plugin code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// The engine itself failed (allocation, prelude, bad envelope).
    #[error("Script engine error: {0}")]
    Engine(String),

    /// Plugin code threw.
    #[error("{message}")]
    Script { message: String },

    /// The module exported no function to instantiate.
    #[error("No plugin class exported")]
    NoExport,

    /// The exported class does not behave like a plugin.
    #[error("{0}")]
    NotAPlugin(String),

    /// Script code is already on the stack.
    #[error("Script engine is busy")]
    Reentrant,

    /// A lifecycle hook's promise did not settle in time.
    #[error("{hook}() did not finish within {millis}ms")]
    HookTimeout { hook: String, millis: u64 },

    /// A lifecycle hook threw or its promise rejected.
    #[error("{hook}() failed: {message}")]
    HookRejected { hook: String, message: String },
}

impl From<rquickjs::Error> for SandboxError {
    fn from(e: rquickjs::Error) -> Self {
        Self::Engine(e.to_string())
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Engine(format!("malformed bridge payload: {}", e))
    }
}

fn caught(e: CaughtError<'_>) -> SandboxError {
    SandboxError::Script { message: e.to_string() }
}

/// Reply of a prelude internal.
#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stage: Option<String>,
}

impl Envelope {
    fn into_result(self) -> SandboxResult<Value> {
        if self.ok {
            return Ok(self.value);
        }
        let message = self.error.unwrap_or_else(|| "unknown script error".to_string());
        Err(match self.stage.as_deref() {
            Some("notAPlugin") => SandboxError::NotAPlugin(message),
            _ => SandboxError::Script { message },
        })
    }
}

/// Outcome of starting a lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// Returned synchronously.
    Done,
    /// Returned a promise; settles under this ticket.
    Pending(u32),
}

/// An event for a script subscriber, delivered on the next dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedEvent {
    pub handle: u32,
    pub args: Value,
}

/// An asynchronous operation requested by script code.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Request {
    pub id: u32,
    pub op: String,
    pub args: Value,
}

/// Script callback behind a command, so script code can run it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandHandle {
    pub handle: u32,
    pub check: bool,
    pub owner: String,
}

pub(crate) struct SandboxInner {
    // Must drop before the context and runtime.
    internals: RefCell<Option<Persistent<Object<'static>>>>,
    context: Context,
    runtime: Runtime,
    app: Rc<App>,
    depth: Cell<u32>,
    pumping: Cell<bool>,
    hook_turn: tokio::sync::Mutex<()>,
    timers: Timers,
    hooks: RefCell<HashMap<u32, Result<(), String>>>,
    requests: RefCell<VecDeque<Request>>,
    next_request: Cell<u32>,
    queued: RefCell<Vec<QueuedEvent>>,
    commands: RefCell<HashMap<String, CommandHandle>>,
    plugins: RefCell<Value>,
}

/// Handle to the engine. Clones share it.
#[derive(Clone)]
pub struct Sandbox {
    inner: Rc<SandboxInner>,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("depth", &self.inner.depth.get())
            .field("timers", &self.inner.timers.len())
            .field("requests", &self.inner.requests.borrow().len())
            .finish()
    }
}

/// Marks script code as running for the guard's lifetime.
struct DepthGuard<'a>(&'a Cell<u32>);

impl<'a> DepthGuard<'a> {
    fn new(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

struct PumpGuard<'a>(&'a Cell<bool>);

impl Drop for PumpGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Sandbox {
    /// Start an engine bound to `app` and run the prelude.
    pub fn new(app: Rc<App>, memory_limit: Option<usize>) -> SandboxResult<Self> {
        let runtime = Runtime::new()?;
        if let Some(limit) = memory_limit {
            runtime.set_memory_limit(limit);
        }
        runtime.set_max_stack_size(1024 * 1024);
        let context = Context::full(&runtime)?;

        let inner = Rc::new(SandboxInner {
            internals: RefCell::new(None),
            context,
            runtime,
            app,
            depth: Cell::new(0),
            pumping: Cell::new(false),
            hook_turn: tokio::sync::Mutex::new(()),
            timers: Timers::new(),
            hooks: RefCell::new(HashMap::new()),
            requests: RefCell::new(VecDeque::new()),
            next_request: Cell::new(0),
            queued: RefCell::new(Vec::new()),
            commands: RefCell::new(HashMap::new()),
            plugins: RefCell::new(json!({"manifests": {}, "enabled": []})),
        });

        let weak = Rc::downgrade(&inner);
        let internals = inner.context.with(|ctx| -> SandboxResult<Persistent<Object<'static>>> {
            let host = bridge::host_object(&ctx, &weak).catch(&ctx).map_err(caught)?;
            let factory: Function = ctx.eval(PRELUDE).catch(&ctx).map_err(caught)?;
            let internals: Object = factory.call((host,)).catch(&ctx).map_err(caught)?;
            Ok(Persistent::save(&ctx, internals))
        })?;
        *inner.internals.borrow_mut() = Some(internals);
        tracing::debug!("Script engine ready");
        Ok(Self { inner })
    }

    fn from_inner(inner: Rc<SandboxInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<SandboxInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn app(&self) -> &Rc<App> {
        &self.inner.app
    }

    /// Whether script code is on the stack.
    pub fn is_busy(&self) -> bool {
        self.inner.depth.get() > 0
    }

    pub fn timers(&self) -> &Timers {
        &self.inner.timers
    }

    /// Run `f` inside the engine with the prelude internals.
    fn enter<R>(&self, f: impl for<'js> FnOnce(&Ctx<'js>, Object<'js>) -> rquickjs::Result<R>) -> SandboxResult<R> {
        if self.is_busy() {
            return Err(SandboxError::Reentrant);
        }
        let internals = self
            .inner
            .internals
            .borrow()
            .clone()
            .ok_or_else(|| SandboxError::Engine("prelude not loaded".to_string()))?;
        let _depth = DepthGuard::new(&self.inner.depth);
        self.inner.context.with(|ctx| {
            let internals = internals.restore(&ctx).catch(&ctx).map_err(caught)?;
            f(&ctx, internals).catch(&ctx).map_err(caught)
        })
    }

    /// Call a prelude internal with one JSON argument.
    fn call_internal(&self, name: &str, payload: &Value) -> SandboxResult<Value> {
        let payload = payload.to_string();
        let reply: String = self.enter(|_ctx, internals| {
            let f: Function = internals.get(name)?;
            f.call((payload,))
        })?;
        serde_json::from_str::<Envelope>(&reply)?.into_result()
    }

    /// Run a plugin's entry code and report what it exported.
    ///
    /// The code runs as the body of a function of exactly `module`,
    /// `exports`, `require`, `app` and `obsidian`.
    pub fn evaluate(&self, plugin_id: &str, manifest: &Value, source: &str) -> SandboxResult<ExportShape> {
        let manifest = manifest.to_string();
        let plugin_id = plugin_id.to_string();
        let source = source.to_string();
        let reply: String = self.enter(|_ctx, internals| {
            let execute: Function = internals.get("execute")?;
            execute.call((plugin_id, manifest, source))
        })?;
        let value = serde_json::from_str::<Envelope>(&reply)?.into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Construct the chosen export with `(app, manifest)` and attach it.
    /// Returns whether the instance had to be adapted.
    pub fn instantiate(&self, plugin_id: &str, choice: &ExportChoice) -> SandboxResult<bool> {
        let value = self.call_internal("instantiate", &json!({"pluginId": plugin_id, "choice": choice}))?;
        Ok(value.get("adapted").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Start a lifecycle hook (`load` or `unload`) on an attached instance.
    pub fn call_hook(&self, plugin_id: &str, hook: &str) -> SandboxResult<HookState> {
        let value = self
            .call_internal("callHook", &json!({"pluginId": plugin_id, "hook": hook}))
            .map_err(|e| match e {
                SandboxError::Script { message } => SandboxError::HookRejected { hook: hook.to_string(), message },
                other => other,
            })?;
        match value.get("ticket").and_then(Value::as_u64) {
            Some(ticket) => Ok(HookState::Pending(ticket as u32)),
            None => Ok(HookState::Done),
        }
    }

    /// Run a lifecycle hook to completion, awaiting a returned promise for
    /// at most `timeout` while async work and timers are driven.
    ///
    /// Script code resumed by the pump meanwhile is attributed to the plugin.
    /// Hooks run one at a time, so that owner is never another plugin's.
    pub async fn run_hook(&self, plugin_id: &str, hook: &str, timeout: Duration) -> SandboxResult<()> {
        let _turn = self.inner.hook_turn.lock().await;
        self.set_ambient(Some(plugin_id));
        let result = self.await_hook(plugin_id, hook, timeout).await;
        self.set_ambient(None);
        result
    }

    fn set_ambient(&self, plugin_id: Option<&str>) {
        if let Err(e) = self.call_internal("setAmbient", &json!({"pluginId": plugin_id})) {
            tracing::debug!(error = %e, "Could not set script owner");
        }
    }

    async fn await_hook(&self, plugin_id: &str, hook: &str, timeout: Duration) -> SandboxResult<()> {
        let ticket = match self.call_hook(plugin_id, hook)? {
            HookState::Done => {
                self.pump().await;
                return Ok(());
            }
            HookState::Pending(ticket) => ticket,
        };
        let deadline = Instant::now() + timeout;
        loop {
            self.pump().await;
            let settled = self.inner.hooks.borrow_mut().remove(&ticket);
            if let Some(result) = settled {
                return result.map_err(|message| SandboxError::HookRejected { hook: hook.to_string(), message });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SandboxError::HookTimeout {
                    hook: hook.to_string(),
                    millis: timeout.as_millis() as u64,
                });
            }
            let wake = self.next_timer().map_or(deadline, |due| due.min(deadline)).min(now + POLL_INTERVAL);
            tokio::time::sleep_until(tokio::time::Instant::from_std(wake)).await;
            self.tick();
        }
    }

    /// Call a script callback by handle. Returns its plain result.
    pub fn invoke(&self, handle: u32, args: Value) -> SandboxResult<Value> {
        self.call_internal("invoke", &json!({"handle": handle, "args": args}))
    }

    /// Render a settings tab: run its `display()` and outline the result.
    pub fn display_setting_tab(&self, handle: u32) -> SandboxResult<String> {
        let value = self.call_internal("displayTab", &json!({"handle": handle}))?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Run markdown post-processors over rendered text.
    pub fn post_process(&self, payload: &Value) -> SandboxResult<String> {
        let value = self.call_internal("postProcess", payload)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Remove every script-side DOM listener of a plugin.
    pub fn detach_listeners(&self, plugin_id: &str) -> SandboxResult<usize> {
        let value = self.call_internal("detachListeners", &json!({"pluginId": plugin_id}))?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    /// Drop a plugin's instance, views and every callback handle it owns.
    pub fn release(&self, plugin_id: &str) -> SandboxResult<()> {
        self.inner.commands.borrow_mut().retain(|_, c| c.owner != plugin_id);
        self.call_internal("release", &json!({"pluginId": plugin_id}))?;
        Ok(())
    }

    /// Cancel a plugin's timers and release their handles.
    pub fn clear_timers(&self, plugin_id: &str) -> usize {
        self.inner.timers.clear_owned_by(plugin_id).len()
    }

    /// Publish plugin manifests and the enabled list to `app.plugins`.
    pub fn set_plugin_info(&self, info: Value) {
        *self.inner.plugins.borrow_mut() = info;
    }

    /// Whether the prelude has an attached instance for a plugin.
    pub fn has_instance(&self, plugin_id: &str) -> bool {
        self.call_internal("hasInstance", &json!({"pluginId": plugin_id}))
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub(crate) fn queue_event(&self, event: QueuedEvent) {
        self.inner.queued.borrow_mut().push(event);
    }

    fn take_events(&self) -> Vec<QueuedEvent> {
        std::mem::take(&mut *self.inner.queued.borrow_mut())
    }

    /// Dispatch queued events to script subscribers. No-op while script
    /// code is running; the events then ride back with the current call.
    pub fn deliver_events(&self) -> usize {
        if self.is_busy() {
            return 0;
        }
        let events = self.take_events();
        if events.is_empty() {
            return 0;
        }
        let count = events.len();
        if let Err(e) = self.call_internal("dispatch", &json!(events)) {
            tracing::warn!(error = %e, "Event dispatch failed");
        }
        count
    }

    fn queue_request(&self, op: String, args: Value) -> u32 {
        let id = self.inner.next_request.get() + 1;
        self.inner.next_request.set(id);
        self.inner.requests.borrow_mut().push_back(Request { id, op, args });
        id
    }

    /// Number of asynchronous requests waiting for the pump.
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.borrow().len()
    }

    fn run_jobs(&self) -> usize {
        if self.is_busy() {
            return 0;
        }
        let _depth = DepthGuard::new(&self.inner.depth);
        let mut ran = 0;
        loop {
            match self.inner.runtime.execute_pending_job() {
                Ok(true) => ran += 1,
                Ok(false) => break,
                Err(err) => {
                    let message = err.0.with(|ctx| {
                        ctx.catch().get::<Coerced<String>>().map(|c| c.0).unwrap_or_else(|_| "unknown".to_string())
                    });
                    tracing::warn!(error = %message, "Script job raised an exception");
                    ran += 1;
                }
            }
        }
        ran
    }

    /// Drive script work to quiescence: run promise jobs, dispatch events,
    /// and perform queued requests one at a time in issue order.
    ///
    /// Returns the number of requests performed. A nested call while a pump
    /// is already active returns 0 immediately.
    pub async fn pump(&self) -> usize {
        if self.inner.pumping.replace(true) {
            return 0;
        }
        let _pumping = PumpGuard(&self.inner.pumping);
        let mut performed = 0;
        loop {
            self.run_jobs();
            self.deliver_events();
            let next = self.inner.requests.borrow_mut().pop_front();
            let Some(request) = next else {
                if self.inner.runtime.is_job_pending() {
                    continue;
                }
                break;
            };
            tracing::trace!(op = %request.op, id = request.id, "Performing script request");
            let result = bridge::perform(self, &request).await;
            self.deliver_events();
            self.settle(request.id, result);
            performed += 1;
        }
        performed
    }

    fn settle(&self, id: u32, result: Result<Value, String>) {
        let payload = match result {
            Ok(value) => json!({"id": id, "ok": true, "value": value}),
            Err(error) => json!({"id": id, "ok": false, "error": error}),
        };
        if let Err(e) = self.call_internal("settle", &payload) {
            tracing::warn!(request = id, error = %e, "Could not settle script request");
        }
    }

    /// Fire due timers. Returns how many fired.
    pub fn tick(&self) -> usize {
        if self.is_busy() {
            return 0;
        }
        let fired = self.inner.timers.due(Instant::now());
        if fired.is_empty() {
            return 0;
        }
        let payload: Vec<Value> = fired.iter().map(|f| json!({"handle": f.handle, "once": f.once})).collect();
        if let Err(e) = self.call_internal("fire", &json!(payload)) {
            tracing::warn!(error = %e, "Timer dispatch failed");
        }
        fired.len()
    }

    /// When the next timer is due.
    pub fn next_timer(&self) -> Option<Instant> {
        self.inner.timers.next_due()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendClient, MemoryBackend};

    fn sandbox() -> (Sandbox, tokio::runtime::Runtime) {
        let backend = Rc::new(MemoryBackend::new().with_note("a.md", "alpha"));
        let app = App::new(BackendClient::new(backend, Duration::from_secs(1)), "Test", ".obsidian");
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(app.load()).unwrap();
        (Sandbox::new(app, None).unwrap(), rt)
    }

    fn load(sandbox: &Sandbox, id: &str, source: &str) -> SandboxResult<ExportShape> {
        sandbox.evaluate(id, &json!({"id": id, "name": id, "version": "1.0.0"}), source)
    }

    #[test]
    fn test_evaluate_reports_exports() {
        let (sandbox, _rt) = sandbox();
        let shape = load(&sandbox, "p", "class P extends obsidian.Plugin {}\nmodule.exports = P;").unwrap();
        assert!(shape.module_is_function);

        let shape = load(&sandbox, "q", "exports.helper = 1; exports.Thing = class {};").unwrap();
        assert_eq!(shape.function_keys, vec!["Thing"]);
    }

    #[test]
    fn test_evaluate_throw_is_script_error() {
        let (sandbox, _rt) = sandbox();
        let err = load(&sandbox, "p", "throw new Error('boom');").unwrap_err();
        assert!(matches!(err, SandboxError::Script { ref message } if message.contains("boom")));
        let err = load(&sandbox, "p", "this is not javascript").unwrap_err();
        assert!(matches!(err, SandboxError::Script { .. }));
    }

    #[test]
    fn test_require_unknown_module() {
        let (sandbox, _rt) = sandbox();
        let err = load(&sandbox, "p", "require('fs');").unwrap_err();
        assert!(err.to_string().contains("Cannot find module 'fs'"));
    }

    #[test]
    fn test_source_cannot_close_its_wrapper() {
        let (sandbox, _rt) = sandbox();
        let err = load(&sandbox, "p", "}); globalThis.escaped = true; (function () {").unwrap_err();
        assert!(matches!(err, SandboxError::Script { .. }));

        let shape = load(&sandbox, "q", "if (typeof escaped !== 'undefined') exports.Escaped = class {};").unwrap();
        assert!(shape.function_keys.is_empty());
    }

    #[test]
    fn test_instantiate_requires_onload() {
        let (sandbox, _rt) = sandbox();
        load(&sandbox, "p", "module.exports = class { constructor(app) { this.app = app; } };").unwrap();
        let err = sandbox.instantiate("p", &ExportChoice::Module).unwrap_err();
        assert!(matches!(err, SandboxError::NotAPlugin(_)));
    }

    #[test]
    fn test_plain_class_is_adapted() {
        let (sandbox, rt) = sandbox();
        let src = "module.exports = class { onload() { this.addCommand({ id: 'x', name: 'X', callback: () => {} }); } };";
        load(&sandbox, "plain", src).unwrap();
        assert!(sandbox.instantiate("plain", &ExportChoice::Module).unwrap());
        rt.block_on(sandbox.run_hook("plain", "load", Duration::from_secs(1))).unwrap();
        assert!(sandbox.app().registry.get_command("plain:x").is_some());
    }

    #[test]
    fn test_reentrant_entry_is_refused() {
        let (sandbox, _rt) = sandbox();
        let _depth = DepthGuard::new(&sandbox.inner.depth);
        assert_eq!(sandbox.invoke(1, json!([])).unwrap_err(), SandboxError::Reentrant);
        assert_eq!(sandbox.tick(), 0);
    }

    #[test]
    fn test_async_hook_settles_through_pump() {
        let (sandbox, rt) = sandbox();
        let src = r"
            module.exports = class extends obsidian.Plugin {
                async onload() {
                    this.text = await this.app.vault.adapter.read('a.md');
                    new obsidian.Notice('read ' + this.text);
                }
            };";
        load(&sandbox, "reader", src).unwrap();
        sandbox.instantiate("reader", &ExportChoice::Module).unwrap();
        rt.block_on(sandbox.run_hook("reader", "load", Duration::from_secs(1))).unwrap();
        assert_eq!(sandbox.app().notices.all()[0].message, "read alpha");
    }

    #[test]
    fn test_hook_timeout() {
        let (sandbox, rt) = sandbox();
        let src = "module.exports = class extends obsidian.Plugin { onload() { return new Promise(() => {}); } };";
        load(&sandbox, "stuck", src).unwrap();
        sandbox.instantiate("stuck", &ExportChoice::Module).unwrap();
        let err = rt.block_on(sandbox.run_hook("stuck", "load", Duration::from_millis(30))).unwrap_err();
        assert!(matches!(err, SandboxError::HookTimeout { .. }));
    }

    #[test]
    fn test_timers_fire_through_tick() {
        let (sandbox, rt) = sandbox();
        let src = r"
            module.exports = class extends obsidian.Plugin {
                onload() { setTimeout(() => new obsidian.Notice('tick'), 0); }
            };";
        load(&sandbox, "t", src).unwrap();
        sandbox.instantiate("t", &ExportChoice::Module).unwrap();
        rt.block_on(sandbox.run_hook("t", "load", Duration::from_secs(1))).unwrap();
        assert_eq!(sandbox.timers().count_for("t"), 1);
        assert_eq!(sandbox.tick(), 1);
        assert_eq!(sandbox.timers().count_for("t"), 0);
        assert_eq!(sandbox.app().notices.len(), 1);
    }
}
