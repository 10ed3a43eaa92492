//! Embedded QuickJS engine --- [`Engine`].
//!
//! The single place that owns `rquickjs` runtime state. Everything
//! engine-bound stays behind this module and the two executors;
//! values cross the boundary either as [`Persistent`] handles held by
//! the module cache or as `serde_json` snapshots at the public API.

use std::sync::{Arc, Mutex, RwLock};

use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Function, Object, Persistent, Value};
use tracing::warn;

use crate::error::{ErrorKind, Result, RuntimeError};

/// Maps an engine-level fault into the runtime error model.
pub fn engine_error(err: rquickjs::Error) -> RuntimeError {
    RuntimeError::new(ErrorKind::Execution, err.to_string())
}

/// One captured console call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleEntry {
    pub method: String,
    pub args: Vec<serde_json::Value>,
}

/// Collects console output produced while module code runs. The
/// runtime drains it per `execute` call.
#[derive(Default)]
pub struct ConsoleSink {
    entries: Mutex<Vec<ConsoleEntry>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: &str, args: Vec<serde_json::Value>) {
        self.entries
            .lock()
            .expect("console sink poisoned")
            .push(ConsoleEntry { method: method.to_owned(), args });
    }

    pub fn drain(&self) -> Vec<ConsoleEntry> {
        std::mem::take(&mut *self.entries.lock().expect("console sink poisoned"))
    }

    pub fn clear(&self) {
        self.entries.lock().expect("console sink poisoned").clear();
    }
}

/// The engine wrapper. The context is replaceable so `clear_cache`
/// and `destroy` can revoke every published module at once.
pub struct Engine {
    runtime: rquickjs::Runtime,
    context: RwLock<Context>,
}

impl Engine {
    pub fn new() -> Result<Self> {
        let runtime = rquickjs::Runtime::new().map_err(engine_error)?;
        let context = Context::full(&runtime).map_err(engine_error)?;
        Ok(Self { runtime, context: RwLock::new(context) })
    }

    pub(crate) fn runtime(&self) -> &rquickjs::Runtime {
        &self.runtime
    }

    /// The current context; enter it with `.with(|ctx| …)`.
    pub(crate) fn context(&self) -> std::sync::RwLockReadGuard<'_, Context> {
        self.context.read().expect("engine context poisoned")
    }

    /// Replaces the context, revoking every module registration and
    /// global previously published to the engine. Persistent handles
    /// saved against the old context stop restoring.
    pub fn reset(&self) -> Result<()> {
        let fresh = Context::full(&self.runtime).map_err(engine_error)?;
        *self.context.write().expect("engine context poisoned") = fresh;
        Ok(())
    }

    /// Runs queued engine jobs (promise reactions and module
    /// evaluation steps) until the queue is empty. A job that raises
    /// is logged and does not stop the drain.
    pub fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(_) => {
                    warn!("engine job raised an exception");
                    continue;
                }
            }
        }
    }

    /// Installs the `console` proxy that records calls into `sink`.
    pub fn install_console(&self, sink: Arc<ConsoleSink>) -> Result<()> {
        self.context().with(|ctx| install_console_ctx(&ctx, &sink)).map_err(engine_error)
    }
}

fn install_console_ctx<'js>(ctx: &Ctx<'js>, sink: &Arc<ConsoleSink>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    for method in ["log", "info", "warn", "error", "debug", "trace"] {
        let sink = Arc::clone(sink);
        let func = Function::new(ctx.clone(), move |fctx: Ctx<'js>, args: Rest<Value<'js>>| {
            let rendered = args.iter().map(|value| value_to_json(&fctx, value)).collect();
            sink.record(method, rendered);
        })?;
        console.set(method, func)?;
    }
    ctx.globals().set("console", console)
}

/// Best-effort conversion of an engine value into JSON. Values JSON
/// cannot express (functions, symbols, undefined) render as
/// placeholder strings or null.
pub fn value_to_json<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> serde_json::Value {
    if value.is_undefined() || value.is_null() {
        return serde_json::Value::Null;
    }
    if let Ok(Some(text)) = ctx.json_stringify(value.clone()) {
        if let Ok(text) = text.to_string() {
            if let Ok(parsed) = serde_json::from_str(&text) {
                return parsed;
            }
        }
    }
    serde_json::Value::String(describe_value(value))
}

fn describe_value(value: &Value<'_>) -> String {
    if value.is_function() {
        "[Function]".to_owned()
    } else {
        format!("[{:?}]", value.type_of())
    }
}

/// Converts JSON into an engine value.
pub fn json_to_value<'js>(ctx: &Ctx<'js>, json: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    ctx.json_parse(json.to_string().into_bytes())
}

/// A module's exports, pinned across engine context entries.
///
/// The handle stays valid until `clear_cache` or `destroy` replaces
/// the engine context; after that every accessor fails `Execution`.
pub struct ModuleExports {
    engine: Arc<Engine>,
    value: Persistent<Value<'static>>,
}

impl std::fmt::Debug for ModuleExports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleExports").finish_non_exhaustive()
    }
}

impl ModuleExports {
    pub(crate) fn new(engine: Arc<Engine>, value: Persistent<Value<'static>>) -> Self {
        Self { engine, value }
    }

    fn restore<'js>(&self, ctx: &Ctx<'js>) -> Result<Value<'js>> {
        self.value.clone().restore(ctx).map_err(engine_error)
    }

    /// JSON snapshot of the exports value.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.engine.context().with(|ctx| {
            let value = self.restore(&ctx)?;
            Ok(value_to_json(&ctx, &value))
        })
    }

    /// JSON snapshot of one member of the exports object.
    pub fn get(&self, key: &str) -> Result<serde_json::Value> {
        self.engine.context().with(|ctx| {
            let value = self.restore(&ctx)?;
            let object = value
                .as_object()
                .ok_or_else(|| RuntimeError::invalid_argument("exports value is not an object"))?;
            let member: Value = object.get(key).map_err(engine_error)?;
            Ok(value_to_json(&ctx, &member))
        })
    }

    /// Calls an exported function with JSON arguments and returns the
    /// JSON-rendered result.
    pub fn call(&self, key: &str, args: &[serde_json::Value]) -> Result<serde_json::Value> {
        self.engine.context().with(|ctx| {
            let value = self.restore(&ctx)?;
            let object = value
                .as_object()
                .ok_or_else(|| RuntimeError::invalid_argument("exports value is not an object"))?;
            let function: Function = object.get(key).map_err(|_| {
                RuntimeError::invalid_argument(format!("exports.{key} is not a function"))
            })?;
            let mut converted = Vec::with_capacity(args.len());
            for arg in args {
                converted.push(json_to_value(&ctx, arg).map_err(engine_error)?);
            }
            let result: Value = function.call((Rest(converted),)).map_err(engine_error)?;
            Ok(value_to_json(&ctx, &result))
        })
    }
}
