//! Host-supplied builtin modules --- [`BuiltinRegistry`].
//!
//! Builtins are modules identified by bare name rather than a file.
//! Plugins register them; the resolver consults the registry for
//! membership and both executors ask it to materialize the module
//! object inside the engine.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use rquickjs::{Ctx, Value};

/// Cache id prefix for builtin modules.
pub const BUILTIN_PREFIX: &str = "__builtin__:";

/// Cache id for a builtin name.
pub fn builtin_id(name: &str) -> String {
    format!("{BUILTIN_PREFIX}{name}")
}

/// Inverse of [`builtin_id`].
pub fn builtin_name(id: &str) -> Option<&str> {
    id.strip_prefix(BUILTIN_PREFIX)
}

/// A host-supplied module. `instantiate` materializes the module
/// object in the engine; it is called once per cache lifetime and the
/// result is cached under the builtin's id.
pub trait BuiltinModule: Send + Sync {
    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>>;
}

/// A builtin backed by plain JSON data. Handy for constant tables and
/// for tests; real shims implement [`BuiltinModule`] directly.
pub struct JsonBuiltin {
    json: String,
}

impl JsonBuiltin {
    pub fn new(value: &serde_json::Value) -> Self {
        Self { json: value.to_string() }
    }
}

impl BuiltinModule for JsonBuiltin {
    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        ctx.json_parse(self.json.as_bytes())
    }
}

/// A builtin materialized by evaluating a JavaScript expression.
pub struct SourceBuiltin {
    source: String,
}

impl SourceBuiltin {
    /// `source` must be a single expression evaluating to the module
    /// object, for example `({ sep: '/', join(...p) { ... } })`.
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }
}

impl BuiltinModule for SourceBuiltin {
    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        ctx.eval(self.source.clone())
    }
}

/// Name-keyed registry of builtin modules. Registration order is kept
/// for introspection; re-registering a name replaces the prior entry.
#[derive(Default)]
pub struct BuiltinRegistry {
    modules: RwLock<IndexMap<String, Arc<dyn BuiltinModule>>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, module: Arc<dyn BuiltinModule>) {
        self.modules.write().expect("builtin registry poisoned").insert(name.into(), module);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.read().expect("builtin registry poisoned").contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BuiltinModule>> {
        self.modules.read().expect("builtin registry poisoned").get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.read().expect("builtin registry poisoned").keys().cloned().collect()
    }
}
