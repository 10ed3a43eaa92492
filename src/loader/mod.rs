//! Module loading: the cache, the CommonJS executor and the
//! ES-module executor.
//!
//! The cache is keyed by canonical module id --- a file path or
//! `__builtin__:<name>` --- and every executor inserts its record
//! **before** running the module body, which is what terminates
//! circular dependency cycles.

pub mod cjs;
pub mod esm;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rquickjs::{Persistent, Value};

use crate::builtins::BuiltinRegistry;
use crate::error::{Result, RuntimeError};
use crate::kernel::Kernel;
use crate::resolver::Resolver;
use crate::transform::TransformPipeline;
use crate::vfs::MemFs;

/// One cached module.
#[derive(Clone)]
pub struct ModuleRecord {
    pub id: String,
    /// Current exports value. Mutable state: re-entrant loads observe
    /// whatever the module body has populated so far.
    pub exports: Persistent<Value<'static>>,
    /// `false` while the body is executing, `true` afterwards.
    pub loaded: bool,
}

/// Canonical-id-keyed module memoization.
#[derive(Default)]
pub struct ModuleCache {
    records: Mutex<HashMap<String, ModuleRecord>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ModuleRecord> {
        self.records.lock().expect("module cache poisoned").get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.lock().expect("module cache poisoned").contains_key(id)
    }

    pub fn insert(&self, record: ModuleRecord) {
        self.records.lock().expect("module cache poisoned").insert(record.id.clone(), record);
    }

    /// Rewrites an existing record's exports and loaded flag.
    pub fn update(&self, id: &str, exports: Persistent<Value<'static>>, loaded: bool) {
        if let Some(record) = self.records.lock().expect("module cache poisoned").get_mut(id) {
            record.exports = exports;
            record.loaded = loaded;
        }
    }

    pub fn remove(&self, id: &str) {
        self.records.lock().expect("module cache poisoned").remove(id);
    }

    pub fn clear(&self) {
        self.records.lock().expect("module cache poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("module cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State shared by both executors and the engine callbacks.
pub(crate) struct LoaderShared {
    pub kernel: Arc<Kernel>,
    pub resolver: Resolver,
    pub cache: ModuleCache,
    pub builtins: Arc<BuiltinRegistry>,
    pub transforms: TransformPipeline,
    /// The most recent runtime error thrown across the JS boundary.
    /// Lets a tagged error survive the trip through an engine
    /// exception instead of collapsing into a plain message.
    pending_error: Mutex<Option<RuntimeError>>,
}

impl LoaderShared {
    pub fn new(kernel: Arc<Kernel>, builtins: Arc<BuiltinRegistry>) -> Self {
        Self {
            kernel,
            resolver: Resolver::new(),
            cache: ModuleCache::new(),
            builtins,
            transforms: TransformPipeline::new(),
            pending_error: Mutex::new(None),
        }
    }

    pub fn vfs(&self) -> Result<Arc<MemFs>> {
        self.kernel.vfs()
    }

    pub fn stash_pending(&self, error: RuntimeError) {
        *self.pending_error.lock().expect("pending error poisoned") = Some(error);
    }

    pub fn clear_pending(&self) {
        *self.pending_error.lock().expect("pending error poisoned") = None;
    }

    /// Takes the stashed error if the caught exception text still
    /// carries its message; a module body that caught and replaced
    /// the original failure keeps its own error instead.
    pub fn take_pending_matching(&self, caught_text: &str) -> Option<RuntimeError> {
        let mut slot = self.pending_error.lock().expect("pending error poisoned");
        match slot.take() {
            Some(err) if caught_text.contains(&err.message) => Some(err),
            _ => None,
        }
    }
}
