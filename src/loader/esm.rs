//! ES-module executor.
//!
//! Import and export specifiers are rewritten in place to canonical
//! module ids, then the source is published to the engine's module
//! registry under that id --- the native analogue of handing a blob
//! URL to the browser's dynamic loader. Builtins and CommonJS files
//! publish as generated shim modules that re-export the live object.
//! The namespace lands in the module cache under the canonical id,
//! seeded with an in-progress record before evaluation begins.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rquickjs::loader::{Loader as JsLoader, Resolver as JsResolver};
use rquickjs::module::{Declared, Module};
use rquickjs::{CatchResultExt, Ctx, Exception, Function, Object, Persistent, Promise, Value};
use tracing::{debug, trace};

use crate::builtins::{builtin_id, builtin_name, BUILTIN_PREFIX};
use crate::engine::{engine_error, Engine};
use crate::error::{ErrorKind, Result, RuntimeError};
use crate::resolver::{detect, ModuleFormat, Resolved};
use crate::transform::has_esm_syntax;
use crate::vfs::MemFs;

use super::{cjs, LoaderShared, ModuleRecord};

static FROM_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)\b((?:import|export)\s[^;]*?\bfrom\s*)(['"])([^'"]+)['"]"#)
        .expect("static regex")
});
static BARE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^(\s*import\s*)(['"])([^'"]+)['"]"#).expect("static regex")
});
static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(import\s*\(\s*)(['"])([^'"]+)['"](\s*\))"#).expect("static regex")
});

/// Rewrites every literal import/export specifier in `source` to its
/// canonical module id, resolving each against `from`.
pub(crate) fn rewrite_specifiers(
    shared: &Arc<LoaderShared>,
    vfs: &MemFs,
    source: &str,
    from: &str,
) -> Result<String> {
    let failure: RefCell<Option<RuntimeError>> = RefCell::new(None);
    let resolve_to_id = |spec: &str| -> String {
        if spec.starts_with(BUILTIN_PREFIX) {
            return spec.to_owned();
        }
        match shared.resolver.resolve(vfs, &shared.builtins, spec, from) {
            Ok(Resolved::Builtin(name)) => builtin_id(&name),
            Ok(Resolved::File(file_path)) => file_path,
            Err(err) => {
                let mut slot = failure.borrow_mut();
                if slot.is_none() {
                    *slot = Some(err);
                }
                spec.to_owned()
            }
        }
    };

    let pass = FROM_CLAUSE.replace_all(source, |caps: &Captures| {
        format!("{}{}{}{}", &caps[1], &caps[2], resolve_to_id(&caps[3]), &caps[2])
    });
    let pass = BARE_IMPORT.replace_all(&pass, |caps: &Captures| {
        format!("{}{}{}{}", &caps[1], &caps[2], resolve_to_id(&caps[3]), &caps[2])
    });
    let pass = DYNAMIC_IMPORT.replace_all(&pass, |caps: &Captures| {
        format!("{}{}{}{}{}", &caps[1], &caps[2], resolve_to_id(&caps[3]), &caps[2], &caps[4])
    });

    match failure.into_inner() {
        Some(err) => Err(err),
        None => Ok(pass.into_owned()),
    }
}

fn loading_error(name: &str) -> rquickjs::Error {
    rquickjs::Error::new_loading(name)
}

/// Resolution hook handed to the engine. Canonical ids pass through;
/// anything else goes through the full resolver with the importing
/// module as requester.
pub(crate) struct EngineResolver {
    shared: Weak<LoaderShared>,
}

impl JsResolver for EngineResolver {
    fn resolve(&mut self, _ctx: &Ctx<'_>, base: &str, name: &str) -> rquickjs::Result<String> {
        if name.starts_with('/') || name.starts_with(BUILTIN_PREFIX) {
            return Ok(name.to_owned());
        }
        let shared = self.shared.upgrade().ok_or_else(|| loading_error(name))?;
        let vfs = shared.vfs().map_err(|err| {
            shared.stash_pending(err);
            loading_error(name)
        })?;
        let from = if base.is_empty() { "/".to_owned() } else { base.to_owned() };
        match shared.resolver.resolve(&vfs, &shared.builtins, name, &from) {
            Ok(Resolved::Builtin(builtin)) => Ok(builtin_id(&builtin)),
            Ok(Resolved::File(file_path)) => Ok(file_path),
            Err(err) => {
                shared.stash_pending(err);
                Err(loading_error(name))
            }
        }
    }
}

/// Load hook handed to the engine: materializes the module text for a
/// canonical id and declares it.
pub(crate) struct EngineLoader {
    shared: Weak<LoaderShared>,
}

impl JsLoader for EngineLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        let shared = self.shared.upgrade().ok_or_else(|| loading_error(name))?;
        match module_source(&shared, ctx, name) {
            Ok(source) => Module::declare(ctx.clone(), name, source),
            Err(err) => {
                shared.stash_pending(err);
                Err(loading_error(name))
            }
        }
    }
}

/// Installs the module hooks and scope globals on the engine. Called
/// at construction and again after every context reset.
pub(crate) fn install(engine: &Engine, shared: &Arc<LoaderShared>) -> Result<()> {
    engine.runtime().set_loader(
        EngineResolver { shared: Arc::downgrade(shared) },
        EngineLoader { shared: Arc::downgrade(shared) },
    );
    engine.context().with(|ctx| install_globals(&ctx, shared)).map_err(engine_error)
}

fn install_globals<'js>(ctx: &Ctx<'js>, shared: &Arc<LoaderShared>) -> rquickjs::Result<()> {
    let for_builtin = Arc::clone(shared);
    let builtin_fn = Function::new(
        ctx.clone(),
        move |fctx: Ctx<'js>, name: String| -> rquickjs::Result<Value<'js>> {
            cjs::load_builtin(&for_builtin, &fctx, &name).map_err(|err| {
                let message = err.to_string();
                for_builtin.stash_pending(err);
                Exception::throw_message(&fctx, &message)
            })
        },
    )?;
    ctx.globals().set("__jsbox_builtin", builtin_fn)?;

    let for_require = Arc::clone(shared);
    let require_fn = Function::new(
        ctx.clone(),
        move |fctx: Ctx<'js>, file_path: String| -> rquickjs::Result<Value<'js>> {
            cjs::load_file(&for_require, &fctx, &file_path).map_err(|err| {
                let message = err.to_string();
                for_require.stash_pending(err);
                Exception::throw_message(&fctx, &message)
            })
        },
    )?;
    ctx.globals().set("__jsbox_require", require_fn)
}

/// Produces the module text published under `id`.
fn module_source<'js>(shared: &Arc<LoaderShared>, ctx: &Ctx<'js>, id: &str) -> Result<String> {
    if let Some(name) = builtin_name(id) {
        return builtin_shim(shared, ctx, name);
    }

    let vfs = shared.vfs()?;
    if id.ends_with(".json") {
        return Ok(format!(
            "const __mod = globalThis.__jsbox_require({id:?});\nexport default __mod;"
        ));
    }

    let source = vfs
        .read_to_string(id)
        .map_err(|_| RuntimeError::module_not_found(id).with_context(id))?;

    if detect(&vfs, id) == ModuleFormat::EsModule || has_esm_syntax(&source) {
        let rewritten = rewrite_specifiers(shared, &vfs, &source, id)?;
        trace!(id, "publishing es module");
        Ok(cjs::ensure_source_url(rewritten, id))
    } else {
        cjs_shim(shared, ctx, id)
    }
}

/// Words that cannot appear as destructuring binding names.
const RESERVED_WORDS: [&str; 22] = [
    "break", "case", "catch", "class", "const", "continue", "delete", "do", "else", "export",
    "finally", "for", "function", "if", "import", "in", "new", "return", "switch", "throw", "var",
    "while",
];

/// Identifier-safe subset of an object's keys, for named re-exports.
fn exportable_keys(value: &Value<'_>) -> Vec<String> {
    let Some(object) = value.as_object() else { return Vec::new() };
    object
        .keys::<String>()
        .filter_map(|key| key.ok())
        .filter(|key| {
            !key.is_empty()
                && key != "default"
                && !RESERVED_WORDS.contains(&key.as_str())
                && key.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
                && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
        .collect()
}

/// A tiny module re-exporting a builtin object's keys, so importers
/// can destructure it.
fn builtin_shim<'js>(shared: &Arc<LoaderShared>, ctx: &Ctx<'js>, name: &str) -> Result<String> {
    let value = cjs::load_builtin(shared, ctx, name)?;
    let mut lines = vec![
        format!("const __mod = globalThis.__jsbox_builtin({name:?});"),
        "export default __mod;".to_owned(),
    ];
    let keys = exportable_keys(&value);
    if !keys.is_empty() {
        lines.push(format!("export const {{ {} }} = __mod;", keys.join(", ")));
    }
    Ok(lines.join("\n"))
}

/// A shim over a CommonJS file: the module executes through the
/// script loader and its exports re-publish as a namespace. Named
/// bindings are a snapshot, not live.
fn cjs_shim<'js>(shared: &Arc<LoaderShared>, ctx: &Ctx<'js>, id: &str) -> Result<String> {
    let value = cjs::load_file(shared, ctx, id)?;
    let mut lines = vec![
        format!("const __mod = globalThis.__jsbox_require({id:?});"),
        "export default __mod;".to_owned(),
    ];
    let keys = exportable_keys(&value);
    if !keys.is_empty() {
        lines.push(format!("export const {{ {} }} = __mod;", keys.join(", ")));
    }
    Ok(lines.join("\n"))
}

/// Dynamic import entry point.
pub(crate) async fn import_module(
    shared: &Arc<LoaderShared>,
    engine: &Arc<Engine>,
    spec: &str,
    from: &str,
) -> Result<Persistent<Value<'static>>> {
    let vfs = shared.vfs()?;
    let resolved = shared.resolver.resolve(&vfs, &shared.builtins, spec, from)?;
    let id = match resolved {
        Resolved::Builtin(name) => builtin_id(&name),
        Resolved::File(file_path) => file_path,
    };

    if let Some(record) = shared.cache.get(&id) {
        if record.loaded {
            return Ok(record.exports);
        }
    }
    debug!(id = %id, "importing module");

    shared.clear_pending();
    let pending: Persistent<Promise<'static>> = engine
        .context()
        .with(|ctx| -> Result<Persistent<Promise<'static>>> {
            // Seed the in-progress record so re-entrant loads share it.
            if !shared.cache.contains(&id) {
                let placeholder =
                    Object::new(ctx.clone()).map_err(engine_error)?.into_value();
                shared.cache.insert(ModuleRecord {
                    id: id.clone(),
                    exports: Persistent::save(&ctx, placeholder),
                    loaded: false,
                });
            }
            // Dynamic import routes through the hooks installed above.
            let entry = format!("import({})", serde_json::Value::String(id.clone()));
            let promise = ctx.eval::<Promise, _>(entry).catch(&ctx).map_err(|caught| {
                let text = caught.to_string();
                shared.take_pending_matching(&text).unwrap_or_else(|| {
                    RuntimeError::new(ErrorKind::Execution, text).with_context(id.clone())
                })
            })?;
            Ok(Persistent::save(&ctx, promise))
        })?;

    // Let queued evaluation steps run; suspension happens only here.
    engine.drain_jobs();
    tokio::task::yield_now().await;
    engine.drain_jobs();

    engine.context().with(|ctx| -> Result<Persistent<Value<'static>>> {
        let promise = pending.restore(&ctx).map_err(engine_error)?;
        let namespace: Value = promise.finish::<Value>().catch(&ctx).map_err(|caught| {
            let text = caught.to_string();
            match shared.take_pending_matching(&text) {
                Some(original) => original,
                None => RuntimeError::new(ErrorKind::Execution, text).with_context(id.clone()),
            }
        })?;
        let persistent = Persistent::save(&ctx, namespace.clone());
        shared.cache.update(&id, Persistent::save(&ctx, namespace), true);
        Ok(persistent)
    })
}
