//! CommonJS executor.
//!
//! Wraps module source into a function over `console, require,
//! module, exports, __filename, __dirname` and invokes it in the
//! engine. The cache record is inserted before the body runs on every
//! code path, so a cycle re-entering this loader resolves to the
//! partially populated exports object instead of recursing.

use std::sync::Arc;

use rquickjs::{CatchResultExt, Ctx, Exception, Function, Object, Persistent, Value};
use tracing::{debug, trace};

use crate::builtins::builtin_id;
use crate::error::{ErrorKind, Result, RuntimeError};
use crate::path;
use crate::resolver::{detect, ModuleFormat, Resolved};
use crate::vfs::MemFs;

use super::{LoaderShared, ModuleRecord};

/// Extensions always routed through the transform pipeline.
const TRANSFORM_EXTENSIONS: [&str; 6] = [".ts", ".tsx", ".jsx", ".mjs", ".mts", ".cts"];

/// Resolves `spec` from `from` and loads it.
pub(crate) fn require<'js>(
    shared: &Arc<LoaderShared>,
    ctx: &Ctx<'js>,
    spec: &str,
    from: &str,
) -> Result<Value<'js>> {
    let vfs = shared.vfs()?;
    let resolved = shared.resolver.resolve(&vfs, &shared.builtins, spec, from)?;
    match resolved {
        Resolved::Builtin(name) => load_builtin(shared, ctx, &name),
        Resolved::File(file_path) => load_file(shared, ctx, &file_path),
    }
}

/// Returns a builtin's module object, caching it under its
/// `__builtin__:` id on first lookup.
pub(crate) fn load_builtin<'js>(
    shared: &Arc<LoaderShared>,
    ctx: &Ctx<'js>,
    name: &str,
) -> Result<Value<'js>> {
    let id = builtin_id(name);
    if let Some(record) = shared.cache.get(&id) {
        return record.exports.restore(ctx).map_err(crate::engine::engine_error);
    }
    let module = shared
        .builtins
        .get(name)
        .ok_or_else(|| RuntimeError::module_not_found(name).with_context(id.clone()))?;
    let value = module.instantiate(ctx).catch(ctx).map_err(|caught| {
        RuntimeError::new(ErrorKind::Execution, caught.to_string()).with_context(id.clone())
    })?;
    shared.cache.insert(ModuleRecord {
        id,
        exports: Persistent::save(ctx, value.clone()),
        loaded: true,
    });
    Ok(value)
}

/// Loads a resolved file path through the cache.
pub(crate) fn load_file<'js>(
    shared: &Arc<LoaderShared>,
    ctx: &Ctx<'js>,
    file_path: &str,
) -> Result<Value<'js>> {
    if let Some(record) = shared.cache.get(file_path) {
        trace!(id = file_path, loaded = record.loaded, "module cache hit");
        return record.exports.restore(ctx).map_err(crate::engine::engine_error);
    }

    let vfs = shared.vfs()?;
    debug!(id = file_path, "loading module");

    // The record must exist before the body runs; cycles terminate on it.
    let exports_obj = Object::new(ctx.clone()).map_err(crate::engine::engine_error)?;
    let module_obj = Object::new(ctx.clone()).map_err(crate::engine::engine_error)?;
    module_obj.set("exports", exports_obj.clone()).map_err(crate::engine::engine_error)?;
    module_obj.set("id", file_path).map_err(crate::engine::engine_error)?;
    module_obj.set("loaded", false).map_err(crate::engine::engine_error)?;
    shared.cache.insert(ModuleRecord {
        id: file_path.to_owned(),
        exports: Persistent::save(ctx, exports_obj.clone().into_value()),
        loaded: false,
    });

    let source = match vfs.read_to_string(file_path) {
        Ok(source) => source,
        Err(_) => {
            // Read-after-resolve failure; nothing ran, so drop the record.
            shared.cache.remove(file_path);
            return Err(RuntimeError::module_not_found(file_path).with_context(file_path));
        }
    };

    if file_path.ends_with(".json") {
        return load_json(shared, ctx, file_path, &source);
    }

    let prepared = prepare_source(shared, &vfs, file_path, source)?;
    let wrapped = wrap_source(&prepared);
    let function = match ctx.eval::<Function, _>(wrapped).catch(ctx) {
        Ok(function) => function,
        Err(caught) => {
            shared.cache.remove(file_path);
            return Err(RuntimeError::new(ErrorKind::Parse, caught.to_string())
                .with_context(file_path));
        }
    };

    let console: Value = ctx.globals().get("console").map_err(crate::engine::engine_error)?;
    let require_fn = bind_require(shared, ctx, file_path)?;
    let dirname = path::dirname(file_path)?;

    shared.clear_pending();
    let outcome = function
        .call::<_, ()>((
            console,
            require_fn,
            module_obj.clone(),
            exports_obj.clone(),
            file_path,
            dirname.as_str(),
        ))
        .catch(ctx);

    match outcome {
        Ok(()) => {
            let final_exports: Value =
                module_obj.get("exports").map_err(crate::engine::engine_error)?;
            module_obj.set("loaded", true).map_err(crate::engine::engine_error)?;
            shared.cache.update(file_path, Persistent::save(ctx, final_exports.clone()), true);
            Ok(final_exports)
        }
        Err(caught) => {
            // The record stays: partially loaded state is observable,
            // matching Node.
            let text = caught.to_string();
            match shared.take_pending_matching(&text) {
                Some(original) => Err(original),
                None => {
                    Err(RuntimeError::new(ErrorKind::Execution, text).with_context(file_path))
                }
            }
        }
    }
}

fn load_json<'js>(
    shared: &Arc<LoaderShared>,
    ctx: &Ctx<'js>,
    file_path: &str,
    source: &str,
) -> Result<Value<'js>> {
    match ctx.json_parse(source.as_bytes().to_vec()).catch(ctx) {
        Ok(value) => {
            shared.cache.update(file_path, Persistent::save(ctx, value.clone()), true);
            Ok(value)
        }
        Err(caught) => {
            shared.cache.remove(file_path);
            Err(RuntimeError::new(ErrorKind::Parse, caught.to_string()).with_context(file_path))
        }
    }
}

/// Runs source through the transform pipeline when its extension or
/// detected format calls for it, then guarantees a `sourceURL`.
fn prepare_source(
    shared: &Arc<LoaderShared>,
    vfs: &MemFs,
    file_path: &str,
    source: String,
) -> Result<String> {
    let ext = path::extname(file_path)?;
    let transformable = TRANSFORM_EXTENSIONS.contains(&ext.as_str())
        || detect(vfs, file_path) == ModuleFormat::EsModule;
    let code = if transformable {
        shared.transforms.transform(&source, file_path)?.code.clone()
    } else {
        source
    };
    Ok(ensure_source_url(code, file_path))
}

/// Appends the `sourceURL` marker when the text does not carry one,
/// so the host debugger attributes the evaluated text.
pub(crate) fn ensure_source_url(code: String, file_path: &str) -> String {
    if code.contains("//# sourceURL=") {
        code
    } else {
        format!("{code}\n//# sourceURL=vfs://{file_path}")
    }
}

fn wrap_source(prepared: &str) -> String {
    format!(
        "(function (console, require, module, exports, __filename, __dirname) {{\n{prepared}\n}})"
    )
}

/// A `require` bound to the loading file: specifiers resolve relative
/// to it and failures cross the JS boundary as exceptions.
fn bind_require<'js>(
    shared: &Arc<LoaderShared>,
    ctx: &Ctx<'js>,
    from: &str,
) -> Result<Function<'js>> {
    let shared = Arc::clone(shared);
    let from = from.to_owned();
    Function::new(ctx.clone(), move |fctx: Ctx<'js>, spec: String| -> rquickjs::Result<Value<'js>> {
        match require(&shared, &fctx, &spec, &from) {
            Ok(value) => Ok(value),
            Err(err) => {
                let message = err.to_string();
                shared.stash_pending(err);
                Err(Exception::throw_message(&fctx, &message))
            }
        }
    })
    .map_err(crate::engine::engine_error)
}

/// Direct evaluation used when no filesystem is registered: the code
/// still sees the module scope but nothing is cached.
pub(crate) fn execute_inline<'js>(
    shared: &Arc<LoaderShared>,
    ctx: &Ctx<'js>,
    code: &str,
    filename: &str,
) -> Result<Value<'js>> {
    let prepared = ensure_source_url(code.to_owned(), filename);
    let wrapped = wrap_source(&prepared);
    let function = ctx
        .eval::<Function, _>(wrapped)
        .catch(ctx)
        .map_err(|caught| RuntimeError::new(ErrorKind::Parse, caught.to_string()).with_context(filename))?;

    let exports_obj = Object::new(ctx.clone()).map_err(crate::engine::engine_error)?;
    let module_obj = Object::new(ctx.clone()).map_err(crate::engine::engine_error)?;
    module_obj.set("exports", exports_obj.clone()).map_err(crate::engine::engine_error)?;
    module_obj.set("id", filename).map_err(crate::engine::engine_error)?;

    let console: Value = ctx.globals().get("console").map_err(crate::engine::engine_error)?;
    let require_fn = bind_require(shared, ctx, "/")?;

    shared.clear_pending();
    function
        .call::<_, ()>((console, require_fn, module_obj.clone(), exports_obj, filename, "/"))
        .catch(ctx)
        .map_err(|caught| {
            let text = caught.to_string();
            shared
                .take_pending_matching(&text)
                .unwrap_or_else(|| RuntimeError::new(ErrorKind::Execution, text).with_context(filename))
        })?;

    module_obj.get("exports").map_err(crate::engine::engine_error)
}
