//! Node-compatible module resolution --- [`Resolver`].
//!
//! Turns a raw specifier plus the requesting file into a builtin name
//! or a canonical file path inside the virtual filesystem. Builtins
//! win, then relative and absolute specifiers with file probing, then
//! the `node_modules` walk with package manifest interpretation.

pub mod format;
pub mod package;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use tracing::{debug, trace};

use crate::builtins::BuiltinRegistry;
use crate::error::{Result, RuntimeError};
use crate::path;
use crate::vfs::MemFs;

pub use format::{detect, ModuleFormat};
pub use package::DEFAULT_CONDITIONS;

/// Extensions probed, in order, when a specifier has no exact match.
pub const EXTENSION_PROBES: [&str; 7] = [".ts", ".tsx", ".js", ".jsx", ".json", ".mjs", ".cjs"];

/// Index files probed, in order, when a specifier names a directory.
pub const INDEX_PROBES: [&str; 6] =
    ["index.ts", "index.tsx", "index.js", "index.jsx", "index.mjs", "index.cjs"];

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A host-supplied module identified by bare name.
    Builtin(String),
    /// A canonical absolute path of an existing file.
    File(String),
}

fn is_file(vfs: &MemFs, candidate: &str) -> bool {
    vfs.stat(candidate).map(|stat| stat.is_file()).unwrap_or(false)
}

fn is_dir(vfs: &MemFs, candidate: &str) -> bool {
    vfs.stat(candidate).map(|stat| stat.is_dir()).unwrap_or(false)
}

/// File probing: the exact candidate, then each extension in
/// [`EXTENSION_PROBES`] order, then index files for directories.
pub fn probe_file(vfs: &MemFs, candidate: &str) -> Option<String> {
    if is_file(vfs, candidate) {
        return Some(candidate.to_owned());
    }
    for ext in EXTENSION_PROBES {
        let with_ext = format!("{candidate}{ext}");
        if is_file(vfs, &with_ext) {
            return Some(with_ext);
        }
    }
    if is_dir(vfs, candidate) {
        for index in INDEX_PROBES {
            let Ok(indexed) = path::join(&[candidate, index]) else { continue };
            if is_file(vfs, &indexed) {
                return Some(indexed);
            }
        }
    }
    None
}

/// Directory the requester resolves relative specifiers against. A
/// trailing slash marks the requester as a directory itself.
fn requester_dir(from: &str) -> Result<String> {
    if from.ends_with('/') {
        path::normalize(from)
    } else {
        path::dirname(from)
    }
}

/// Splits a bare specifier into package name and `.`-rooted subpath,
/// keeping a leading `@scope/name` pair together.
fn split_bare(spec: &str) -> (String, String) {
    let segments: Vec<&str> = spec.split('/').collect();
    let keep = if spec.starts_with('@') && segments.len() >= 2 { 2 } else { 1 };
    let name = segments[..keep.min(segments.len())].join("/");
    let rest = &segments[keep.min(segments.len())..];
    let subpath =
        if rest.is_empty() { ".".to_owned() } else { format!("./{}", rest.join("/")) };
    (name, subpath)
}

/// Specifier resolution with a `(specifier, requester)` keyed cache.
pub struct Resolver {
    cache: Cache<(String, String), Resolved>,
    conditions: Vec<String>,
    seen_generation: AtomicU64,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::with_conditions(DEFAULT_CONDITIONS.iter().map(|c| c.to_string()).collect())
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver with a custom host condition list for `exports`.
    pub fn with_conditions(conditions: Vec<String>) -> Self {
        Self {
            cache: Cache::new(4096),
            conditions,
            seen_generation: AtomicU64::new(0),
        }
    }

    /// Drops every cached resolution.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Resolves `spec` as required from `from`.
    ///
    /// Builtin hits bypass the cache; filesystem-dependent results are
    /// cached and flushed whenever the tree's generation moves.
    pub fn resolve(
        &self,
        vfs: &MemFs,
        builtins: &BuiltinRegistry,
        spec: &str,
        from: &str,
    ) -> Result<Resolved> {
        if spec.is_empty() {
            return Err(RuntimeError::invalid_argument("specifier must be a non-empty string"));
        }

        if builtins.contains(spec) {
            return Ok(Resolved::Builtin(spec.to_owned()));
        }
        if let Some(bare) = spec.strip_prefix("node:") {
            if builtins.contains(bare) {
                return Ok(Resolved::Builtin(bare.to_owned()));
            }
        }

        let generation = vfs.generation();
        if self.seen_generation.swap(generation, Ordering::AcqRel) != generation {
            trace!(generation, "vfs changed; flushing resolution cache");
            self.cache.invalidate_all();
        }

        let key = (spec.to_owned(), from.to_owned());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let resolved = self.resolve_uncached(vfs, spec, from)?;
        debug!(spec, from, ?resolved, "resolved specifier");
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    fn resolve_uncached(&self, vfs: &MemFs, spec: &str, from: &str) -> Result<Resolved> {
        if spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/') {
            let candidate = if spec.starts_with('/') {
                path::normalize(spec)?
            } else {
                let base = requester_dir(from)?;
                path::join(&[&base, spec])?
            };
            return probe_file(vfs, &candidate)
                .map(Resolved::File)
                .ok_or_else(|| RuntimeError::module_not_found(spec).with_context(from));
        }

        self.resolve_bare(vfs, spec, from)
    }

    /// The `node_modules` walk from the requester's directory toward
    /// the root.
    fn resolve_bare(&self, vfs: &MemFs, spec: &str, from: &str) -> Result<Resolved> {
        let (name, subpath) = split_bare(spec);
        let conditions: Vec<&str> = self.conditions.iter().map(String::as_str).collect();

        let mut dir = requester_dir(from)?;
        loop {
            let package_dir = path::join(&[&dir, "node_modules", &name])?;
            if is_dir(vfs, &package_dir) {
                trace!(package_dir = %package_dir, subpath = %subpath, "probing package");
                if let Some(found) =
                    package::resolve_in_package(vfs, &package_dir, &subpath, &conditions)
                {
                    return Ok(Resolved::File(found));
                }
            }
            if dir == "/" {
                break;
            }
            dir = path::dirname(&dir)?;
        }

        Err(RuntimeError::module_not_found(spec).with_context(from))
    }
}
