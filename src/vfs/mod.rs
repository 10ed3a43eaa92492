//! In-memory POSIX filesystem --- [`MemFs`].
//!
//! A single owned tree of file, directory and symlink nodes behind a
//! lock, plus a watcher registry. All operations are synchronous;
//! mutations happen in place and every stored path is canonical.

pub mod node;
pub mod snapshot;
pub mod watch;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::trace;

use crate::error::{ErrorKind, FsErrorKind, Result, RuntimeError};
use crate::path;

use node::{now_millis, Node};
use watch::{WatchEvent, WatchGuard, WatchKind, WatchRegistry};

/// Hop budget for one symlink resolution pass.
pub const MAX_LINK_HOPS: usize = 40;

/// Node classification reported by [`FileStat`] and directory listings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
}

/// Metadata snapshot returned by `stat`/`lstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    pub size: u64,
    pub mode: u32,
    pub ino: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub birthtime: u64,
}

impl FileStat {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    fn of(node: &Node) -> Self {
        let kind = match node {
            Node::File(_) => FileKind::File,
            Node::Dir(_) => FileKind::Dir,
            Node::Symlink(_) => FileKind::Symlink,
        };
        let meta = node.meta();
        Self {
            kind,
            size: meta.size,
            mode: meta.mode,
            ino: meta.ino,
            atime: meta.atime,
            mtime: meta.mtime,
            ctime: meta.ctime,
            birthtime: meta.birthtime,
        }
    }
}

/// Directory entry with its node kind, for `readdir` with file types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

struct FsState {
    root: Node,
}

/// The filesystem facade.
pub struct MemFs {
    state: RwLock<FsState>,
    watch: WatchRegistry,
    generation: AtomicU64,
}

impl std::fmt::Debug for MemFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFs").finish_non_exhaustive()
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self {
            state: RwLock::new(FsState { root: Node::dir() }),
            watch: WatchRegistry::default(),
            generation: AtomicU64::new(0),
        }
    }
}

fn err_not_dir(path: &str) -> RuntimeError {
    RuntimeError::fs(FsErrorKind::NotDirectory, format!("not a directory: {path}"), path)
}

fn err_is_dir(path: &str) -> RuntimeError {
    RuntimeError::fs(
        FsErrorKind::IsDirectory,
        format!("illegal operation on a directory: {path}"),
        path,
    )
}

fn err_exists(path: &str) -> RuntimeError {
    RuntimeError::fs(FsErrorKind::AlreadyExists, format!("file already exists: {path}"), path)
}

fn err_not_empty(path: &str) -> RuntimeError {
    RuntimeError::fs(FsErrorKind::NotEmpty, format!("directory not empty: {path}"), path)
}

fn err_not_permitted(path: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::FsPermission, format!("operation not permitted: {path}"))
        .with_context(path)
}

fn err_too_many_links(path: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::TooManyLinks, format!("too many levels of symbolic links: {path}"))
        .with_context(path)
}

impl FsState {
    /// Direct tree walk over a fully resolved canonical path.
    fn node(&self, canonical: &str) -> Option<&Node> {
        if canonical == "/" {
            return Some(&self.root);
        }
        let mut current = &self.root;
        for segment in canonical[1..].split('/') {
            match current {
                Node::Dir(dir) => current = dir.children.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    fn node_mut(&mut self, canonical: &str) -> Option<&mut Node> {
        if canonical == "/" {
            return Some(&mut self.root);
        }
        let mut current = &mut self.root;
        for segment in canonical[1..].split('/') {
            match current {
                Node::Dir(dir) => current = dir.children.get_mut(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Resolves the parent directory of `canonical`, following
    /// intermediate symlinks. Returns the real parent path plus the
    /// final component name (empty for the root).
    fn resolve_parent(&self, canonical: &str, hops: &mut usize) -> Result<(String, String)> {
        let (parent, name) = path::split(canonical)?;
        if name.is_empty() {
            return Ok(("/".to_owned(), String::new()));
        }
        let parent_real = self.resolve(&parent, true, hops)?;
        match self.node(&parent_real) {
            Some(Node::Dir(_)) => Ok((parent_real, name)),
            Some(_) => Err(err_not_dir(&parent_real)),
            None => Err(RuntimeError::not_found(&parent_real)),
        }
    }

    /// Resolves `canonical` to its real path. Intermediate symlinks
    /// are always followed; the final component only when
    /// `follow_final`. The returned path may name a missing node ---
    /// existence is the caller's concern.
    fn resolve(&self, canonical: &str, follow_final: bool, hops: &mut usize) -> Result<String> {
        if canonical == "/" {
            return Ok("/".to_owned());
        }
        let (parent_real, name) = self.resolve_parent(canonical, hops)?;
        let full = path::join(&[&parent_real, &name])?;
        match self.node(&full) {
            Some(Node::Symlink(link)) if follow_final => {
                *hops += 1;
                if *hops > MAX_LINK_HOPS {
                    return Err(err_too_many_links(canonical));
                }
                let target = Self::link_destination(&parent_real, &link.target)?;
                self.resolve(&target, true, hops)
            }
            _ => Ok(full),
        }
    }

    /// Resolves the write target of `canonical`: a symlink in the
    /// final position redirects the write to its (recursively
    /// resolved) target, which itself may not exist yet.
    fn resolve_write_target(&self, canonical: &str, hops: &mut usize) -> Result<(String, String)> {
        let mut current = canonical.to_owned();
        loop {
            let (parent_real, name) = self.resolve_parent(&current, hops)?;
            if name.is_empty() {
                return Err(err_is_dir("/"));
            }
            let full = path::join(&[&parent_real, &name])?;
            match self.node(&full) {
                Some(Node::Symlink(link)) => {
                    *hops += 1;
                    if *hops > MAX_LINK_HOPS {
                        return Err(err_too_many_links(canonical));
                    }
                    current = Self::link_destination(&parent_real, &link.target)?;
                }
                _ => return Ok((parent_real, name)),
            }
        }
    }

    fn link_destination(parent_real: &str, target: &str) -> Result<String> {
        if target.starts_with('/') {
            path::normalize(target)
        } else {
            path::join(&[parent_real, target])
        }
    }

    fn dir_children_mut(&mut self, canonical: &str) -> &mut indexmap::IndexMap<String, Node> {
        match self.node_mut(canonical) {
            Some(Node::Dir(dir)) => &mut dir.children,
            _ => unreachable!("resolved parent is always a directory"),
        }
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic mutation counter; bumped by every tree change so
    /// path-dependent caches can tell when their entries went stale.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn mark_mutated(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, FsState> {
        self.state.read().expect("vfs state poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, FsState> {
        self.state.write().expect("vfs state poisoned")
    }

    /// Reads a file's bytes, following symlinks, and touches atime.
    pub fn read_file(&self, raw: &str) -> Result<Vec<u8>> {
        let canonical = path::normalize(raw)?;
        let mut state = self.write_state();
        let mut hops = 0;
        let real = state.resolve(&canonical, true, &mut hops)?;
        let node = state.node_mut(&real).ok_or_else(|| RuntimeError::not_found(&canonical))?;
        match node {
            Node::File(file) => {
                file.meta.atime = now_millis();
                Ok(file.data.clone())
            }
            Node::Dir(_) => Err(err_is_dir(&canonical)),
            Node::Symlink(_) => unreachable!("final symlink was followed"),
        }
    }

    /// Reads a file as UTF-8 text.
    pub fn read_to_string(&self, raw: &str) -> Result<String> {
        let bytes = self.read_file(raw)?;
        String::from_utf8(bytes)
            .map_err(|_| RuntimeError::invalid_argument(format!("file is not valid UTF-8: {raw}")))
    }

    /// Writes (creating or truncating) a file. Writes through final
    /// symlinks to their resolved target.
    pub fn write_file(&self, raw: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let canonical = path::normalize(raw)?;
        let data = data.into();
        let event = {
            let mut state = self.write_state();
            let mut hops = 0;
            let (parent_real, name) = state.resolve_write_target(&canonical, &mut hops)?;
            let full = path::join(&[&parent_real, &name])?;
            let children = state.dir_children_mut(&parent_real);
            match children.entry(name) {
                indexmap::map::Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    Node::File(file) => {
                        let now = now_millis();
                        file.meta.size = data.len() as u64;
                        file.meta.mtime = now;
                        file.meta.ctime = now;
                        file.data = data;
                        (full, WatchKind::Change)
                    }
                    Node::Dir(_) => return Err(err_is_dir(&full)),
                    Node::Symlink(_) => unreachable!("write target never ends on a symlink"),
                },
                indexmap::map::Entry::Vacant(vacant) => {
                    vacant.insert(Node::file(data));
                    (full, WatchKind::Rename)
                }
            }
        };
        self.mark_mutated();
        self.watch.notify(&event.0, event.1);
        Ok(())
    }

    /// Appends to a file, creating it when missing.
    pub fn append_file(&self, raw: &str, data: &[u8]) -> Result<()> {
        let canonical = path::normalize(raw)?;
        let event = {
            let mut state = self.write_state();
            let mut hops = 0;
            let (parent_real, name) = state.resolve_write_target(&canonical, &mut hops)?;
            let full = path::join(&[&parent_real, &name])?;
            let children = state.dir_children_mut(&parent_real);
            match children.entry(name) {
                indexmap::map::Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    Node::File(file) => {
                        let now = now_millis();
                        file.data.extend_from_slice(data);
                        file.meta.size = file.data.len() as u64;
                        file.meta.mtime = now;
                        file.meta.ctime = now;
                        (full, WatchKind::Change)
                    }
                    Node::Dir(_) => return Err(err_is_dir(&full)),
                    Node::Symlink(_) => unreachable!("write target never ends on a symlink"),
                },
                indexmap::map::Entry::Vacant(vacant) => {
                    vacant.insert(Node::file(data.to_vec()));
                    (full, WatchKind::Rename)
                }
            }
        };
        self.mark_mutated();
        self.watch.notify(&event.0, event.1);
        Ok(())
    }

    /// Copies file contents; the destination is created or truncated.
    pub fn copy_file(&self, from: &str, to: &str) -> Result<()> {
        let data = self.read_file(from)?;
        self.write_file(to, data)
    }

    /// Creates a directory. With `recursive`, missing ancestors are
    /// created and an existing directory target is not an error.
    pub fn mkdir(&self, raw: &str, recursive: bool) -> Result<()> {
        let canonical = path::normalize(raw)?;
        let mut created: Vec<String> = Vec::new();
        {
            let mut state = self.write_state();
            if recursive {
                let segments: Vec<String> = if canonical == "/" {
                    Vec::new()
                } else {
                    canonical[1..].split('/').map(str::to_owned).collect()
                };
                let mut prefix = "/".to_owned();
                for segment in segments {
                    prefix = path::join(&[&prefix, &segment])?;
                    let mut hops = 0;
                    let real = state.resolve(&prefix, true, &mut hops)?;
                    match state.node(&real) {
                        Some(Node::Dir(_)) => continue,
                        Some(_) => return Err(err_not_dir(&prefix)),
                        None => {
                            let (parent_real, name) = state.resolve_parent(&prefix, &mut hops)?;
                            let direct = path::join(&[&parent_real, &name])?;
                            if state.node(&direct).is_some() {
                                // A dangling symlink occupies this name.
                                return Err(err_exists(&direct));
                            }
                            state.dir_children_mut(&parent_real).insert(name, Node::dir());
                            created.push(real);
                        }
                    }
                }
            } else {
                if canonical == "/" {
                    return Err(err_exists("/"));
                }
                let mut hops = 0;
                let (parent_real, name) = state.resolve_parent(&canonical, &mut hops)?;
                let full = path::join(&[&parent_real, &name])?;
                if state.node(&full).is_some() {
                    return Err(err_exists(&full));
                }
                state.dir_children_mut(&parent_real).insert(name, Node::dir());
                created.push(full);
            }
        }
        if !created.is_empty() {
            self.mark_mutated();
            for dir in created {
                self.watch.notify(&dir, WatchKind::Rename);
            }
        }
        Ok(())
    }

    /// Lists child names in insertion order.
    pub fn readdir(&self, raw: &str) -> Result<Vec<String>> {
        Ok(self.readdir_types(raw)?.into_iter().map(|entry| entry.name).collect())
    }

    /// Lists children with their node kinds, in insertion order.
    pub fn readdir_types(&self, raw: &str) -> Result<Vec<DirEntry>> {
        let canonical = path::normalize(raw)?;
        let state = self.read_state();
        let mut hops = 0;
        let real = state.resolve(&canonical, true, &mut hops)?;
        match state.node(&real) {
            Some(Node::Dir(dir)) => Ok(dir
                .children
                .iter()
                .map(|(name, child)| DirEntry {
                    name: name.clone(),
                    kind: FileStat::of(child).kind,
                })
                .collect()),
            Some(_) => Err(err_not_dir(&canonical)),
            None => Err(RuntimeError::not_found(&canonical)),
        }
    }

    /// Removes a directory. Non-recursive removal requires it to be
    /// empty; the root can only be emptied recursively and is itself
    /// preserved.
    pub fn rmdir(&self, raw: &str, recursive: bool) -> Result<()> {
        let canonical = path::normalize(raw)?;
        let removed = {
            let mut state = self.write_state();
            let mut hops = 0;
            let real = state.resolve(&canonical, true, &mut hops)?;
            if real == "/" {
                if !recursive {
                    return Err(err_not_permitted("/"));
                }
                match &mut state.root {
                    Node::Dir(dir) => dir.children.clear(),
                    _ => unreachable!("root is always a directory"),
                }
                "/".to_owned()
            } else {
                match state.node(&real) {
                    Some(Node::Dir(dir)) => {
                        if !recursive && !dir.children.is_empty() {
                            return Err(err_not_empty(&canonical));
                        }
                    }
                    Some(_) => return Err(err_not_dir(&canonical)),
                    None => return Err(RuntimeError::not_found(&canonical)),
                }
                let (parent, name) = path::split(&real)?;
                state.dir_children_mut(&parent).shift_remove(&name);
                real
            }
        };
        self.mark_mutated();
        self.watch.notify(&removed, WatchKind::Rename);
        Ok(())
    }

    /// Stats a path, following symlinks.
    pub fn stat(&self, raw: &str) -> Result<FileStat> {
        let canonical = path::normalize(raw)?;
        let state = self.read_state();
        let mut hops = 0;
        let real = state.resolve(&canonical, true, &mut hops)?;
        state.node(&real).map(FileStat::of).ok_or_else(|| RuntimeError::not_found(&canonical))
    }

    /// Stats a path without following the final symlink.
    pub fn lstat(&self, raw: &str) -> Result<FileStat> {
        let canonical = path::normalize(raw)?;
        let state = self.read_state();
        let mut hops = 0;
        let real = state.resolve(&canonical, false, &mut hops)?;
        state.node(&real).map(FileStat::of).ok_or_else(|| RuntimeError::not_found(&canonical))
    }

    /// Whether a path resolves to an existing node. Resolution faults
    /// (loops, missing ancestors) read as absence.
    pub fn exists(&self, raw: &str) -> bool {
        let Ok(canonical) = path::normalize(raw) else { return false };
        let state = self.read_state();
        let mut hops = 0;
        match state.resolve(&canonical, true, &mut hops) {
            Ok(real) => state.node(&real).is_some(),
            Err(_) => false,
        }
    }

    /// Changes a node's mode, following symlinks.
    pub fn chmod(&self, raw: &str, mode: u32) -> Result<()> {
        let canonical = path::normalize(raw)?;
        let real = {
            let mut state = self.write_state();
            let mut hops = 0;
            let real = state.resolve(&canonical, true, &mut hops)?;
            let node = state.node_mut(&real).ok_or_else(|| RuntimeError::not_found(&canonical))?;
            let meta = node.meta_mut();
            meta.mode = mode;
            meta.ctime = now_millis();
            real
        };
        self.mark_mutated();
        self.watch.notify(&real, WatchKind::Change);
        Ok(())
    }

    /// Canonical path with every symlink resolved; the final target
    /// must exist.
    pub fn realpath(&self, raw: &str) -> Result<String> {
        let canonical = path::normalize(raw)?;
        let state = self.read_state();
        let mut hops = 0;
        let real = state.resolve(&canonical, true, &mut hops)?;
        if state.node(&real).is_none() {
            return Err(RuntimeError::not_found(&canonical));
        }
        Ok(real)
    }

    /// Removes a file or symlink. Does not follow the final symlink;
    /// directories are refused.
    pub fn unlink(&self, raw: &str) -> Result<()> {
        let canonical = path::normalize(raw)?;
        let removed = {
            let mut state = self.write_state();
            let mut hops = 0;
            let (parent_real, name) = state.resolve_parent(&canonical, &mut hops)?;
            if name.is_empty() {
                return Err(err_not_permitted("/"));
            }
            let full = path::join(&[&parent_real, &name])?;
            match state.node(&full) {
                Some(Node::Dir(_)) => return Err(err_not_permitted(&full)),
                Some(_) => {}
                None => return Err(RuntimeError::not_found(&canonical)),
            }
            state.dir_children_mut(&parent_real).shift_remove(&name);
            full
        };
        self.mark_mutated();
        self.watch.notify(&removed, WatchKind::Rename);
        Ok(())
    }

    /// Moves a node. Final symlinks are moved, not followed. An
    /// existing non-directory destination is replaced.
    pub fn rename(&self, from_raw: &str, to_raw: &str) -> Result<()> {
        let from = path::normalize(from_raw)?;
        let to = path::normalize(to_raw)?;
        let (from_real, to_real) = {
            let mut state = self.write_state();
            let mut hops = 0;
            let (from_parent, from_name) = state.resolve_parent(&from, &mut hops)?;
            if from_name.is_empty() {
                return Err(err_not_permitted("/"));
            }
            let from_full = path::join(&[&from_parent, &from_name])?;
            if state.node(&from_full).is_none() {
                return Err(RuntimeError::not_found(&from));
            }
            let (to_parent, to_name) = state.resolve_parent(&to, &mut hops)?;
            if to_name.is_empty() {
                return Err(err_not_permitted("/"));
            }
            let to_full = path::join(&[&to_parent, &to_name])?;
            if to_full == from_full {
                return Ok(());
            }
            if to_full.starts_with(&format!("{from_full}/")) {
                return Err(RuntimeError::invalid_argument(format!(
                    "cannot move {from_full} into its own subtree {to_full}"
                )));
            }
            if matches!(state.node(&to_full), Some(Node::Dir(_))) {
                return Err(err_is_dir(&to_full));
            }
            let mut moved = state
                .dir_children_mut(&from_parent)
                .shift_remove(&from_name)
                .expect("source presence checked above");
            moved.meta_mut().ctime = now_millis();
            state.dir_children_mut(&to_parent).insert(to_name, moved);
            (from_full, to_full)
        };
        self.mark_mutated();
        self.watch.notify(&from_real, WatchKind::Rename);
        self.watch.notify(&to_real, WatchKind::Rename);
        Ok(())
    }

    /// Creates a symlink at `link_raw` pointing at `target`, stored
    /// verbatim. The link path itself must not exist.
    pub fn symlink(&self, target: &str, link_raw: &str) -> Result<()> {
        if target.is_empty() {
            return Err(RuntimeError::invalid_argument("symlink target must be non-empty"));
        }
        let link = path::normalize(link_raw)?;
        let full = {
            let mut state = self.write_state();
            let mut hops = 0;
            let (parent_real, name) = state.resolve_parent(&link, &mut hops)?;
            if name.is_empty() {
                return Err(err_exists("/"));
            }
            let full = path::join(&[&parent_real, &name])?;
            if state.node(&full).is_some() {
                return Err(err_exists(&full));
            }
            state.dir_children_mut(&parent_real).insert(name, Node::symlink(target));
            full
        };
        self.mark_mutated();
        self.watch.notify(&full, WatchKind::Rename);
        Ok(())
    }

    /// Returns a symlink's stored target. Fails `InvalidArgument` on
    /// non-symlinks.
    pub fn readlink(&self, raw: &str) -> Result<String> {
        let canonical = path::normalize(raw)?;
        let state = self.read_state();
        let mut hops = 0;
        let real = state.resolve(&canonical, false, &mut hops)?;
        match state.node(&real) {
            Some(Node::Symlink(link)) => Ok(link.target.clone()),
            Some(_) => Err(RuntimeError::invalid_argument(format!("not a symlink: {canonical}"))),
            None => Err(RuntimeError::not_found(&canonical)),
        }
    }

    /// Registers a watch listener over `raw` (normalized first).
    pub fn watch_path(
        &self,
        raw: &str,
        recursive: bool,
        listener: impl Fn(&WatchEvent) + Send + Sync + 'static,
    ) -> Result<WatchGuard> {
        let base = path::normalize(raw)?;
        trace!(base = %base, recursive, "watch registered");
        Ok(self.watch.watch(base, recursive, listener))
    }

    /// Delivers the pending watch batch now. The runtime pump calls
    /// this one tick after the first notification of a batch.
    pub fn flush_watch_events(&self) {
        self.watch.flush();
    }

    /// Wake signal raised when a new watch batch starts.
    pub fn watch_wake(&self) -> async_channel::Receiver<()> {
        self.watch.wake_signal()
    }

    /// Empties the tree while preserving the root node itself.
    pub fn clear(&self) -> Result<()> {
        self.rmdir("/", true)
    }

    /// Serializes the whole tree into the snapshot wire format.
    pub fn to_snapshot(&self) -> Vec<u8> {
        let state = self.read_state();
        snapshot::serialize(&state.root)
    }

    /// Reconstructs a filesystem from snapshot bytes.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self> {
        let root = snapshot::deserialize(bytes)?;
        Ok(Self {
            state: RwLock::new(FsState { root }),
            watch: WatchRegistry::default(),
            generation: AtomicU64::new(0),
        })
    }
}
