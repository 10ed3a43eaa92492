//! Tree node allocation and metadata.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

/// Default mode for regular files.
pub const FILE_MODE: u32 = 0o644;
/// Default mode for directories.
pub const DIR_MODE: u32 = 0o755;
/// Default mode for symbolic links.
pub const SYMLINK_MODE: u32 = 0o777;

static INODE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_inode() -> u64 {
    INODE_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Rewinds the process-wide inode counter. Test determinism only.
pub fn reset_inode_counter() {
    INODE_COUNTER.store(1, Ordering::Relaxed);
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Per-node metadata. All timestamps are in milliseconds.
#[derive(Debug, Clone)]
pub struct Meta {
    pub size: u64,
    pub mode: u32,
    pub ino: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub birthtime: u64,
}

impl Meta {
    fn new(size: u64, mode: u32) -> Self {
        let now = now_millis();
        Self { size, mode, ino: next_inode(), atime: now, mtime: now, ctime: now, birthtime: now }
    }
}

/// A regular file: owned bytes plus metadata.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub meta: Meta,
    pub data: Vec<u8>,
}

/// A directory: insertion-ordered children keyed by name.
///
/// Names never contain `/`; enumeration order is insertion order but
/// lookup semantics are those of a set keyed by name.
#[derive(Debug, Clone)]
pub struct DirNode {
    pub meta: Meta,
    pub children: IndexMap<String, Node>,
}

/// A symbolic link holding its (possibly relative) target verbatim.
#[derive(Debug, Clone)]
pub struct SymlinkNode {
    pub meta: Meta,
    pub target: String,
}

/// Filesystem node variants.
#[derive(Debug, Clone)]
pub enum Node {
    File(FileNode),
    Dir(DirNode),
    Symlink(SymlinkNode),
}

impl Node {
    pub fn file(data: Vec<u8>) -> Self {
        let meta = Meta::new(data.len() as u64, FILE_MODE);
        Node::File(FileNode { meta, data })
    }

    pub fn dir() -> Self {
        Node::Dir(DirNode { meta: Meta::new(0, DIR_MODE), children: IndexMap::new() })
    }

    pub fn symlink(target: impl Into<String>) -> Self {
        Node::Symlink(SymlinkNode { meta: Meta::new(0, SYMLINK_MODE), target: target.into() })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, Node::Symlink(_))
    }

    pub fn meta(&self) -> &Meta {
        match self {
            Node::File(file) => &file.meta,
            Node::Dir(dir) => &dir.meta,
            Node::Symlink(link) => &link.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        match self {
            Node::File(file) => &mut file.meta,
            Node::Dir(dir) => &mut dir.meta,
            Node::Symlink(link) => &mut link.meta,
        }
    }
}
