//! jsbox - an embeddable Node-compatible JavaScript runtime substrate.
//!
//! The crate provides the execution core of a browser-style Node
//! runtime: a plugin micro-kernel, an in-memory POSIX filesystem with
//! symlinks, snapshots and watchers, a Node-compatible module
//! resolver, and a hybrid module loader (synchronous CommonJS plus
//! asynchronous ES modules) over an embedded QuickJS engine. API
//! shims, package management and persistence backends plug in as
//! plugins through the [`kernel`].

pub mod builtins;
pub mod config;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod loader;
pub mod path;
pub mod resolver;
pub mod runtime;
pub mod transform;
pub mod vfs;

pub use config::{RuntimeConfig, TrustMode};
pub use engine::{ConsoleEntry, ModuleExports};
pub use error::{ErrorKind, FsErrorKind, Result, RuntimeError};
pub use kernel::{Kernel, Plugin, VfsPlugin};
pub use runtime::{ExecuteOutcome, Runtime, RuntimeBuilder};
pub use vfs::MemFs;
