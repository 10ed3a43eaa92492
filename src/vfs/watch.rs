//! Path watch registrations and batched event delivery.
//!
//! Mutating filesystem calls push `(path, kind)` pairs into a pending
//! queue. The first push since the last flush raises a wake signal;
//! the runtime drains that signal one scheduling tick later and calls
//! [`WatchRegistry::flush`], which dedupes events per path and fans
//! them out to matching registrations. Tests may call `flush`
//! directly for deterministic delivery.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_queue::SegQueue;
use indexmap::IndexMap;
use tracing::warn;

use crate::path;

/// Event classification, mirroring the two Node watcher event names.
///
/// Namespace-shape changes (create, remove, rename) are `Rename`;
/// content updates are `Change`. When both hit one path inside a
/// single batch, `Rename` wins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WatchKind {
    Change,
    Rename,
}

/// A single delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchKind,
}

type Listener = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

struct WatchEntry {
    id: u64,
    base: String,
    recursive: bool,
    listener: Listener,
}

fn covers(base: &str, recursive: bool, event_path: &str) -> bool {
    if base == event_path {
        return true;
    }
    if recursive {
        base == "/" || event_path.starts_with(&format!("{base}/"))
    } else {
        path::dirname(event_path).map(|parent| parent == base).unwrap_or(false)
    }
}

/// Ordered list of registrations plus the pending event queue.
pub struct WatchRegistry {
    entries: Arc<Mutex<Vec<WatchEntry>>>,
    pending: SegQueue<(String, WatchKind)>,
    scheduled: AtomicBool,
    wake_tx: async_channel::Sender<()>,
    wake_rx: async_channel::Receiver<()>,
    next_id: AtomicU64,
}

impl Default for WatchRegistry {
    fn default() -> Self {
        let (wake_tx, wake_rx) = async_channel::unbounded();
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            pending: SegQueue::new(),
            scheduled: AtomicBool::new(false),
            wake_tx,
            wake_rx,
            next_id: AtomicU64::new(1),
        }
    }
}

impl WatchRegistry {
    /// Registers a listener for `base`. The base must already be
    /// canonical; the facade normalizes before calling in.
    pub fn watch(
        &self,
        base: String,
        recursive: bool,
        listener: impl Fn(&WatchEvent) + Send + Sync + 'static,
    ) -> WatchGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = WatchEntry { id, base, recursive, listener: Arc::new(listener) };
        self.entries.lock().expect("watch registry poisoned").push(entry);
        WatchGuard { id, entries: Arc::clone(&self.entries), closed: false }
    }

    /// Queues an event and raises the wake signal on the first event
    /// of a new batch.
    pub fn notify(&self, path: &str, kind: WatchKind) {
        self.pending.push((path.to_owned(), kind));
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            let _ = self.wake_tx.try_send(());
        }
    }

    /// Receiver for flush wake signals; drained by the runtime pump.
    pub fn wake_signal(&self) -> async_channel::Receiver<()> {
        self.wake_rx.clone()
    }

    /// Drains the pending queue and delivers the deduped batch.
    ///
    /// Delivery order is FIFO by first occurrence of each path.
    /// Listener panics are caught and logged.
    pub fn flush(&self) {
        self.scheduled.store(false, Ordering::Release);

        let mut batch: IndexMap<String, WatchKind> = IndexMap::new();
        while let Some((path, kind)) = self.pending.pop() {
            match batch.get_mut(&path) {
                Some(existing) => {
                    if kind == WatchKind::Rename {
                        *existing = WatchKind::Rename;
                    }
                }
                None => {
                    batch.insert(path, kind);
                }
            }
        }
        if batch.is_empty() {
            return;
        }

        let snapshot: Vec<(u64, String, bool, Listener)> = {
            let entries = self.entries.lock().expect("watch registry poisoned");
            entries
                .iter()
                .map(|e| (e.id, e.base.clone(), e.recursive, Arc::clone(&e.listener)))
                .collect()
        };

        for (path, kind) in batch {
            let event = WatchEvent { path, kind };
            for (id, base, recursive, listener) in &snapshot {
                if !covers(base, *recursive, &event.path) {
                    continue;
                }
                if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                    warn!(path = %event.path, watcher = *id, "watch listener panicked");
                }
            }
        }
    }
}

/// Handle returned by [`WatchRegistry::watch`]; dropping it closes
/// the registration.
pub struct WatchGuard {
    id: u64,
    entries: Arc<Mutex<Vec<WatchEntry>>>,
    closed: bool,
}

impl WatchGuard {
    /// Removes the registration; pending events are no longer
    /// delivered to it.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut entries = self.entries.lock().expect("watch registry poisoned");
        entries.retain(|entry| entry.id != self.id);
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.close();
    }
}
