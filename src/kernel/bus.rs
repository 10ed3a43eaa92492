//! Kernel event bus.
//!
//! Handlers are keyed by event name and called in registration order
//! over a snapshot of the list, so a handler may register or remove
//! handlers during delivery. A panic in a non-`error` handler is
//! re-emitted as an `error` event carrying the panic message and the
//! originating event name; panics in `error` handlers are swallowed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

/// Event name reserved for fault delivery.
pub const ERROR_EVENT: &str = "error";

/// Arguments carried by an event.
pub type EventArgs = [serde_json::Value];

type Handler = Arc<dyn Fn(&EventArgs) + Send + Sync>;

/// Token returned by [`EventBus::on`], used to remove the handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<String, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&EventArgs) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .expect("event bus poisoned")
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes one handler; returns whether it was present.
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().expect("event bus poisoned");
        match handlers.get_mut(event) {
            Some(list) => {
                let before = list.len();
                list.retain(|(handler_id, _)| *handler_id != id);
                before != list.len()
            }
            None => false,
        }
    }

    pub fn emit(&self, event: &str, args: &EventArgs) {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.lock().expect("event bus poisoned");
            handlers
                .get(event)
                .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
                .unwrap_or_default()
        };

        for handler in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(args))) {
                if event == ERROR_EVENT {
                    warn!("error handler panicked; swallowing");
                    continue;
                }
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_owned());
                self.emit(
                    ERROR_EVENT,
                    &[
                        serde_json::Value::String(message),
                        serde_json::Value::String(format!("event:{event}")),
                    ],
                );
            }
        }
    }
}
