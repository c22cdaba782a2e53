//! In-process publish/subscribe registry for collection events.
//!
//! Each collection handle owns at most one [`EventHub`], created lazily on
//! the first listener registration. The registry is internally
//! synchronized, so concurrent registration, removal, and emission against
//! the same handle are safe.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::document::{Query, UpdateDoc};

/// Event name under which mutation notifications are emitted.
pub const OP_EVENT: &str = "op";

/// A mutation notification.
///
/// Invariant: `query` (the residual query) never contains the identifier
/// field; the id is carried separately in canonical string form.
#[derive(Debug, Clone, PartialEq)]
pub struct OpEvent {
    /// Canonical string form of the mutated document's identifier.
    pub id: String,
    /// The caller's search criteria, minus the identifier field.
    pub query: Query,
    /// The mutation, exactly as the caller supplied it.
    pub op: UpdateDoc,
}

/// Token identifying a registered listener.
///
/// Closures are not comparable, so removal goes through the token returned
/// at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&OpEvent) + Send + Sync + 'static>;

struct Entry {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

/// Multi-consumer observer registry keyed by event name.
///
/// Listener invocation order equals registration order. `once` listeners
/// are deregistered under the lock before any listener runs, so a
/// recursive emit from inside a listener cannot invoke them twice. A
/// panicking listener is isolated and counted; the remaining listeners
/// still run.
pub struct EventHub {
    listeners: Mutex<HashMap<String, Vec<Arc<Entry>>>>,
    next_id: AtomicU64,
    panicked: AtomicU64,
}

impl EventHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            panicked: AtomicU64::new(0),
        }
    }

    /// Registers a persistent listener. Returns its removal token.
    pub fn on(
        &self,
        event: &str,
        listener: impl Fn(&OpEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(event, false, Box::new(listener))
    }

    /// Registers a one-shot listener. Returns its removal token.
    ///
    /// The listener is invoked at most once across any number of
    /// subsequent emissions.
    pub fn once(
        &self,
        event: &str,
        listener: impl Fn(&OpEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(event, true, Box::new(listener))
    }

    fn register(&self, event: &str, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry { id, once, listener });
        self.lock()
            .entry(event.to_string())
            .or_default()
            .push(entry);
        id
    }

    /// Emits an event to every registered listener, in registration order.
    ///
    /// Returns the number of listeners invoked. Emission with no listeners
    /// is a no-op.
    pub fn emit(&self, event: &str, payload: &OpEvent) -> usize {
        let snapshot = {
            let mut guard = self.lock();
            let Some(entries) = guard.get_mut(event) else {
                return 0;
            };
            let snapshot = entries.clone();
            // Drop one-shot entries before any listener runs: a recursive
            // emit from inside a listener must not see them again.
            entries.retain(|entry| !entry.once);
            if entries.is_empty() {
                guard.remove(event);
            }
            snapshot
        };

        for entry in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| (entry.listener)(payload))).is_err() {
                self.panicked.fetch_add(1, Ordering::Relaxed);
            }
        }
        snapshot.len()
    }

    /// Removes a single listener. Returns whether it was registered.
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut guard = self.lock();
        let Some(entries) = guard.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            guard.remove(event);
        }
        removed
    }

    /// Removes every listener for an event.
    pub fn remove_all_listeners(&self, event: &str) {
        self.lock().remove(event);
    }

    /// Number of listeners currently registered for an event.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Number of listener invocations that panicked and were isolated.
    #[must_use]
    pub fn panicked_listeners(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Arc<Entry>>>> {
        // Listeners never run under the lock, so a poisoned registry still
        // holds a consistent map.
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("events", &self.lock().len())
            .field("panicked", &self.panicked.load(Ordering::Relaxed))
            .finish()
    }
}
