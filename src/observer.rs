//! Subscription registry with RAII deregistration handles: listeners are
//! closures registered against a registry, and a returned `Subscription`
//! deregisters the listener when dropped. Callbacks run synchronously on
//! the calling thread and must not block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Listener<T> = Box<dyn FnMut(&T) + Send>;

struct Entry<T> {
    id: u64,
    listener: Listener<T>,
}

/// A registry of listeners for events of type `T`. Cloning shares the same
/// underlying list (it is `Arc`-backed), matching the store's need to hand
/// the same registry to multiple facades.
pub struct ObserverRegistry<T> {
    entries: Arc<Mutex<Vec<Entry<T>>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for ObserverRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<T> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning a handle that deregisters it on drop.
    pub fn subscribe(&self, listener: impl FnMut(&T) + Send + 'static) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().push(Entry {
            id,
            listener: Box::new(listener),
        });
        Subscription {
            id,
            entries: self.entries.clone(),
        }
    }

    /// Notify every live listener, in registration order. Listeners are
    /// invoked with the POST-change state — callers must mutate the store
    /// first and call `notify` after.
    pub fn notify(&self, event: &T) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            (entry.listener)(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAII deregistration handle. Dropping it removes the listener; it can also
/// be dropped early via `unsubscribe`.
#[must_use = "dropping the subscription immediately unsubscribes the listener"]
pub struct Subscription<T> {
    id: u64,
    entries: Arc<Mutex<Vec<Entry<T>>>>,
}

impl<T> Subscription<T> {
    pub fn unsubscribe(self) {
        // drop() does the work; this just gives the call a nicer name.
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.entries.lock().unwrap().retain(|e| e.id != self.id);
    }
}
