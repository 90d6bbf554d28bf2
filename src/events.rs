//! Generic typed event bus shared by the network detector and sync engine,
//! replacing the source's mutable per-event-type listener sets (Design Notes, §9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub type Listener<E> = Box<dyn Fn(&E) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A cancellation handle returned by [`Publisher::subscribe`]. Dropping it
/// does *not* unsubscribe — call [`Publisher::unsubscribe`] explicitly, since
/// the publisher may outlive any individual subscription handle.
#[derive(Debug, Clone, Copy)]
pub struct Subscription(pub ListenerId);

pub struct Publisher<E> {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<ListenerId, Listener<E>>>,
}

impl<E> Default for Publisher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Publisher<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .expect("publisher lock poisoned")
            .insert(id, Box::new(listener));
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.listeners
            .write()
            .expect("publisher lock poisoned")
            .remove(&subscription.0);
    }

    /// Emit `event` to every listener. A listener is run inside a
    /// `catch_unwind` boundary so a panicking (Rust's closest analogue to a
    /// "throwing" callback) listener is caught, logged at `warn`, and never
    /// propagates into the publisher or the other listeners.
    pub fn emit(&self, event: E) {
        let listeners = self.listeners.read().expect("publisher lock poisoned");
        for listener in listeners.values() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&event)));
            if let Err(_panic) = result {
                log::warn!("event listener panicked; ignoring");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().expect("publisher lock poisoned").len()
    }
}

pub type SharedPublisher<E> = Arc<Publisher<E>>;
