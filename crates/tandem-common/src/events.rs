//! Token-based event emitter with synchronous, registration-order dispatch.
//!
//! Listener lifetime is explicit: `subscribe` hands back a token, and the
//! listener stays attached until that token is passed to `unsubscribe`.
//! `emit` runs every handler on the calling thread before it returns, so
//! state mutated ahead of the `emit` call is already visible to every
//! listener.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle identifying one subscription; pass it back to
/// [`EventEmitter::unsubscribe`] to detach the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct EventEmitter<T> {
    /// Keyed by token value; ascending key order is registration order.
    handlers: Mutex<BTreeMap<u64, Handler<T>>>,
    next_token: AtomicU64,
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(BTreeMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Attach a listener. Listeners fire in registration order.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(token, Arc::new(handler));
        SubscriptionToken(token)
    }

    /// Detach a listener. Returns `false` if the token was already gone.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.lock().remove(&token.0).is_some()
    }

    /// Deliver `event` to every listener, in registration order, on the
    /// calling thread. Returns the number of listeners invoked.
    ///
    /// Handlers run outside the registry lock, so a handler may subscribe
    /// or unsubscribe without deadlocking; such changes take effect from
    /// the next emit.
    pub fn emit(&self, event: &T) -> usize {
        let handlers: Vec<Handler<T>> = self.lock().values().cloned().collect();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Handler<T>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
