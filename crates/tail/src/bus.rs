//! Subscription registry and event fan-out.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use storage::{MessageType, NormalizedEvent};
use tracing::{error, warn};

/// Error returned by a handler. Logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = std::result::Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Source, &NormalizedEvent) -> HandlerResult + Send + Sync>;

/// Context passed to every handler alongside the event.
#[derive(Debug, Clone)]
pub struct Source {
    pub self_handle: String,
    pub store: PathBuf,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Source self={:?} store={:?}>",
            self.self_handle,
            self.store.display().to_string()
        )
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// Every event.
    All,
    Type(MessageType),
}

impl From<MessageType> for EventKey {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::All => EventKey::All,
            kind => EventKey::Type(kind),
        }
    }
}

impl From<i64> for EventKey {
    fn from(code: i64) -> Self {
        MessageType::from(code).into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    handler: Handler,
    once: bool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_key: HashMap<EventKey, Vec<Entry>>,
}

impl Registry {
    fn add(&mut self, key: EventKey, handler: Handler, once: bool) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.by_key
            .entry(key)
            .or_default()
            .push(Entry { id, handler, once });
        id
    }

    /// Handlers for `key` in subscription order; one-shot entries are
    /// removed as they are taken.
    fn take(&mut self, key: EventKey, out: &mut Vec<(SubscriptionId, Handler)>) {
        let Some(entries) = self.by_key.get_mut(&key) else {
            return;
        };
        out.extend(entries.iter().map(|e| (e.id, Arc::clone(&e.handler))));
        entries.retain(|e| !e.once);
    }
}

/// Maps event keys to ordered handler lists.
///
/// Publishing runs wildcard handlers first, then handlers for the event's
/// type, each group in subscription order. A failing or panicking handler
/// is logged and skipped; it stays subscribed.
#[derive(Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`. One-shot handlers are removed after
    /// their first invocation.
    pub fn subscribe<F>(&self, key: impl Into<EventKey>, once: bool, handler: F) -> SubscriptionId
    where
        F: Fn(&Source, &NormalizedEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.lock().add(key.into(), Arc::new(handler), once)
    }

    /// Register one handler under several keys.
    pub fn subscribe_many<F, K>(
        &self,
        keys: impl IntoIterator<Item = K>,
        once: bool,
        handler: F,
    ) -> Vec<SubscriptionId>
    where
        F: Fn(&Source, &NormalizedEvent) -> HandlerResult + Send + Sync + 'static,
        K: Into<EventKey>,
    {
        let handler: Handler = Arc::new(handler);
        let mut registry = self.registry.lock();
        keys.into_iter()
            .map(|key| registry.add(key.into(), Arc::clone(&handler), once))
            .collect()
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock();
        for entries in registry.by_key.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, key: impl Into<EventKey>) -> usize {
        self.registry
            .lock()
            .by_key
            .get(&key.into())
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to its subscribers. Returns how many handlers ran.
    pub fn publish(&self, source: &Source, event: &NormalizedEvent) -> usize {
        let mut handlers = Vec::new();
        {
            let mut registry = self.registry.lock();
            registry.take(EventKey::All, &mut handlers);
            if let key @ EventKey::Type(_) = EventKey::from(event.kind) {
                registry.take(key, &mut handlers);
            }
        }

        for (id, handler) in &handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(source, event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    subscription = id.0,
                    table = %event.table,
                    local_id = event.id,
                    error = %e,
                    "handler failed"
                ),
                Err(payload) => error!(
                    subscription = id.0,
                    table = %event.table,
                    local_id = event.id,
                    panic = panic_message(payload.as_ref()),
                    "handler panicked"
                ),
            }
        }
        handlers.len()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
