//! Typed publish/subscribe channel for sync events.
//!
//! Async consumers hold a [`tokio::sync::broadcast`] receiver; synchronous
//! handlers register per [`EventKind`] and run inline on the publishing task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::models::event::{EventKind, SyncEvent};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub type EventHandler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>,
}

pub struct EventBus {
    sender: broadcast::Sender<Arc<SyncEvent>>,
    registry: RwLock<HandlerRegistry>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            registry: RwLock::new(HandlerRegistry::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Delivers `event` to every handler registered for its kind and to all
    /// async receivers. Returns the number of async receivers reached.
    pub fn publish(&self, event: SyncEvent) -> usize {
        let kind = event.kind();
        let event = Arc::new(event);

        let handlers: Vec<EventHandler> = {
            let registry = self
                .registry
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registry
                .handlers
                .get(&kind)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(&event);
        }

        let receivers = self.sender.send(event).unwrap_or(0);
        debug!(?kind, handlers = handlers.len(), receivers, "event published");
        receivers
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(?kind, ?id, "handler subscribed");
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut removed = false;
        for list in registry.handlers.values_mut() {
            let before = list.len();
            list.retain(|(existing, _)| *existing != id);
            removed |= list.len() != before;
        }
        removed
    }

    pub fn receiver(&self) -> broadcast::Receiver<Arc<SyncEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish_non_exhaustive()
    }
}
