//! Synchronous in-process publish/subscribe.
//!
//! Handlers are keyed by event name and run in subscription order on the
//! publisher's thread. A failing handler does not stop the others; every
//! failure is collected into one [`PublishError`].
//!
//! ## Delivery
//!
//! - **Synchronous**: [`EventBus::publish`] returns after every handler ran.
//! - **Ordered per name**: handlers for one event name run in the order they
//!   subscribed. There is no ordering across names.
//! - **No subscribers is fine**: publishing an event nobody listens to is a
//!   no-op and returns `Ok`.
//! - **No persistence**: an event published before a handler subscribed is
//!   never delivered to it.
//!
//! ## Subscriptions
//!
//! Every [`EventBus::subscribe`] returns a fresh [`SubscriptionId`]; the same
//! closure subscribed twice runs twice. The id is the only handle for
//! [`EventBus::unsubscribe`]. Event names must be non-empty.
//!
//! ```ignore
//! let id = bus.subscribe("user.created", |event: &dyn Event| {
//!     tracing::info!(payload = %event.payload(), "user created");
//!     Ok(())
//! })?;
//! bus.publish(&EventEnvelope::new("user.created", json!({ "id": 1 })))?;
//! bus.unsubscribe("user.created", id)?;
//! ```
//!
//! ## Reentrancy
//!
//! Handlers run on a snapshot of the handler list taken under the read lock,
//! and the lock is released before the first handler runs. A handler may
//! therefore publish, subscribe or unsubscribe without deadlocking; changes
//! take effect from the next publish.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;

use crate::event::Event;

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync>;

/// Identity of one subscription, used to unsubscribe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

#[derive(Debug, Error)]
#[error("{} handler(s) failed for event `{event}`: {}", .failures.len(), join(.failures))]
pub struct PublishError {
    pub event: String,
    pub failures: Vec<anyhow::Error>,
}

fn join(failures: &[anyhow::Error]) -> String {
    failures
        .iter()
        .map(|e| format!("{e:#}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("event name cannot be empty")]
    EmptyEventName,

    #[error("event not found: {0}")]
    EventNotFound(String),

    #[error("handler {id:?} not found for event {event}")]
    HandlerNotFound { event: String, id: SubscriptionId },

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Default)]
struct Inner {
    handlers: HashMap<String, Vec<(SubscriptionId, EventHandler)>>,
    next_id: u64,
}

#[derive(Default)]
pub struct EventBus {
    inner: RwLock<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event: &str, handler: F) -> Result<SubscriptionId, EventBusError>
    where
        F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if event.is_empty() {
            return Err(EventBusError::EmptyEventName);
        }
        let mut inner = self.write();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner
            .handlers
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        tracing::debug!(event, subscription = id.0, "handler subscribed");
        Ok(id)
    }

    /// Deliver `event` to every handler subscribed to its name.
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while running.
    pub fn publish(&self, event: &dyn Event) -> Result<(), EventBusError> {
        let handlers: Vec<EventHandler> = self
            .read()
            .handlers
            .get(event.name())
            .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        tracing::trace!(event = event.name(), handlers = handlers.len(), "publishing event");

        let failures: Vec<anyhow::Error> = handlers.iter().filter_map(|h| h(event).err()).collect();
        if failures.is_empty() {
            return Ok(());
        }
        tracing::warn!(event = event.name(), failed = failures.len(), "event handlers failed");
        Err(PublishError {
            event: event.name().to_string(),
            failures,
        }
        .into())
    }

    pub fn unsubscribe(&self, event: &str, id: SubscriptionId) -> Result<(), EventBusError> {
        let mut inner = self.write();
        let subs = inner
            .handlers
            .get_mut(event)
            .ok_or_else(|| EventBusError::EventNotFound(event.to_string()))?;
        let position = subs
            .iter()
            .position(|(sub, _)| *sub == id)
            .ok_or_else(|| EventBusError::HandlerNotFound {
                event: event.to_string(),
                id,
            })?;
        subs.remove(position);
        Ok(())
    }

    /// Drop every handler of `event`.
    pub fn clear(&self, event: &str) -> Result<(), EventBusError> {
        self.write()
            .handlers
            .remove(event)
            .map(|_| ())
            .ok_or_else(|| EventBusError::EventNotFound(event.to_string()))
    }

    pub fn clear_all(&self) {
        self.write().handlers.clear();
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.read().handlers.get(event).map_or(0, Vec::len)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishing side of the bus, for code that should not subscribe.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &dyn Event) -> Result<(), EventBusError>;
}

impl EventPublisher for EventBus {
    fn publish(&self, event: &dyn Event) -> Result<(), EventBusError> {
        EventBus::publish(self, event)
    }
}

impl<B> EventPublisher for Arc<B>
where
    B: EventPublisher + ?Sized,
{
    fn publish(&self, event: &dyn Event) -> Result<(), EventBusError> {
        (**self).publish(event)
    }
}
