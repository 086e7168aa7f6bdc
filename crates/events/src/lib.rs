//! Named in-process events.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventBusError, EventHandler, EventPublisher, PublishError, SubscriptionId};
pub use event::{Event, EventEnvelope};
