//! Subscriptions
//!
//! A subscription call resolves to a [`SubscriptionHandle`]: a stream of
//! [`SubscriptionEvent`]s backed by the resolver's producer and tied to a
//! [`CancellationSignal`]. Cancelling the signal (or dropping the handle)
//! stops delivery and drops the producer, which in turn lets producers built
//! on [`event_channel`] or [`EventPublisher`] notice the subscriber is gone.

mod event;
mod handle;
mod id;
mod manager;
mod publisher;
mod signal;

pub use event::SubscriptionEvent;
pub use handle::SubscriptionHandle;
pub use id::{ParseError, SubscriptionId};
pub use manager::SubscriptionManager;
pub use publisher::{EventPublisher, EventSender, EventStream, SubscriberGone, event_channel};
pub use signal::CancellationSignal;
