//! Ready-made producers for subscription resolvers.
//!
//! - [`EventPublisher`] fans one source out to many subscribers.
//! - [`event_channel`] connects a single producer task to one subscription.
//!
//! In both cases the producing side can tell when the subscriber is gone.

use crate::{RpcError, RpcResult};
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{trace, warn};

/// The receiving side of a subscription has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("subscriber disconnected")]
pub struct SubscriberGone;

/// Stream half of [`event_channel`]; return it from a subscription resolver.
pub type EventStream<T> = ReceiverStream<RpcResult<T>>;

/// Create a bounded channel for one subscription.
///
/// # Example
///
/// ```rust,ignore
/// let counter = procedure::<AppContext>().subscription(|_ctx, _: ()| async move {
///     let (tx, stream) = event_channel(16);
///     tokio::spawn(async move {
///         for i in 0..10 {
///             if tx.send(i).await.is_err() {
///                 break; // Subscriber disconnected
///             }
///         }
///     });
///     Ok(stream)
/// });
/// ```
pub fn event_channel<T>(buffer: usize) -> (EventSender<T>, EventStream<T>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (EventSender { tx }, ReceiverStream::new(rx))
}

/// Sending half of [`event_channel`].
#[derive(Debug)]
pub struct EventSender<T> {
    tx: mpsc::Sender<RpcResult<T>>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send> EventSender<T> {
    /// Emit a value, waiting for buffer space.
    pub async fn send(&self, value: T) -> Result<(), SubscriberGone> {
        self.tx.send(Ok(value)).await.map_err(|_| SubscriberGone)
    }

    /// Emit an error. The subscription ends after it.
    pub async fn error(&self, error: RpcError) -> Result<(), SubscriberGone> {
        self.tx.send(Err(error)).await.map_err(|_| SubscriberGone)
    }

    /// Resolves when the subscriber is gone.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Returns true if the subscriber is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Size of the channel buffer.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// A publisher for broadcasting values to every current subscriber.
///
/// Subscribers that fall more than `capacity` values behind skip the values
/// they missed.
#[derive(Debug, Clone)]
pub struct EventPublisher<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventPublisher<T> {
    /// Create a publisher buffering up to `capacity` values per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a value. Returns how many subscribers received it.
    ///
    /// Having no subscribers is not an error; the value is dropped and 0 is
    /// returned.
    pub fn publish(&self, value: T) -> usize {
        match self.sender.send(value) {
            Ok(count) => count,
            Err(_) => {
                trace!("EventPublisher::publish: no active subscribers");
                0
            }
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// A new subscriber stream, suitable as a subscription resolver result.
    pub fn subscribe(&self) -> BoxStream<'static, RpcResult<T>> {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(value) => Some(Ok(value)),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged behind publisher");
                        None
                    }
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (tx, stream) = event_channel::<u32>(4);
        tokio::spawn(async move {
            for i in 0..3 {
                tx.send(i).await.unwrap();
            }
        });
        let values: Vec<u32> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_sender_sees_dropped_stream() {
        let (tx, stream) = event_channel::<u32>(1);
        assert!(!tx.is_closed());
        drop(stream);
        assert!(tx.is_closed());
        assert_eq!(tx.send(1).await, Err(SubscriberGone));
        tx.closed().await;
    }

    #[tokio::test]
    async fn test_publisher_fans_out() {
        let publisher = EventPublisher::<String>::new(8);
        assert_eq!(publisher.publish("nobody".into()), 0);

        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);
        assert_eq!(publisher.publish("hello".into()), 2);

        assert_eq!(a.next().await.unwrap().unwrap(), "hello");
        assert_eq!(b.next().await.unwrap().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_missed_values() {
        let publisher = EventPublisher::<u32>::new(2);
        let mut sub = publisher.subscribe();
        for i in 0..5 {
            publisher.publish(i);
        }
        assert_eq!(sub.next().await.unwrap().unwrap(), 3);
        assert_eq!(sub.next().await.unwrap().unwrap(), 4);
    }
}
