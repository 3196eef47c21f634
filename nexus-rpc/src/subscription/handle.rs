//! Subscription handle
//!
//! A [`SubscriptionHandle`] owns the producer stream of one subscription. It
//! turns producer items into [`SubscriptionEvent`]s, stops at the first
//! error, and drops the producer as soon as the subscription is cancelled.

use super::event::SubscriptionEvent;
use super::id::SubscriptionId;
use super::signal::CancellationSignal;
use crate::RpcError;
use crate::middleware::ValueStream;
use crate::router::ProcedurePath;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tracing::{debug, trace};

type Guarded = BoxStream<'static, Result<crate::RpcResult<serde_json::Value>, Box<dyn Any + Send>>>;

/// A live subscription.
///
/// Poll it as a [`Stream`] of [`SubscriptionEvent`]s. The stream ends after
/// `Completed`, after `Error`, or right away once cancelled. Dropping the
/// handle cancels the subscription.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    path: ProcedurePath,
    signal: CancellationSignal,
    producer: Option<Guarded>,
    cancelled: BoxFuture<'static, ()>,
    finished: Arc<AtomicBool>,
    next_seq: u64,
}

impl SubscriptionHandle {
    pub(crate) fn new(path: ProcedurePath, signal: CancellationSignal, values: ValueStream) -> Self {
        let id = SubscriptionId::new();
        debug!(subscription_id = %id, path = %path, "Subscription started");
        Self {
            id,
            path,
            cancelled: Box::pin(signal.cancelled_owned()),
            signal,
            producer: Some(AssertUnwindSafe(values).catch_unwind().boxed()),
            finished: Arc::new(AtomicBool::new(false)),
            next_seq: 0,
        }
    }

    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Path of the subscribed procedure.
    pub fn path(&self) -> &ProcedurePath {
        &self.path
    }

    /// Signal shared with the call. Cancelling it ends the subscription.
    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Returns true if the subscription has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Returns true once no further events will be produced.
    pub fn is_finished(&self) -> bool {
        self.producer.is_none()
    }

    /// Cancel the subscription and drop the producer immediately.
    pub fn cancel(&mut self) {
        self.signal.cancel();
        self.release("cancelled");
    }

    /// Flag set once the producer has been released, for any reason.
    pub(crate) fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    fn release(&mut self, reason: &'static str) {
        if self.producer.take().is_some() {
            self.finished.store(true, Ordering::SeqCst);
            debug!(
                subscription_id = %self.id,
                path = %self.path,
                events = self.next_seq,
                reason,
                "Subscription producer released"
            );
        }
    }

    fn finish(&mut self, event: SubscriptionEvent, reason: &'static str) -> Poll<Option<SubscriptionEvent>> {
        self.release(reason);
        Poll::Ready(Some(event))
    }
}

impl Stream for SubscriptionHandle {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.producer.is_none() {
            return Poll::Ready(None);
        }
        if this.signal.is_cancelled() || this.cancelled.as_mut().poll(cx).is_ready() {
            this.release("cancelled");
            return Poll::Ready(None);
        }

        let Some(producer) = this.producer.as_mut() else {
            return Poll::Ready(None);
        };
        match producer.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(Ok(data)))) => {
                let seq = this.next_seq;
                this.next_seq += 1;
                trace!(subscription_id = %this.id, seq, "Subscription event");
                Poll::Ready(Some(SubscriptionEvent::Data { seq, data }))
            }
            Poll::Ready(Some(Ok(Err(error)))) => {
                debug!(subscription_id = %this.id, error_code = %error.code, "Subscription failed");
                let error = error.or_path(&this.path.to_string());
                this.finish(SubscriptionEvent::Error { error }, "error")
            }
            Poll::Ready(Some(Err(payload))) => {
                let error = RpcError::from_panic(payload).with_path(this.path.to_string());
                this.finish(SubscriptionEvent::Error { error }, "panic")
            }
            Poll::Ready(None) => this.finish(SubscriptionEvent::Completed, "completed"),
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.producer.is_some() {
            self.signal.cancel();
            self.release("dropped");
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("cancelled", &self.signal.is_cancelled())
            .field("finished", &self.producer.is_none())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}
