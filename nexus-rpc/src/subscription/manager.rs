//! Subscription manager for tracking live subscriptions.
//!
//! Transports register each [`SubscriptionHandle`] they hand out so that a
//! later "unsubscribe" message, or a shutdown, can cancel it by id.

use super::event::SubscriptionEvent;
use super::handle::SubscriptionHandle;
use super::id::SubscriptionId;
use super::signal::CancellationSignal;
use crate::router::ProcedurePath;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, trace};

#[derive(Debug)]
struct Tracked {
    path: ProcedurePath,
    signal: CancellationSignal,
    finished: Arc<AtomicBool>,
    started: Instant,
}

impl Tracked {
    fn is_live(&self) -> bool {
        !self.signal.is_cancelled() && !self.finished.load(Ordering::SeqCst)
    }
}

/// Tracks live subscriptions by id.
///
/// # Example
/// ```rust,ignore
/// let manager = SubscriptionManager::new();
/// let handle = caller.subscribe("chat.messages", json!({"room": 1}), ctx).await?;
/// let id = manager
///     .spawn(handle, move |event| {
///         let _ = outbound.send(event);
///     })
///     .await;
///
/// // later, on an unsubscribe message
/// manager.unsubscribe(&id);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: Arc<DashMap<SubscriptionId, Tracked>>,
    tasks: Mutex<JoinSet<()>>,
}

impl SubscriptionManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle the caller keeps polling itself.
    pub fn track(&self, handle: &SubscriptionHandle) -> SubscriptionId {
        let id = handle.id();
        self.subscriptions.insert(
            id,
            Tracked {
                path: handle.path().clone(),
                signal: handle.signal().clone(),
                finished: handle.finished_flag(),
                started: Instant::now(),
            },
        );
        info!(subscription_id = %id, path = %handle.path(), "Subscription registered");
        id
    }

    /// Register a handle and drive it on a background task.
    ///
    /// Every event is passed to `on_event`. The entry is removed once the
    /// subscription ends, whether it completed, failed or was cancelled.
    pub async fn spawn<F>(&self, mut handle: SubscriptionHandle, mut on_event: F) -> SubscriptionId
    where
        F: FnMut(SubscriptionEvent) + Send + 'static,
    {
        let id = self.track(&handle);
        let subscriptions = Arc::clone(&self.subscriptions);
        let mut tasks = self.tasks.lock().await;
        reap(&mut tasks);
        tasks.spawn(async move {
            while let Some(event) = handle.next().await {
                on_event(event);
            }
            if subscriptions.remove(&id).is_some() {
                debug!(subscription_id = %id, "Subscription task finished");
            }
        });
        trace!(subscription_id = %id, "Subscription task spawned");
        id
    }

    /// Cancel and forget a subscription. Returns false for an unknown id.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        match self.subscriptions.remove(id) {
            Some((_, tracked)) => {
                info!(
                    subscription_id = %id,
                    path = %tracked.path,
                    duration_ms = tracked.started.elapsed().as_millis() as u64,
                    reason = "unsubscribed",
                    "Subscription cancelled"
                );
                tracked.signal.cancel();
                true
            }
            None => {
                trace!(subscription_id = %id, "Unsubscribe called for unknown subscription");
                false
            }
        }
    }

    /// Cancel every subscription. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids = self.subscription_ids();
        ids.iter().filter(|id| self.unsubscribe(id)).count()
    }

    /// Cancel everything and wait for background tasks to finish.
    pub async fn shutdown(&self) {
        let cancelled = self.cancel_all();
        info!(cancelled, "SubscriptionManager shutdown initiated");
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
        info!("SubscriptionManager shutdown complete");
    }

    /// Drop entries whose subscription was cancelled elsewhere or has ended,
    /// and forget background tasks that already finished. Returns how many
    /// entries were removed.
    pub fn cleanup(&self) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|_, tracked| tracked.is_live());
        let removed = before.saturating_sub(self.subscriptions.len());
        if removed > 0 {
            debug!(removed, "Removed ended subscriptions");
        }
        if let Ok(mut tasks) = self.tasks.try_lock() {
            reap(&mut tasks);
        }
        removed
    }

    /// Number of background tasks not yet reaped.
    pub async fn task_count(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        reap(&mut tasks);
        tasks.len()
    }

    /// Number of tracked subscriptions
    pub fn count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if `id` is tracked
    pub fn exists(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.contains_key(id)
    }

    /// Path of a tracked subscription
    pub fn path_of(&self, id: &SubscriptionId) -> Option<ProcedurePath> {
        self.subscriptions.get(id).map(|t| t.path.clone())
    }

    /// Ids of all tracked subscriptions
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.iter().map(|e| *e.key()).collect()
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    let mut reaped = 0usize;
    while tasks.try_join_next().is_some() {
        reaped += 1;
    }
    if reaped > 0 {
        trace!(reaped, "Reaped finished subscription tasks");
    }
}
