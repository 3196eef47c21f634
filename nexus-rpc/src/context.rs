//! Context types for dependency injection
//!
//! A [`Context`] is an immutable snapshot made of three parts:
//!
//! - the application state supplied by the transport, reachable through `Deref`
//! - a bag of named values that middleware extend as the call goes down the chain
//! - information about the current call (path, kind, cancellation signal)
//!
//! Extending a context never mutates it. [`Context::merge`] returns a new
//! snapshot in which the patch keys overwrite existing keys one level deep.
//!
//! ```rust,ignore
//! let ctx = Context::new(AppState::default())
//!     .with("a", 1)
//!     .with("b", 2);
//! let next = ctx.merge(ContextPatch::new().insert("b", 3).insert("c", 4));
//! assert_eq!(next.get::<i32>("b"), Some(&3));
//! assert_eq!(ctx.get::<i32>("b"), Some(&2));
//! ```

use crate::config::DEFAULT_SUBSCRIPTION_BUFFER;
use crate::middleware::ProcedureType;
use crate::router::ProcedurePath;
use crate::subscription::{CancellationSignal, EventSender, EventStream, event_channel};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Values = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Per-call information stamped by the caller.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Path of the procedure being executed
    pub path: ProcedurePath,
    /// Kind of procedure being executed
    pub procedure_type: ProcedureType,
    /// Signal that fires when the caller cancels
    pub signal: CancellationSignal,
    /// Buffer for channels made with [`Context::event_channel`]
    pub subscription_buffer: usize,
}

/// Context wrapper providing access to application state.
///
/// Cloning is cheap; every part is reference counted.
pub struct Context<T> {
    state: Arc<T>,
    values: Arc<Values>,
    call: Option<Arc<CallInfo>>,
}

impl<T: Send + Sync + 'static> Context<T> {
    /// Create a new context wrapping the given state.
    pub fn new(state: T) -> Self {
        Self::from_arc(Arc::new(state))
    }

    /// Create a context around state that is already shared.
    pub fn from_arc(state: Arc<T>) -> Self {
        Self {
            state,
            values: Arc::new(HashMap::new()),
            call: None,
        }
    }

    /// Get a reference to the application state.
    pub fn inner(&self) -> &T {
        &self.state
    }

    /// Get the Arc for sharing.
    pub fn arc(&self) -> Arc<T> {
        Arc::clone(&self.state)
    }

    /// Look up a value added by a previous middleware.
    ///
    /// Returns `None` when the key is absent or holds a different type.
    pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Option<&V> {
        self.values.get(key).and_then(|v| v.downcast_ref::<V>())
    }

    /// Returns true if the value bag holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Keys currently present in the value bag.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Return a new snapshot with a single value added or replaced.
    pub fn with<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) -> Self {
        self.merge(ContextPatch::new().insert(key, value))
    }

    /// Return a new snapshot with `patch` shallow-merged over this one.
    ///
    /// Keys in the patch overwrite existing keys; nothing is merged deeper
    /// than one level. The receiver is left untouched.
    pub fn merge(&self, patch: ContextPatch) -> Self {
        if patch.values.is_empty() {
            return self.clone();
        }
        let mut values: Values = (*self.values).clone();
        values.extend(patch.values);
        Self {
            state: Arc::clone(&self.state),
            values: Arc::new(values),
            call: self.call.clone(),
        }
    }

    /// Path of the procedure being executed, once the caller has resolved it.
    pub fn path(&self) -> Option<&ProcedurePath> {
        self.call.as_ref().map(|c| &c.path)
    }

    /// Kind of the procedure being executed.
    pub fn procedure_type(&self) -> Option<ProcedureType> {
        self.call.as_ref().map(|c| c.procedure_type)
    }

    /// Cancellation signal of the current call.
    pub fn signal(&self) -> Option<&CancellationSignal> {
        self.call.as_ref().map(|c| &c.signal)
    }

    /// Returns true if the current call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.signal().is_some_and(CancellationSignal::is_cancelled)
    }

    /// A channel for a subscription producer, sized by the caller's
    /// `subscription_buffer`.
    ///
    /// ```rust,ignore
    /// let ticks = procedure::<AppContext>().subscription(|ctx, _: ()| async move {
    ///     let (tx, stream) = ctx.event_channel::<u64>();
    ///     tokio::spawn(async move {
    ///         for i in 0.. {
    ///             if tx.send(i).await.is_err() {
    ///                 break;
    ///             }
    ///         }
    ///     });
    ///     Ok(stream)
    /// });
    /// ```
    pub fn event_channel<V>(&self) -> (EventSender<V>, EventStream<V>) {
        let buffer = self
            .call
            .as_ref()
            .map_or(DEFAULT_SUBSCRIPTION_BUFFER, |c| c.subscription_buffer);
        event_channel(buffer)
    }

    pub(crate) fn with_call(mut self, info: CallInfo) -> Self {
        self.call = Some(Arc::new(info));
        self
    }
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            values: Arc::clone(&self.values),
            call: self.call.clone(),
        }
    }
}

impl<T> std::ops::Deref for Context<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<T: Default + Send + Sync + 'static> Default for Context<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Context")
            .field("values", &keys)
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}

/// A set of values to shallow-merge over a context.
///
/// Passed to [`Next::run_with`](crate::Next::run_with) by middleware that
/// extends the context for the rest of the chain.
#[derive(Default)]
pub struct ContextPatch {
    values: Values,
}

impl ContextPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value to the patch. A later insert of the same key wins.
    pub fn insert<V: Any + Send + Sync>(mut self, key: impl Into<String>, value: V) -> Self {
        self.values.insert(key.into(), Arc::new(value));
        self
    }

    /// Returns true if the patch holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ContextPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPatch")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Empty context for routers that don't need state
#[derive(Clone, Copy, Default, Debug)]
pub struct EmptyContext;
