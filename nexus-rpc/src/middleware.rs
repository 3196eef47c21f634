//! Middleware support for request/response processing
//!
//! Middleware wraps the rest of a procedure's execution. Each layer receives
//! the context, the request and a [`Next`] continuation:
//!
//! - calling [`Next::run`] (or [`Next::run_with`] to extend the context)
//!   continues the chain and hands back its result
//! - returning without calling `next` short-circuits: nothing further runs and
//!   the returned value becomes the result of the call
//! - returning an error aborts the chain
//!
//! Layers execute strictly in registration order, and `next` may be called at
//! most once per layer. A second call fails with
//! [`ChainError::NextCalledMultipleTimes`] without touching the downstream steps.

use crate::context::{Context, ContextPatch};
use crate::meta::Meta;
use crate::router::ProcedurePath;
use crate::{RpcError, RpcResult};
use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{trace, warn};

/// Type of procedure being called
#[derive(Clone, Debug, PartialEq, Eq, Hash, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureType {
    /// Read-only operation
    Query,
    /// Write operation
    Mutation,
    /// Streaming subscription
    Subscription,
}

impl ProcedureType {
    /// Lowercase name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for ProcedureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request information passed to middleware
#[derive(Clone, Debug)]
pub struct Request {
    /// Full path of the procedure
    pub path: ProcedurePath,
    /// Type of procedure
    pub procedure_type: ProcedureType,
    /// Raw, unvalidated input
    pub input: Value,
    /// Meta attached to the procedure
    pub meta: Arc<Meta>,
}

impl Request {
    /// Get the namespace (first segment of the path)
    pub fn namespace(&self) -> Option<&str> {
        self.path.segments().first().map(String::as_str)
    }

    /// Get the procedure name (last segment of the path)
    pub fn procedure(&self) -> &str {
        self.path.segments().last().map(String::as_str).unwrap_or("")
    }
}

/// A stream of output values produced by a subscription.
pub type ValueStream = BoxStream<'static, RpcResult<Value>>;

/// What a chain produces: one value, or a stream of values for subscriptions.
pub enum Response {
    /// A single serialized value
    Data(Value),
    /// A long-lived stream of values
    Stream(ValueStream),
}

impl Response {
    /// Serialize a value into a data response.
    pub fn data(value: impl Serialize) -> RpcResult<Self> {
        Ok(Self::Data(serde_json::to_value(value)?))
    }

    /// Returns the value of a data response.
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Self::Data(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    /// Consume the response, keeping only a data value.
    pub fn into_data(self) -> Option<Value> {
        match self {
            Self::Data(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    /// Returns true if this is a stream response.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl From<Value> for Response {
    fn from(value: Value) -> Self {
        Self::Data(value)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Misuse of the middleware chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChainError {
    /// A middleware called `next` a second time.
    #[error("next() was called more than once in a single middleware")]
    NextCalledMultipleTimes,
}

impl From<ChainError> for RpcError {
    fn from(err: ChainError) -> Self {
        RpcError::internal(err.to_string()).with_cause(err)
    }
}

/// A composed step of the chain: the remaining middleware plus the resolver.
pub(crate) type Handler<Ctx> =
    Arc<dyn Fn(Context<Ctx>, Request) -> BoxFuture<'static, RpcResult<Response>> + Send + Sync>;

/// Middleware function type
pub type MiddlewareFn<Ctx> = Arc<
    dyn Fn(Context<Ctx>, Request, Next<Ctx>) -> BoxFuture<'static, RpcResult<Response>>
        + Send
        + Sync,
>;

/// Continuation handed to a middleware.
///
/// A fresh `Next` is created for every layer of every call, so the
/// "called once" guard is scoped to a single middleware invocation.
pub struct Next<Ctx> {
    handler: Handler<Ctx>,
    called: Arc<AtomicBool>,
}

impl<Ctx: Send + Sync + 'static> Next<Ctx> {
    pub(crate) fn new(handler: Handler<Ctx>) -> Self {
        Self {
            handler,
            called: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Continue the chain with the given context.
    ///
    /// Fails with an `INTERNAL_SERVER_ERROR` caused by
    /// [`ChainError::NextCalledMultipleTimes`] if called twice, and with
    /// `CLIENT_CLOSED_REQUEST` if the call has been cancelled.
    pub fn run(&self, ctx: Context<Ctx>, req: Request) -> BoxFuture<'static, RpcResult<Response>> {
        if self.called.swap(true, Ordering::SeqCst) {
            warn!(path = %req.path, "Middleware called next() more than once");
            return Box::pin(future::ready(Err(
                RpcError::from(ChainError::NextCalledMultipleTimes).with_path(req.path.to_string()),
            )));
        }
        if ctx.is_cancelled() {
            trace!(path = %req.path, "Call cancelled before next step");
            return Box::pin(future::ready(Err(RpcError::client_closed(
                "Request was cancelled",
            ))));
        }
        (self.handler)(ctx, req)
    }

    /// Continue the chain with `patch` shallow-merged over the context.
    pub fn run_with(
        &self,
        ctx: Context<Ctx>,
        patch: ContextPatch,
        req: Request,
    ) -> BoxFuture<'static, RpcResult<Response>> {
        self.run(ctx.merge(patch), req)
    }

    /// Returns true if this continuation has already been used.
    pub fn was_called(&self) -> bool {
        self.called.load(Ordering::SeqCst)
    }
}

impl<Ctx> Clone for Next<Ctx> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            called: Arc::clone(&self.called),
        }
    }
}

impl<Ctx> fmt::Debug for Next<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("called", &self.called.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Trait for implementing custom middleware as a type.
///
/// Closures are covered by a blanket implementation, so plain async closures
/// and named types can be mixed in the same chain.
pub trait Middleware<Ctx: Send + Sync + 'static>: Send + Sync + 'static {
    /// Process the request, optionally calling next
    fn handle(
        &self,
        ctx: Context<Ctx>,
        req: Request,
        next: Next<Ctx>,
    ) -> BoxFuture<'static, RpcResult<Response>>;
}

impl<Ctx, F, Fut> Middleware<Ctx> for F
where
    Ctx: Send + Sync + 'static,
    F: Fn(Context<Ctx>, Request, Next<Ctx>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Response>> + Send + 'static,
{
    fn handle(
        &self,
        ctx: Context<Ctx>,
        req: Request,
        next: Next<Ctx>,
    ) -> BoxFuture<'static, RpcResult<Response>> {
        Box::pin(self(ctx, req, next))
    }
}

/// Create middleware from an async function
///
/// # Example
/// ```rust,ignore
/// async fn logging<Ctx: Send + Sync + 'static>(
///     ctx: Context<Ctx>,
///     req: Request,
///     next: Next<Ctx>,
/// ) -> RpcResult<Response> {
///     println!("[{}] {}", req.procedure_type, req.path);
///     next.run(ctx, req).await
/// }
///
/// let middleware = from_fn(logging);
/// ```
pub fn from_fn<Ctx, F, Fut>(f: F) -> MiddlewareFn<Ctx>
where
    Ctx: Send + Sync + 'static,
    F: Fn(Context<Ctx>, Request, Next<Ctx>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Response>> + Send + 'static,
{
    Arc::new(move |ctx, req, next| Box::pin(f(ctx, req, next)))
}

/// Erase a [`Middleware`] implementation.
pub fn from_middleware<Ctx, M>(middleware: M) -> MiddlewareFn<Ctx>
where
    Ctx: Send + Sync + 'static,
    M: Middleware<Ctx>,
{
    let middleware = Arc::new(middleware);
    Arc::new(move |ctx, req, next| middleware.handle(ctx, req, next))
}

/// Build a middleware chain from a list of middleware functions and a final handler.
///
/// Middleware is applied in reverse order (last added = innermost), meaning
/// the first middleware in the list wraps all subsequent middleware.
///
/// ```text
/// // Given middleware [M1, M2, M3] and handler H:
/// // Execution order: M1 → M2 → M3 → H → M3 → M2 → M1
/// ```
pub(crate) fn build_middleware_chain<Ctx: Send + Sync + 'static>(
    middleware: &[MiddlewareFn<Ctx>],
    final_handler: Handler<Ctx>,
) -> Handler<Ctx> {
    middleware
        .iter()
        .rev()
        .fold(final_handler, |inner, mw| {
            let mw = Arc::clone(mw);
            Arc::new(move |ctx, req| (mw)(ctx, req, Next::new(Arc::clone(&inner))))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EmptyContext;
    use std::sync::atomic::AtomicUsize;

    fn request() -> Request {
        Request {
            path: ProcedurePath::from("test"),
            procedure_type: ProcedureType::Query,
            input: Value::Null,
            meta: Arc::new(Meta::default()),
        }
    }

    fn ok_handler(count: Arc<AtomicUsize>) -> Handler<EmptyContext> {
        Arc::new(move |_ctx, _req| {
            count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Response::Data(serde_json::json!({"result": "ok"}))) })
        })
    }

    #[tokio::test]
    async fn test_middleware_chain_execution_order() {
        let execution_order = Arc::new(AtomicUsize::new(0));

        let recorder = |before: usize, after: usize| -> MiddlewareFn<EmptyContext> {
            let order = execution_order.clone();
            Arc::new(move |ctx, req, next| {
                let order = order.clone();
                Box::pin(async move {
                    assert_eq!(order.fetch_add(1, Ordering::SeqCst), before);
                    let result = next.run(ctx, req).await;
                    assert_eq!(order.fetch_add(1, Ordering::SeqCst), after);
                    result
                })
            })
        };

        let chain = build_middleware_chain(
            &[recorder(0, 5), recorder(1, 4), recorder(2, 3)],
            ok_handler(Arc::new(AtomicUsize::new(0))),
        );

        let result = chain(Context::new(EmptyContext), request()).await;
        assert!(result.is_ok());
        assert_eq!(execution_order.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let short: MiddlewareFn<EmptyContext> = from_fn(|_ctx, _req, _next| async {
            Ok(Response::Data(serde_json::json!("cached")))
        });

        let chain = build_middleware_chain(&[short], ok_handler(calls.clone()));
        let response = chain(Context::new(EmptyContext), request()).await.unwrap();

        assert_eq!(response.into_data(), Some(serde_json::json!("cached")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_next_twice_fails_without_rerunning() {
        let calls = Arc::new(AtomicUsize::new(0));
        let twice: MiddlewareFn<EmptyContext> = from_fn(
            |ctx: Context<EmptyContext>, req: Request, next: Next<EmptyContext>| async move {
                let _ = next.run(ctx.clone(), req.clone()).await?;
                next.run(ctx, req).await
            },
        );

        let chain = build_middleware_chain(&[twice], ok_handler(calls.clone()));
        let err = chain(Context::new(EmptyContext), request()).await.unwrap_err();

        assert_eq!(err.code, crate::RpcErrorCode::InternalServerError);
        assert_eq!(
            err.cause_as::<ChainError>(),
            Some(&ChainError::NextCalledMultipleTimes)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_with_patches_downstream_context() {
        let patch: MiddlewareFn<EmptyContext> = from_fn(|ctx, req, next: Next<EmptyContext>| async move {
            next.run_with(ctx, ContextPatch::new().insert("user", "ada".to_string()), req)
                .await
        });
        let handler: Handler<EmptyContext> = Arc::new(|ctx, _req| {
            let user = ctx.get::<String>("user").cloned();
            Box::pin(async move { Ok(Response::Data(serde_json::json!(user))) })
        });

        let chain = build_middleware_chain(&[patch], handler);
        let response = chain(Context::new(EmptyContext), request()).await.unwrap();
        assert_eq!(response.into_data(), Some(serde_json::json!("ada")));
    }

    #[test]
    fn test_request_path_helpers() {
        let req = Request {
            path: ProcedurePath::from("users.profile.get"),
            ..request()
        };
        assert_eq!(req.namespace(), Some("users"));
        assert_eq!(req.procedure(), "get");
    }

    #[test]
    fn test_procedure_type_serde() {
        assert_eq!(
            serde_json::to_value(ProcedureType::Subscription).unwrap(),
            serde_json::json!("subscription")
        );
        assert_eq!(ProcedureType::Mutation.to_string(), "mutation");
    }
}
