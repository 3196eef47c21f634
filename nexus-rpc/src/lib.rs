#![warn(missing_docs)]
//! # nexus-rpc
//!
//! A typed RPC framework: define procedures once, compose them into a router,
//! and execute calls through a single entry point that any transport can
//! drive.
//!
//! ## Overview
//!
//! - **Procedure builder** with middleware, input/output parsers and meta
//! - **Router** flattened into a path lookup, with collision detection
//! - **Middleware** as a continuation chain with short-circuit semantics
//! - **Caller** that turns every failure into one typed [`RpcError`]
//! - **Subscriptions** as cancellable streams of events
//!
//! ## Architecture
//!
//! ```text
//!  transport (HTTP, WebSocket, in-process)
//!        │ path, input, context, kind, signal
//!        ▼
//!  ┌──────────┐   lookup   ┌──────────┐
//!  │  Caller  │──────────▶ │  Router  │
//!  └────┬─────┘            └──────────┘
//!       │ execute
//!       ▼
//!  middleware 1 → middleware 2 → … → input parsers → resolver → output parser
//!       │
//!       ▼
//!  ExecutionResult  |  SubscriptionHandle
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nexus_rpc::prelude::*;
//!
//! #[derive(Default)]
//! struct AppContext;
//!
//! let greet = procedure::<AppContext>()
//!     .input(typed::<String>())
//!     .query(|_ctx, name: String| async move { Ok(format!("hello {}", name)) });
//!
//! let app = router([("greet", greet.into())])?;
//! let caller = Caller::new(app);
//!
//! let result = caller.query("greet", json!("KATT"), Context::default()).await;
//! assert_eq!(result.data(), Some(&json!("hello KATT")));
//! ```
//!
//! ## Middleware
//!
//! ```rust,ignore
//! let authed = procedure::<AppContext>().use_middleware(
//!     |ctx: Context<AppContext>, req: Request, next: Next<AppContext>| async move {
//!         let user = ctx.session_user().ok_or_else(|| RpcError::unauthorized("Sign in first"))?;
//!         next.run_with(ctx, ContextPatch::new().insert("user", user), req).await
//!     },
//! );
//! ```
//!
//! ## Subscriptions
//!
//! ```rust,ignore
//! let ticks = procedure::<AppContext>().subscription(|_ctx, _: ()| async move {
//!     let (tx, stream) = event_channel::<u64>(16);
//!     tokio::spawn(async move {
//!         for i in 0.. {
//!             if tx.send(i).await.is_err() {
//!                 break;
//!             }
//!         }
//!     });
//!     Ok(stream)
//! });
//!
//! let mut handle = caller.subscribe("ticks", Value::Null, ctx).await?;
//! while let Some(event) = handle.next().await { /* ... */ }
//! ```

pub mod batch;
mod caller;
mod config;
mod context;
mod error;
pub mod formatter;
pub mod logging;
mod meta;
pub mod middleware;
pub mod parser;
pub mod procedure;
mod router;
pub mod subscription;
pub mod validation;

#[cfg(test)]
mod tests;

// Public API
pub use batch::{BatchCall, BatchConfig, BatchRequest, BatchResponse, BatchResult};
pub use caller::{CallRequest, CallResponse, Caller, ExecutionResult};
pub use config::{ConfigValidationError, DEFAULT_SUBSCRIPTION_BUFFER, RpcConfig};
pub use context::{CallInfo, Context, ContextPatch, EmptyContext};
pub use error::{ErrorCause, PanicError, RpcError, RpcErrorCode, RpcResult};
pub use formatter::{DefaultErrorFormatter, ErrorFormatter, ErrorShape, ErrorShapeData};
pub use logging::{LogConfig, LogLevel, RequestId, logging_middleware, redact_value};
pub use meta::Meta;
pub use middleware::{
    ChainError, Middleware, MiddlewareFn, Next, ProcedureType, Request, Response, ValueStream,
    from_fn, from_middleware,
};
pub use parser::{ErasedParser, Parser, Typed, Validated, typed, validated};
pub use procedure::{ProcedureBuilder, ProcedureDefinition, procedure};
pub use router::{
    ProcedurePath, ProcedureSchema, Router, RouterBuilder, RouterEntry, RouterError, RouterSchema,
    merge_routers, router,
};
pub use subscription::{
    CancellationSignal, EventPublisher, EventSender, EventStream, SubscriberGone,
    SubscriptionEvent, SubscriptionHandle, SubscriptionId, SubscriptionManager, event_channel,
};
pub use validation::{
    FieldError, IssueCode, Validate, ValidationError, ValidationResult, ValidationRules,
};

/// Prelude for convenient imports
///
/// ```rust,ignore
/// use nexus_rpc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Execution
        CallRequest,
        Caller,
        CancellationSignal,
        // Context
        Context,
        ContextPatch,
        EmptyContext,
        ExecutionResult,
        // Middleware
        Next,
        ProcedureType,
        Request,
        Response,
        // Errors
        RpcError,
        RpcErrorCode,
        RpcResult,
        // Router
        Router,
        // Subscriptions
        SubscriptionEvent,
        SubscriptionHandle,
        // Validation
        Validate,
        ValidationRules,
        event_channel,
        merge_routers,
        // Procedures
        procedure,
        router,
        typed,
        validated,
    };
    pub use futures::StreamExt;
    pub use serde_json::{Value, json};
}
