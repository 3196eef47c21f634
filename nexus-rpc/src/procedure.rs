//! Procedure Builder API
//!
//! Provides a fluent builder for defining procedures with middleware, input
//! and output parsers, and meta. A builder is an immutable value: every
//! non-terminal method returns a new builder, and cloning one is cheap, so a
//! partially configured builder works as a shared base for many procedures.
//!
//! # Example
//!
//! ```rust,ignore
//! use nexus_rpc::prelude::*;
//!
//! let public = procedure::<AppContext>().use_middleware(logging);
//! let authed = public.clone().use_middleware(require_user);
//!
//! let get_user = authed
//!     .clone()
//!     .meta(json!({"tag": "users"}))
//!     .input(typed::<GetUserInput>())
//!     .query(|ctx, input| async move { ctx.db.user(input.id).await });
//! ```
//!
//! Middleware added to the base runs before middleware added on a derived
//! builder. Calling `.input()` again adds a second parser: both must accept
//! the raw input, and object results are merged key by key.

use crate::context::Context;
use crate::meta::Meta;
use crate::middleware::{
    Handler, MiddlewareFn, Next, ProcedureType, Request, Response, build_middleware_chain,
};
use crate::parser::{ErasedParser, Parser, parse_all};
use crate::validation::ValidationError;
use crate::{RpcError, RpcResult};
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Resolver after erasure: parsed input in, response out.
type Resolver<Ctx> =
    Arc<dyn Fn(Context<Ctx>, Value) -> BoxFuture<'static, RpcResult<Response>> + Send + Sync>;

/// Start a new procedure builder.
pub fn procedure<Ctx: Send + Sync + 'static>() -> ProcedureBuilder<Ctx> {
    ProcedureBuilder::new()
}

/// Builder for configuring procedures with middleware, parsers and meta.
///
/// # Type Parameters
///
/// - `Ctx`: The application state type carried by [`Context`]
/// - `Input`: The input type handed to the resolver (default: `()`)
///
/// Without an input parser the resolver receives `()` and the raw input is
/// ignored; middleware still sees it on the [`Request`].
pub struct ProcedureBuilder<Ctx, Input = ()> {
    /// Middleware stack, executed in registration order.
    middleware: Arc<Vec<MiddlewareFn<Ctx>>>,
    /// Input parsers; all must succeed.
    inputs: Arc<Vec<ErasedParser>>,
    /// Optional output parser.
    output: Option<ErasedParser>,
    meta: Arc<Meta>,
    _input: PhantomData<fn() -> Input>,
}

impl<Ctx> ProcedureBuilder<Ctx, ()>
where
    Ctx: Send + Sync + 'static,
{
    /// Creates an empty procedure builder.
    pub fn new() -> Self {
        Self {
            middleware: Arc::new(Vec::new()),
            inputs: Arc::new(Vec::new()),
            output: None,
            meta: Arc::new(Meta::default()),
            _input: PhantomData,
        }
    }
}

impl<Ctx> Default for ProcedureBuilder<Ctx, ()>
where
    Ctx: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx, Input> Clone for ProcedureBuilder<Ctx, Input> {
    fn clone(&self) -> Self {
        Self {
            middleware: Arc::clone(&self.middleware),
            inputs: Arc::clone(&self.inputs),
            output: self.output.clone(),
            meta: Arc::clone(&self.meta),
            _input: PhantomData,
        }
    }
}

impl<Ctx, Input> fmt::Debug for ProcedureBuilder<Ctx, Input> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureBuilder")
            .field("middleware", &self.middleware.len())
            .field("inputs", &self.inputs.len())
            .field("has_output", &self.output.is_some())
            .field("meta", &self.meta)
            .finish()
    }
}

impl<Ctx, Input> ProcedureBuilder<Ctx, Input>
where
    Ctx: Send + Sync + 'static,
    Input: DeserializeOwned + Send + 'static,
{
    /// Adds middleware to this procedure.
    ///
    /// Middleware is executed in registration order (first registered = outermost).
    ///
    /// ```rust,ignore
    /// let procedure = procedure::<AppContext>()
    ///     .use_middleware(logging)      // Executes first (outermost)
    ///     .use_middleware(auth)         // Executes second
    ///     .query(get_user);
    /// ```
    #[must_use = "This method returns a new ProcedureBuilder and does not modify self"]
    pub fn use_middleware<F, Fut>(self, middleware: F) -> Self
    where
        F: Fn(Context<Ctx>, Request, Next<Ctx>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Response>> + Send + 'static,
    {
        self.use_middleware_fn(Arc::new(move |ctx, req, next| {
            Box::pin(middleware(ctx, req, next))
        }))
    }

    /// Adds a middleware function (already wrapped as MiddlewareFn).
    #[must_use = "This method returns a new ProcedureBuilder and does not modify self"]
    pub fn use_middleware_fn(mut self, middleware: MiddlewareFn<Ctx>) -> Self {
        Arc::make_mut(&mut self.middleware).push(middleware);
        self
    }

    /// Adds an input parser.
    ///
    /// Every parser added runs against the same raw input and all of them
    /// must succeed. The resolver receives the last parser's output type,
    /// deserialized from the merged parse results.
    pub fn input<P: Parser>(mut self, parser: P) -> ProcedureBuilder<Ctx, P::Output> {
        Arc::make_mut(&mut self.inputs).push(ErasedParser::new(parser));
        ProcedureBuilder {
            middleware: self.middleware,
            inputs: self.inputs,
            output: self.output,
            meta: self.meta,
            _input: PhantomData,
        }
    }

    /// Sets the output parser, replacing any previous one.
    ///
    /// A value that the output parser rejects is a server-side fault and
    /// surfaces as `INTERNAL_SERVER_ERROR`. For subscriptions every emitted
    /// value is checked.
    #[must_use = "This method returns a new ProcedureBuilder and does not modify self"]
    pub fn output<P: Parser>(mut self, parser: P) -> Self {
        self.output = Some(ErasedParser::new(parser));
        self
    }

    /// Shallow-merges an object into the procedure meta. Last write wins.
    ///
    /// Values that do not serialize to a JSON object are ignored with a warning.
    #[must_use = "This method returns a new ProcedureBuilder and does not modify self"]
    pub fn meta(mut self, meta: impl Serialize) -> Self {
        match serde_json::to_value(meta) {
            Ok(Value::Object(map)) => Arc::make_mut(&mut self.meta).merge(map),
            Ok(other) => warn!(value = %other, "Ignoring procedure meta that is not an object"),
            Err(e) => warn!(error = %e, "Ignoring procedure meta that failed to serialize"),
        }
        self
    }

    /// Finishes the builder as a query (read-only operation).
    ///
    /// ```rust,ignore
    /// async fn get_user(ctx: Context<AppContext>, input: GetUserInput) -> RpcResult<User> {
    ///     // ...
    /// }
    ///
    /// let def = procedure::<AppContext>()
    ///     .input(typed::<GetUserInput>())
    ///     .query(get_user);
    /// ```
    pub fn query<H, Fut, Output>(self, handler: H) -> ProcedureDefinition<Ctx>
    where
        H: Fn(Context<Ctx>, Input) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        let resolver = self.value_resolver(handler);
        self.build(ProcedureType::Query, resolver)
    }

    /// Finishes the builder as a mutation (write operation).
    pub fn mutation<H, Fut, Output>(self, handler: H) -> ProcedureDefinition<Ctx>
    where
        H: Fn(Context<Ctx>, Input) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        let resolver = self.value_resolver(handler);
        self.build(ProcedureType::Mutation, resolver)
    }

    /// Finishes the builder as a subscription.
    ///
    /// The resolver returns a stream. Items are delivered in order; an `Err`
    /// item ends the subscription. Dropping the stream is how the producer
    /// learns that the subscriber went away.
    ///
    /// ```rust,ignore
    /// let ticks = procedure::<AppContext>().subscription(|_ctx, _: ()| async move {
    ///     let (tx, stream) = event_channel::<u64>(16);
    ///     tokio::spawn(async move {
    ///         for i in 0.. {
    ///             if tx.send(i).await.is_err() { break; }
    ///             tokio::time::sleep(Duration::from_secs(1)).await;
    ///         }
    ///     });
    ///     Ok(stream)
    /// });
    /// ```
    pub fn subscription<H, Fut, S, T>(self, handler: H) -> ProcedureDefinition<Ctx>
    where
        H: Fn(Context<Ctx>, Input) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<S>> + Send + 'static,
        S: Stream<Item = RpcResult<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let output = self.output.clone();
        let resolver: Resolver<Ctx> = Arc::new(move |ctx, parsed| {
            let fut = deserialize_input::<Input>(parsed).map(|input| handler(ctx, input));
            let output = output.clone();
            Box::pin(async move {
                let stream = fut?.await?;
                let items = stream
                    .then(move |item| {
                        let output = output.clone();
                        async move { check_output(output.as_ref(), item?).await }
                    })
                    .boxed();
                Ok(Response::Stream(items))
            })
        });
        self.build(ProcedureType::Subscription, resolver)
    }

    fn value_resolver<H, Fut, Output>(&self, handler: H) -> Resolver<Ctx>
    where
        H: Fn(Context<Ctx>, Input) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        let output = self.output.clone();
        Arc::new(move |ctx, parsed| {
            let fut = deserialize_input::<Input>(parsed).map(|input| handler(ctx, input));
            let output = output.clone();
            Box::pin(async move {
                trace!("Executing procedure resolver");
                let value = fut?.await.inspect_err(|e| {
                    debug!(error_code = %e.code, "Procedure resolver returned error");
                })?;
                check_output(output.as_ref(), value).await.map(Response::Data)
            })
        })
    }

    fn build(self, kind: ProcedureType, resolver: Resolver<Ctx>) -> ProcedureDefinition<Ctx> {
        debug!(
            procedure_type = %kind,
            middleware_count = self.middleware.len(),
            input_parsers = self.inputs.len(),
            has_output_parser = self.output.is_some(),
            "Building procedure"
        );

        let inputs = Arc::clone(&self.inputs);
        let terminal: Handler<Ctx> = Arc::new(move |ctx, req: Request| {
            let inputs = Arc::clone(&inputs);
            let resolver = Arc::clone(&resolver);
            Box::pin(async move {
                let parsed = if inputs.is_empty() {
                    Value::Null
                } else {
                    trace!(path = %req.path, "Validating input");
                    parse_all(&inputs, req.input).await.map_err(|e| {
                        debug!(path = %req.path, error = %e, "Input validation failed");
                        RpcError::from(e)
                    })?
                };
                if ctx.is_cancelled() {
                    return Err(RpcError::client_closed("Request was cancelled"));
                }
                resolver(ctx, parsed).await
            })
        });

        ProcedureDefinition {
            kind,
            meta: self.meta,
            chain: build_middleware_chain(&self.middleware, terminal),
            middleware_count: self.middleware.len(),
            input_count: self.inputs.len(),
            has_output: self.output.is_some(),
        }
    }
}

fn deserialize_input<Input: DeserializeOwned>(parsed: Value) -> RpcResult<Input> {
    serde_json::from_value(parsed).map_err(|e| {
        debug!(error = %e, "Failed to deserialize procedure input");
        RpcError::from(ValidationError::from_serde(&e))
    })
}

/// Serialize a resolver value and run it through the output parser.
async fn check_output<T: Serialize>(output: Option<&ErasedParser>, value: T) -> RpcResult<Value> {
    let value = serde_json::to_value(value)?;
    match output {
        Some(parser) => parser.parse(value).await.map_err(output_error),
        None => Ok(value),
    }
}

fn output_error(err: ValidationError) -> RpcError {
    warn!(error = %err, "Output validation failed");
    RpcError::internal(format!("Output validation failed: {}", err.message)).with_cause(err)
}

/// A finished procedure, ready to be placed in a router.
///
/// The middleware chain is composed once at construction; executing the
/// procedure only clones reference-counted handles.
pub struct ProcedureDefinition<Ctx> {
    kind: ProcedureType,
    meta: Arc<Meta>,
    chain: Handler<Ctx>,
    middleware_count: usize,
    input_count: usize,
    has_output: bool,
}

impl<Ctx: Send + Sync + 'static> ProcedureDefinition<Ctx> {
    /// Kind of the procedure.
    pub fn kind(&self) -> ProcedureType {
        self.kind
    }

    /// Meta attached to the procedure.
    pub fn meta(&self) -> &Arc<Meta> {
        &self.meta
    }

    /// Number of middleware layers.
    pub fn middleware_count(&self) -> usize {
        self.middleware_count
    }

    /// Returns true if at least one input parser is attached.
    pub fn has_input_parser(&self) -> bool {
        self.input_count > 0
    }

    /// Returns true if an output parser is attached.
    pub fn has_output_parser(&self) -> bool {
        self.has_output
    }

    /// Run the full chain: middleware, input parsing, resolver, output parsing.
    pub(crate) fn execute(
        &self,
        ctx: Context<Ctx>,
        req: Request,
    ) -> BoxFuture<'static, RpcResult<Response>> {
        (self.chain)(ctx, req)
    }
}

impl<Ctx> Clone for ProcedureDefinition<Ctx> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            meta: Arc::clone(&self.meta),
            chain: Arc::clone(&self.chain),
            middleware_count: self.middleware_count,
            input_count: self.input_count,
            has_output: self.has_output,
        }
    }
}

impl<Ctx> fmt::Debug for ProcedureDefinition<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureDefinition")
            .field("kind", &self.kind)
            .field("meta", &self.meta)
            .field("middleware_count", &self.middleware_count)
            .field("input_count", &self.input_count)
            .field("has_output", &self.has_output)
            .finish()
    }
}
