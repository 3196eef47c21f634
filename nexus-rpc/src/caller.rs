//! Caller / executor
//!
//! The [`Caller`] is the single entry point a transport uses. Given a path,
//! raw input, an initial context and the expected procedure kind it:
//!
//! 1. resolves the path with one map lookup (`NOT_FOUND` if absent)
//! 2. checks the kind (`BAD_REQUEST` on mismatch) and the input size
//!    (`PAYLOAD_TOO_LARGE`)
//! 3. runs the procedure's chain: middleware, input parsing, resolver,
//!    output parsing
//! 4. turns every failure, including panics, into exactly one [`RpcError`]
//!    carrying the procedure path
//!
//! A query or mutation always ends with one [`ExecutionResult`]. A
//! subscription ends with a [`SubscriptionHandle`] or an error.

use crate::config::RpcConfig;
use crate::context::{CallInfo, Context};
use crate::formatter::{DefaultErrorFormatter, ErrorFormatter, format_error};
use crate::middleware::{ProcedureType, Request, Response};
use crate::router::{ProcedurePath, Router};
use crate::subscription::{CancellationSignal, SubscriptionEvent, SubscriptionHandle};
use crate::validation::validate_input_size;
use crate::{RpcError, RpcResult};
use futures::{FutureExt, StreamExt};
use serde_json::{Value, json};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Outcome of a query or mutation: never partially populated.
///
/// [`Caller::to_wire`] gives the wire form with the error formatted.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// The call produced a value
    Success(Value),
    /// The call failed
    Failure(RpcError),
}

impl ExecutionResult {
    /// Returns true for a successful call.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The value of a successful call.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success(data) => Some(data),
            Self::Failure(_) => None,
        }
    }

    /// The error of a failed call.
    pub fn error(&self) -> Option<&RpcError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> RpcResult<Value> {
        self.into()
    }
}

impl From<RpcResult<Value>> for ExecutionResult {
    fn from(result: RpcResult<Value>) -> Self {
        match result {
            Ok(data) => Self::Success(data),
            Err(error) => Self::Failure(error),
        }
    }
}

impl From<ExecutionResult> for RpcResult<Value> {
    fn from(result: ExecutionResult) -> Self {
        match result {
            ExecutionResult::Success(data) => Ok(data),
            ExecutionResult::Failure(error) => Err(error),
        }
    }
}

/// One call to execute.
///
/// # Example
/// ```rust,ignore
/// let signal = CancellationSignal::new();
/// let request = CallRequest::query("post.byId", ctx)
///     .input(json!({"id": 1}))
///     .signal(signal.clone());
/// let response = caller.call(request).await;
/// ```
pub struct CallRequest<Ctx> {
    /// Procedure path
    pub path: ProcedurePath,
    /// Raw input
    pub input: Value,
    /// Initial context
    pub context: Context<Ctx>,
    /// Expected procedure kind
    pub procedure_type: ProcedureType,
    /// Cancellation signal supplied by the transport
    pub signal: Option<CancellationSignal>,
}

impl<Ctx: Send + Sync + 'static> CallRequest<Ctx> {
    /// Create a request with `null` input and no signal.
    pub fn new(
        procedure_type: ProcedureType,
        path: impl Into<ProcedurePath>,
        context: Context<Ctx>,
    ) -> Self {
        Self {
            path: path.into(),
            input: Value::Null,
            context,
            procedure_type,
            signal: None,
        }
    }

    /// A query request.
    pub fn query(path: impl Into<ProcedurePath>, context: Context<Ctx>) -> Self {
        Self::new(ProcedureType::Query, path, context)
    }

    /// A mutation request.
    pub fn mutation(path: impl Into<ProcedurePath>, context: Context<Ctx>) -> Self {
        Self::new(ProcedureType::Mutation, path, context)
    }

    /// A subscription request.
    pub fn subscription(path: impl Into<ProcedurePath>, context: Context<Ctx>) -> Self {
        Self::new(ProcedureType::Subscription, path, context)
    }

    /// Set the raw input.
    #[must_use = "This method returns a new CallRequest and does not modify self"]
    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Attach a cancellation signal.
    #[must_use = "This method returns a new CallRequest and does not modify self"]
    pub fn signal(mut self, signal: CancellationSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

impl<Ctx> fmt::Debug for CallRequest<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRequest")
            .field("path", &self.path)
            .field("procedure_type", &self.procedure_type)
            .field("input", &self.input)
            .field("has_signal", &self.signal.is_some())
            .finish_non_exhaustive()
    }
}

/// What a call produced.
#[derive(Debug)]
pub enum CallResponse {
    /// Result of a query or mutation, or of a subscription that failed to start
    Result(ExecutionResult),
    /// A started subscription
    Subscription(SubscriptionHandle),
}

impl CallResponse {
    /// The execution result. A subscription handle is cancelled and reported
    /// as an internal error.
    pub fn into_result(self) -> ExecutionResult {
        match self {
            Self::Result(result) => result,
            Self::Subscription(mut handle) => {
                handle.cancel();
                ExecutionResult::Failure(
                    RpcError::internal("Expected a single result, got a subscription")
                        .with_path(handle.path().to_string()),
                )
            }
        }
    }

    /// The subscription handle, or the error that prevented it from starting.
    pub fn into_subscription(self) -> RpcResult<SubscriptionHandle> {
        match self {
            Self::Subscription(handle) => Ok(handle),
            Self::Result(ExecutionResult::Failure(error)) => Err(error),
            Self::Result(ExecutionResult::Success(_)) => Err(RpcError::internal(
                "Expected a subscription, got a single result",
            )),
        }
    }
}

/// Executes calls against a [`Router`].
///
/// Cloning is cheap, and one caller may serve any number of concurrent calls.
pub struct Caller<Ctx> {
    router: Router<Ctx>,
    config: Arc<RpcConfig>,
    formatter: Arc<dyn ErrorFormatter>,
}

impl<Ctx: Send + Sync + 'static> Caller<Ctx> {
    /// Create a caller with the default configuration and formatter.
    pub fn new(router: Router<Ctx>) -> Self {
        Self {
            router,
            config: Arc::new(RpcConfig::default()),
            formatter: Arc::new(DefaultErrorFormatter),
        }
    }

    /// Replace the configuration.
    #[must_use = "This method returns a new Caller and does not modify self"]
    pub fn with_config(mut self, config: RpcConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Replace the error formatter.
    #[must_use = "This method returns a new Caller and does not modify self"]
    pub fn with_formatter(mut self, formatter: impl ErrorFormatter) -> Self {
        self.formatter = Arc::new(formatter);
        self
    }

    /// The router being served.
    pub fn router(&self) -> &Router<Ctx> {
        &self.router
    }

    /// The active configuration.
    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Execute one call.
    pub async fn call(&self, request: CallRequest<Ctx>) -> CallResponse {
        let CallRequest {
            path,
            input,
            context,
            procedure_type,
            signal,
        } = request;
        let signal = signal.unwrap_or_default();
        let path_str = path.to_string();
        let started = Instant::now();

        debug!(path = %path_str, procedure_type = %procedure_type, "Calling procedure");
        let outcome = self
            .execute(&path, procedure_type, input, context, &signal)
            .await
            .map_err(|e| e.or_path(&path_str));
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) if procedure_type == ProcedureType::Subscription => {
                let values = match response {
                    Response::Stream(values) => values,
                    Response::Data(value) => futures::stream::once(async move { Ok(value) }).boxed(),
                };
                debug!(path = %path_str, duration_ms, "Subscription established");
                CallResponse::Subscription(SubscriptionHandle::new(path, signal, values))
            }
            Ok(Response::Data(data)) => {
                debug!(path = %path_str, duration_ms, "Procedure succeeded");
                CallResponse::Result(ExecutionResult::Success(data))
            }
            Ok(Response::Stream(_)) => {
                let error = RpcError::internal(format!(
                    "Procedure returned a stream for a {} call",
                    procedure_type
                ))
                .with_path(path_str.clone());
                warn!(path = %path_str, "Procedure returned a stream outside a subscription");
                CallResponse::Result(ExecutionResult::Failure(error))
            }
            Err(error) => {
                if error.code.is_server_error() {
                    warn!(
                        path = %path_str,
                        duration_ms,
                        error_code = %error.code,
                        error_message = %error.message,
                        "Procedure failed"
                    );
                } else {
                    debug!(
                        path = %path_str,
                        duration_ms,
                        error_code = %error.code,
                        "Procedure failed"
                    );
                }
                CallResponse::Result(ExecutionResult::Failure(error))
            }
        }
    }

    async fn execute(
        &self,
        path: &ProcedurePath,
        procedure_type: ProcedureType,
        input: Value,
        context: Context<Ctx>,
        signal: &CancellationSignal,
    ) -> RpcResult<Response> {
        let def = self.router.get(path).ok_or_else(|| {
            debug!(path = %path, "Procedure not found");
            RpcError::procedure_not_found(&path.to_string())
        })?;

        if def.kind() != procedure_type {
            return Err(RpcError::bad_request(format!(
                "Procedure '{}' is a {}, not a {}",
                path,
                def.kind(),
                procedure_type
            )));
        }

        validate_input_size(&input, self.config.max_input_size)?;

        if signal.is_cancelled() {
            trace!(path = %path, "Call cancelled before start");
            return Err(RpcError::client_closed("Request was cancelled"));
        }

        let ctx = context.with_call(CallInfo {
            path: path.clone(),
            procedure_type,
            signal: signal.clone(),
            subscription_buffer: self.config.subscription_buffer,
        });
        let req = Request {
            path: path.clone(),
            procedure_type,
            input,
            meta: Arc::clone(def.meta()),
        };

        let fut = std::panic::catch_unwind(AssertUnwindSafe(|| def.execute(ctx, req)))
            .map_err(RpcError::from_panic)?;

        tokio::select! {
            biased;
            _ = signal.cancelled() => {
                debug!(path = %path, "Call cancelled while running");
                Err(RpcError::client_closed("Request was cancelled"))
            }
            result = AssertUnwindSafe(fut).catch_unwind() => {
                result.unwrap_or_else(|payload| Err(RpcError::from_panic(payload)))
            }
        }
    }

    /// Run a query.
    pub async fn query(
        &self,
        path: impl Into<ProcedurePath>,
        input: Value,
        context: Context<Ctx>,
    ) -> ExecutionResult {
        self.call(CallRequest::query(path, context).input(input))
            .await
            .into_result()
    }

    /// Run a mutation.
    pub async fn mutation(
        &self,
        path: impl Into<ProcedurePath>,
        input: Value,
        context: Context<Ctx>,
    ) -> ExecutionResult {
        self.call(CallRequest::mutation(path, context).input(input))
            .await
            .into_result()
    }

    /// Start a subscription.
    pub async fn subscribe(
        &self,
        path: impl Into<ProcedurePath>,
        input: Value,
        context: Context<Ctx>,
    ) -> RpcResult<SubscriptionHandle> {
        self.call(CallRequest::subscription(path, context).input(input))
            .await
            .into_subscription()
    }

    /// Format an error with the configured formatter.
    pub fn format_error(&self, error: &RpcError) -> Value {
        format_error(error, &self.config, self.formatter.as_ref())
    }

    /// Wire form of a result, with the error formatted.
    pub fn to_wire(&self, result: &ExecutionResult) -> Value {
        match result {
            ExecutionResult::Success(data) => json!({"ok": true, "data": data}),
            ExecutionResult::Failure(error) => {
                json!({"ok": false, "error": self.format_error(error)})
            }
        }
    }

    /// Wire form of a subscription event, with the error formatted.
    ///
    /// ```json
    /// {"type": "data", "seq": 0, "data": 42}
    /// {"type": "error", "error": {"code": "INTERNAL_SERVER_ERROR", ...}}
    /// {"type": "completed"}
    /// ```
    pub fn event_to_wire(&self, event: &SubscriptionEvent) -> Value {
        match event {
            SubscriptionEvent::Data { seq, data } => {
                json!({"type": "data", "seq": seq, "data": data})
            }
            SubscriptionEvent::Error { error } => {
                json!({"type": "error", "error": self.format_error(error)})
            }
            SubscriptionEvent::Completed => json!({"type": "completed"}),
        }
    }
}

impl<Ctx> Clone for Caller<Ctx> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            config: Arc::clone(&self.config),
            formatter: Arc::clone(&self.formatter),
        }
    }
}

impl<Ctx> fmt::Debug for Caller<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("router", &self.router)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
