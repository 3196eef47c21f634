//! Error types for RPC operations
//!
//! Every failure inside a call is represented by a single [`RpcError`]. It is
//! created at the first point of failure and travels unchanged up to the
//! [`Caller`](crate::Caller), which is the only place that classifies foreign
//! errors and panics.
//!
//! # Error Codes
//!
//! Error codes are represented by the [`RpcErrorCode`] enum. When serialized,
//! codes are converted to SCREAMING_SNAKE_CASE strings, and each code maps to a
//! fixed HTTP status through [`RpcErrorCode::http_status`].
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::{RpcError, RpcErrorCode};
//!
//! let error = RpcError::new(RpcErrorCode::NotFound, "User not found");
//! let error = RpcError::not_found("User not found"); // Convenience method
//! ```

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Type-safe error codes for RPC operations.
///
/// When serialized to JSON, codes are converted to SCREAMING_SNAKE_CASE
/// (e.g., `NotFound` becomes `"NOT_FOUND"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorCode {
    // Client errors (4xx)
    /// The request was malformed or the input failed validation
    BadRequest,
    /// Authentication is required
    Unauthorized,
    /// The authenticated caller lacks permission
    Forbidden,
    /// The procedure or resource was not found
    NotFound,
    /// The call did not complete in time
    Timeout,
    /// The request conflicts with current state
    Conflict,
    /// A precondition of the procedure was not met
    PreconditionFailed,
    /// The request payload exceeds size limits
    PayloadTooLarge,
    /// The input was well-formed but semantically invalid
    UnprocessableContent,
    /// Too many requests - rate limit exceeded
    TooManyRequests,
    /// The caller cancelled the request
    ClientClosedRequest,

    // Server errors (5xx)
    /// An unexpected internal error occurred
    InternalServerError,
}

impl RpcErrorCode {
    /// Every code, in wire order.
    pub const ALL: [RpcErrorCode; 12] = [
        Self::NotFound,
        Self::BadRequest,
        Self::Unauthorized,
        Self::Forbidden,
        Self::Timeout,
        Self::Conflict,
        Self::PreconditionFailed,
        Self::PayloadTooLarge,
        Self::UnprocessableContent,
        Self::TooManyRequests,
        Self::ClientClosedRequest,
        Self::InternalServerError,
    ];

    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::Conflict => "CONFLICT",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::UnprocessableContent => "UNPROCESSABLE_CONTENT",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::ClientClosedRequest => "CLIENT_CLOSED_REQUEST",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Parse a wire code string back into a code.
    pub fn from_str_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// HTTP status associated with this code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Timeout => 408,
            Self::Conflict => 409,
            Self::PreconditionFailed => 412,
            Self::PayloadTooLarge => 413,
            Self::UnprocessableContent => 422,
            Self::TooManyRequests => 429,
            Self::ClientClosedRequest => 499,
            Self::InternalServerError => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.http_status() >= 500
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The underlying error that caused an [`RpcError`].
///
/// Opaque to the wire; recover the concrete type with [`ErrorCause::downcast_ref`].
#[derive(Clone)]
pub struct ErrorCause(Arc<dyn std::error::Error + Send + Sync>);

impl ErrorCause {
    /// Wrap any error as a cause.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Borrow the cause as a concrete error type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Returns true if the cause is of type `E`.
    pub fn is<E: std::error::Error + 'static>(&self) -> bool {
        self.0.is::<E>()
    }
}

impl fmt::Debug for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for ErrorCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// A panic caught while executing a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("panicked: {message}")]
pub struct PanicError {
    /// The panic payload when it was a string, otherwise a placeholder.
    pub message: String,
}

impl PanicError {
    /// Build from a payload returned by `catch_unwind`.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

/// RPC error with type-safe code and message.
///
/// # Example
/// ```rust,ignore
/// use nexus_rpc::{RpcError, RpcErrorCode};
///
/// let error = RpcError::new(RpcErrorCode::NotFound, "User not found")
///     .with_details(serde_json::json!({"user_id": 123}));
/// ```
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct RpcError {
    /// Type-safe error code
    pub code: RpcErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Dotted path of the procedure the error was raised in
    pub path: Option<String>,
    /// Optional additional details (JSON value)
    pub details: Option<serde_json::Value>,
    /// Underlying error, never sent over the wire directly
    #[source]
    pub cause: Option<ErrorCause>,
    /// Stack trace captured in debug builds
    pub stack: Option<String>,
}

impl RpcError {
    /// Create a new error with code and message.
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            details: None,
            cause: None,
            stack: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Attach the underlying error.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(ErrorCause::new(cause));
        self
    }

    /// Set the procedure path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add a stack trace (only shown in development mode).
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture the current stack trace (only in debug builds).
    #[cfg(debug_assertions)]
    pub fn capture_stack(mut self) -> Self {
        self.stack = Some(std::backtrace::Backtrace::capture().to_string());
        self
    }

    /// Capture the current stack trace (no-op in release builds).
    #[cfg(not(debug_assertions))]
    pub fn capture_stack(self) -> Self {
        self
    }

    /// Borrow the cause as a concrete type.
    pub fn cause_as<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.cause.as_ref().and_then(|c| c.downcast_ref::<E>())
    }

    /// Classify an arbitrary error.
    ///
    /// An `RpcError` is returned as is. Anything else becomes an
    /// `INTERNAL_SERVER_ERROR` that keeps the original as its cause.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(error);
        match boxed.downcast::<RpcError>() {
            Ok(rpc) => *rpc,
            Err(other) => {
                let message = other.to_string();
                Self {
                    cause: Some(ErrorCause(Arc::from(other))),
                    ..Self::internal(message)
                }
            }
        }
    }

    /// Classify a panic payload caught at the call boundary.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let panic = PanicError::from_payload(payload);
        warn!(panic = %panic.message, "Caught panic while executing procedure");
        Self::internal("Procedure panicked")
            .with_cause(panic)
            .capture_stack()
    }

    /// Set the path unless one is already present.
    pub(crate) fn or_path(mut self, path: &str) -> Self {
        if self.path.is_none() {
            self.path = Some(path.to_string());
        }
        self
    }

    /// Replace the message of server errors with a generic one.
    pub fn sanitize(mut self) -> Self {
        if self.code.is_server_error() {
            debug!(
                original_message = %self.message,
                "Sanitizing server error for client response"
            );
            self.message = "An internal error occurred".to_string();
            self.details = None;
            self.stack = None;
        }
        self
    }

    // Convenience constructors

    /// Create a NOT_FOUND error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::NotFound, message)
    }

    /// Create a BAD_REQUEST error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::BadRequest, message)
    }

    /// Create an UNAUTHORIZED error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Unauthorized, message)
    }

    /// Create a FORBIDDEN error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Forbidden, message)
    }

    /// Create a TIMEOUT error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Timeout, message)
    }

    /// Create a CONFLICT error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Conflict, message)
    }

    /// Create a PRECONDITION_FAILED error.
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::PreconditionFailed, message)
    }

    /// Create a PAYLOAD_TOO_LARGE error.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::PayloadTooLarge, message)
    }

    /// Create an UNPROCESSABLE_CONTENT error.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::UnprocessableContent, message)
    }

    /// Create a TOO_MANY_REQUESTS error.
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::TooManyRequests, message)
    }

    /// Create a CLIENT_CLOSED_REQUEST error.
    pub fn client_closed(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ClientClosedRequest, message)
    }

    /// Create an INTERNAL_SERVER_ERROR error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InternalServerError, message)
    }

    /// Create a NOT_FOUND error for an unknown procedure path.
    pub fn procedure_not_found(path: &str) -> Self {
        Self::not_found(format!("No procedure found on path '{}'", path)).with_path(path)
    }
}

impl PartialEq for RpcError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message && self.path == other.path
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err)).with_cause(err)
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("IO error: {}", err)).with_cause(err)
    }
}

impl Serialize for RpcError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("RpcError", 4)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref path) = self.path {
            state.serialize_field("path", path)?;
        }
        if let Some(ref details) = self.details {
            state.serialize_field("details", details)?;
        }
        state.end()
    }
}

/// Result type alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;
