//! Error shape formatting
//!
//! Turns an [`RpcError`] into the stable shape sent to clients:
//!
//! ```json
//! {
//!   "code": "BAD_REQUEST",
//!   "httpStatus": 400,
//!   "message": "Input validation failed: ...",
//!   "data": {
//!     "code": "BAD_REQUEST",
//!     "httpStatus": 400,
//!     "path": "greet",
//!     "validationError": { "message": "...", "issues": [ ... ] }
//!   }
//! }
//! ```
//!
//! A custom [`ErrorFormatter`] receives this default shape plus the original
//! error and returns whatever JSON it wants sent instead. Formatters are
//! trusted code; a panic inside one is not caught.

use crate::config::RpcConfig;
use crate::validation::ValidationError;
use crate::{RpcError, RpcErrorCode};
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

const SANITIZED_MESSAGE: &str = "An internal error occurred";

/// Default wire shape of an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorShape {
    /// Error code
    pub code: RpcErrorCode,
    /// HTTP status derived from the code
    pub http_status: u16,
    /// Message, possibly sanitized
    pub message: String,
    /// Structured extension data
    pub data: ErrorShapeData,
}

/// The `data` part of an [`ErrorShape`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorShapeData {
    /// Same as the top-level code
    pub code: RpcErrorCode,
    /// Same as the top-level status
    pub http_status: u16,
    /// Procedure path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Error details, dropped when the message is sanitized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Only in development mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Parser issues behind the error. Input failures always carry them;
    /// output failures only when server errors are not sanitized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<ValidationError>,
}

impl ErrorShape {
    /// Build the default shape for `error` under `config`.
    pub fn from_error(error: &RpcError, config: &RpcConfig) -> Self {
        let code = error.code;
        let sanitize = config.should_sanitize() && code.is_server_error();
        let http_status = code.http_status();
        Self {
            code,
            http_status,
            message: if sanitize {
                SANITIZED_MESSAGE.to_string()
            } else {
                error.message.clone()
            },
            data: ErrorShapeData {
                code,
                http_status,
                path: error.path.clone(),
                details: if sanitize { None } else { error.details.clone() },
                stack: error.stack.clone().filter(|_| config.development_mode),
                validation_error: if sanitize {
                    None
                } else {
                    error.cause_as::<ValidationError>().cloned()
                },
            },
        }
    }

    /// Serialize the shape to JSON.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Hook that controls the wire shape of errors.
///
/// Implemented for closures taking the default shape and the error.
///
/// # Example
/// ```rust,ignore
/// let caller = Caller::new(app_router).with_formatter(|shape: ErrorShape, error: &RpcError| {
///     let mut value = shape.to_value();
///     value["data"]["requestId"] = json!(error.details.as_ref().and_then(|d| d.get("requestId")));
///     value
/// });
/// ```
pub trait ErrorFormatter: Send + Sync + 'static {
    /// Produce the value sent to the client.
    fn format(&self, shape: ErrorShape, error: &RpcError) -> Value;
}

impl<F> ErrorFormatter for F
where
    F: Fn(ErrorShape, &RpcError) -> Value + Send + Sync + 'static,
{
    fn format(&self, shape: ErrorShape, error: &RpcError) -> Value {
        self(shape, error)
    }
}

/// Formatter that sends the default shape unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorFormatter;

impl ErrorFormatter for DefaultErrorFormatter {
    fn format(&self, shape: ErrorShape, _error: &RpcError) -> Value {
        shape.to_value()
    }
}

/// Format `error` with `formatter` under `config`.
pub fn format_error(error: &RpcError, config: &RpcConfig, formatter: &dyn ErrorFormatter) -> Value {
    trace!(
        code = %error.code,
        development_mode = config.development_mode,
        "Formatting error shape"
    );
    formatter.format(ErrorShape::from_error(error, config), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FieldError;
    use serde_json::json;

    fn production() -> RpcConfig {
        RpcConfig::new().with_development_mode(false)
    }

    #[test]
    fn test_default_shape() {
        let error = RpcError::not_found("No procedure found on path 'x'").with_path("x");
        let value = format_error(&error, &production(), &DefaultErrorFormatter);
        assert_eq!(
            value,
            json!({
                "code": "NOT_FOUND",
                "httpStatus": 404,
                "message": "No procedure found on path 'x'",
                "data": {"code": "NOT_FOUND", "httpStatus": 404, "path": "x"}
            })
        );
    }

    #[test]
    fn test_production_hides_server_messages_and_stack() {
        let error = RpcError::internal("connection string: secret")
            .with_details(json!({"query": "select"}))
            .with_stack("at db.rs:10");
        let shape = ErrorShape::from_error(&error, &production());
        assert_eq!(shape.message, SANITIZED_MESSAGE);
        assert!(shape.data.details.is_none());
        assert!(shape.data.stack.is_none());

        let dev = ErrorShape::from_error(&error, &RpcConfig::new().with_development_mode(true));
        assert_eq!(dev.message, "connection string: secret");
        assert_eq!(dev.data.stack.as_deref(), Some("at db.rs:10"));

        // The error itself is never modified
        assert_eq!(error.message, "connection string: secret");
    }

    #[test]
    fn test_validation_cause_is_exposed() {
        let cause = ValidationError::from_issues(vec![FieldError::required("name")]);
        let error = RpcError::from(cause.clone());
        let shape = ErrorShape::from_error(&error, &production());
        assert_eq!(shape.code, RpcErrorCode::BadRequest);
        assert_eq!(shape.data.validation_error, Some(cause));
        assert!(shape.to_value()["data"]["validationError"]["issues"].is_array());
    }

    #[test]
    fn test_output_issues_hidden_when_sanitized() {
        let cause = ValidationError::new("invalid value: integer `-42`, expected u32");
        let error = RpcError::internal(format!("Output validation failed: {}", cause.message))
            .with_cause(cause.clone());

        let shape = ErrorShape::from_error(&error, &production());
        assert_eq!(shape.message, SANITIZED_MESSAGE);
        assert!(shape.data.validation_error.is_none());
        assert!(!shape.to_value().to_string().contains("-42"));

        let dev = ErrorShape::from_error(&error, &RpcConfig::new().with_development_mode(true));
        assert_eq!(dev.data.validation_error, Some(cause));
    }

    #[test]
    fn test_closure_formatter_extends_shape() {
        let formatter = |shape: ErrorShape, error: &RpcError| {
            let mut value = shape.to_value();
            value["data"]["retryable"] = json!(error.code == RpcErrorCode::TooManyRequests);
            value
        };
        let value = format_error(&RpcError::too_many_requests("slow down"), &production(), &formatter);
        assert_eq!(value["data"]["retryable"], json!(true));
        assert_eq!(value["httpStatus"], json!(429));
    }
}
