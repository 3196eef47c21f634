//! Request logging middleware
//!
//! [`logging_middleware`] logs each call through `tracing` with a request id,
//! duration and outcome. Input can be logged too; fields whose names look
//! sensitive are replaced before anything is written.
//!
//! ```rust,ignore
//! let base = procedure::<AppContext>().use_middleware_fn(logging_middleware(
//!     LogConfig::new()
//!         .with_level(LogLevel::Debug)
//!         .with_input(true)
//!         .redact_field("session"),
//! ));
//! ```
//!
//! The request id is also added to the context under [`REQUEST_ID_KEY`].

use crate::context::{Context, ContextPatch};
use crate::middleware::{MiddlewareFn, Next, Request, from_fn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Context key under which the request id is stored.
pub const REQUEST_ID_KEY: &str = "request_id";

const DEFAULT_REPLACEMENT: &str = "[REDACTED]";

/// Unique, time-ordered request identifier (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// First 8 hex characters, for compact log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Level at which successful calls are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose
    Trace,
    /// Development detail
    Debug,
    /// Normal operation (default)
    #[default]
    Info,
    /// Potential problems
    Warn,
    /// Failures
    Error,
    /// Logging disabled
    Off,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for successful calls. Failures are logged at warn (server
    /// errors) or debug (client errors).
    pub level: LogLevel,
    /// Log the redacted input.
    pub log_input: bool,
    /// Log successful calls.
    pub log_success: bool,
    /// Log failed calls.
    pub log_errors: bool,
    /// Paths that are never logged.
    pub excluded_paths: HashSet<String>,
    /// Field names to redact, matched case-insensitively as substrings.
    pub redacted_fields: HashSet<String>,
    /// Value written in place of redacted fields.
    pub redaction_replacement: String,
    /// Calls slower than this are logged at warn.
    pub slow_request_threshold_ms: Option<u64>,
}

fn default_redacted_fields() -> HashSet<String> {
    [
        "password",
        "secret",
        "token",
        "api_key",
        "apikey",
        "authorization",
        "credential",
        "private_key",
        "privatekey",
        "ssn",
        "credit_card",
        "creditcard",
        "cvv",
        "bearer",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_input: false,
            log_success: true,
            log_errors: true,
            excluded_paths: HashSet::new(),
            redacted_fields: default_redacted_fields(),
            redaction_replacement: DEFAULT_REPLACEMENT.to_string(),
            slow_request_threshold_ms: Some(1000),
        }
    }
}

impl LogConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the level for successful calls.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Enable or disable input logging.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_input(mut self, enabled: bool) -> Self {
        self.log_input = enabled;
        self
    }

    /// Enable or disable logging of successful calls.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_success(mut self, enabled: bool) -> Self {
        self.log_success = enabled;
        self
    }

    /// Enable or disable logging of failed calls.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_errors(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    /// Never log calls to `path`.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn exclude_path(mut self, path: impl Into<String>) -> Self {
        self.excluded_paths.insert(path.into());
        self
    }

    /// Add a field name to redact.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn redact_field(mut self, field: impl Into<String>) -> Self {
        self.redacted_fields.insert(field.into().to_lowercase());
        self
    }

    /// Set the slow call threshold. `None` disables slow call warnings.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_slow_threshold(mut self, threshold_ms: Option<u64>) -> Self {
        self.slow_request_threshold_ms = threshold_ms;
        self
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.redacted_fields
            .iter()
            .any(|field| key.contains(&field.to_lowercase()))
    }
}

/// Copy of `value` with every sensitive field replaced, at any depth.
pub fn redact_value(value: &Value, config: &LogConfig) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let val = if config.is_sensitive(key) {
                        Value::String(config.redaction_replacement.clone())
                    } else {
                        redact_value(val, config)
                    };
                    (key.clone(), val)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(v, config)).collect()),
        other => other.clone(),
    }
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Trace => tracing::trace!($($arg)+),
            LogLevel::Debug => tracing::debug!($($arg)+),
            LogLevel::Info => tracing::info!($($arg)+),
            LogLevel::Warn => tracing::warn!($($arg)+),
            LogLevel::Error => tracing::error!($($arg)+),
            LogLevel::Off => {}
        }
    };
}

/// Creates a logging middleware with the given configuration.
pub fn logging_middleware<Ctx>(config: LogConfig) -> MiddlewareFn<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    let config = Arc::new(config);
    from_fn(move |ctx: Context<Ctx>, req: Request, next: Next<Ctx>| {
        let config = Arc::clone(&config);
        async move {
            let path = req.path.to_string();
            if config.level == LogLevel::Off || config.excluded_paths.contains(&path) {
                return next.run(ctx, req).await;
            }

            let request_id = RequestId::new();
            let procedure_type = req.procedure_type;
            if config.log_input {
                let input = redact_value(&req.input, &config);
                log_at!(config.level, request_id = %request_id, path = %path, %procedure_type, input = %input, "RPC request started");
            } else {
                log_at!(config.level, request_id = %request_id, path = %path, %procedure_type, "RPC request started");
            }

            let started = Instant::now();
            let result = next
                .run_with(ctx, ContextPatch::new().insert(REQUEST_ID_KEY, request_id), req)
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(_) => {
                    if config.log_success {
                        log_at!(config.level, request_id = %request_id, path = %path, duration_ms, "RPC request completed");
                    }
                    if config
                        .slow_request_threshold_ms
                        .is_some_and(|threshold| duration_ms > threshold)
                    {
                        tracing::warn!(request_id = %request_id, path = %path, duration_ms, "Slow RPC request");
                    }
                }
                Err(error) if config.log_errors => {
                    let level = if error.code.is_server_error() {
                        LogLevel::Warn
                    } else {
                        LogLevel::Debug
                    };
                    log_at!(
                        level,
                        request_id = %request_id,
                        path = %path,
                        duration_ms,
                        error_code = %error.code,
                        error_message = %error.message,
                        "RPC request failed"
                    );
                }
                Err(_) => {}
            }
            result
        }
    })
}
