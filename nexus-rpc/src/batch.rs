//! Batch execution
//!
//! Runs several queries and mutations against one [`Caller`] and returns
//! their results in request order. Entries fail independently; only an
//! invalid batch as a whole fails the call.
//!
//! # Example
//!
//! ```rust,ignore
//! let batch = BatchRequest::new()
//!     .query("1", "user.get", json!({"id": 1}))
//!     .mutation("2", "user.touch", json!({"id": 1}));
//!
//! let response = caller.call_batch(batch, ctx).await?;
//! assert_eq!(response.len(), 2);
//! ```

use crate::caller::{CallRequest, Caller, ExecutionResult};
use crate::config::ConfigValidationError;
use crate::context::Context;
use crate::middleware::ProcedureType;
use crate::router::ProcedurePath;
use crate::{RpcError, RpcResult};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Configuration for batch request processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of calls allowed in a single batch.
    pub max_batch_size: usize,
    /// Run calls concurrently instead of one after another.
    pub parallel: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            parallel: true,
        }
    }
}

impl BatchConfig {
    /// Create a new batch configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum batch size.
    #[must_use = "This method returns a new BatchConfig and does not modify self"]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set whether to execute calls in parallel.
    #[must_use = "This method returns a new BatchConfig and does not modify self"]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Validate the batch configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValidationError::InvalidMaxBatchSize`] if
    /// `max_batch_size` is 0.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_batch_size == 0 {
            warn!("BatchConfig validation failed: max_batch_size must be greater than 0");
            return Err(ConfigValidationError::InvalidMaxBatchSize);
        }
        Ok(())
    }
}

/// A single call within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCall {
    /// Identifier used to correlate the result.
    pub id: String,
    /// Dotted procedure path (e.g. `"user.get"`).
    pub path: String,
    /// Procedure kind. Defaults to query.
    #[serde(rename = "type", default = "default_type")]
    pub procedure_type: ProcedureType,
    /// Raw input. Defaults to null.
    #[serde(default)]
    pub input: Value,
}

fn default_type() -> ProcedureType {
    ProcedureType::Query
}

/// A batch of calls to be processed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// The calls, in order.
    pub calls: Vec<BatchCall>,
}

impl BatchRequest {
    /// Create a new empty batch request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a call of any kind.
    #[must_use = "This method returns a new BatchRequest and does not modify self"]
    pub fn add(
        mut self,
        id: impl Into<String>,
        procedure_type: ProcedureType,
        path: impl Into<String>,
        input: Value,
    ) -> Self {
        self.calls.push(BatchCall {
            id: id.into(),
            path: path.into(),
            procedure_type,
            input,
        });
        self
    }

    /// Add a query.
    #[must_use = "This method returns a new BatchRequest and does not modify self"]
    pub fn query(self, id: impl Into<String>, path: impl Into<String>, input: Value) -> Self {
        self.add(id, ProcedureType::Query, path, input)
    }

    /// Add a mutation.
    #[must_use = "This method returns a new BatchRequest and does not modify self"]
    pub fn mutation(self, id: impl Into<String>, path: impl Into<String>, input: Value) -> Self {
        self.add(id, ProcedureType::Mutation, path, input)
    }

    /// Number of calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Validate the batch against configuration limits.
    pub fn validate(&self, config: &BatchConfig) -> RpcResult<()> {
        if self.calls.is_empty() {
            warn!("Batch validation failed: batch request cannot be empty");
            return Err(RpcError::bad_request("Batch request cannot be empty"));
        }
        if self.calls.len() > config.max_batch_size {
            warn!(
                batch_size = self.calls.len(),
                max_size = config.max_batch_size,
                "Batch validation failed: size exceeds maximum"
            );
            return Err(RpcError::payload_too_large(format!(
                "Batch size {} exceeds maximum allowed size {}",
                self.calls.len(),
                config.max_batch_size
            )));
        }
        Ok(())
    }
}

/// Result of one call in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Id of the call.
    pub id: String,
    /// Outcome of the call.
    pub result: ExecutionResult,
}

impl BatchResult {
    /// Returns true if the call succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Results for every call of a batch, in request order.
///
/// [`Caller::batch_to_wire`] gives the wire form with errors formatted.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    /// One result per call.
    pub results: Vec<BatchResult>,
}

impl BatchResponse {
    /// Get the number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if the response is empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Count successful results.
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Count error results.
    pub fn error_count(&self) -> usize {
        self.len() - self.success_count()
    }

    /// Get result by call id.
    pub fn get(&self, id: &str) -> Option<&BatchResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

impl<Ctx: Send + Sync + 'static> Caller<Ctx> {
    /// Execute a batch of queries and mutations.
    ///
    /// Each call receives a clone of `context`. Subscriptions are rejected
    /// per entry with `BAD_REQUEST`.
    ///
    /// # Errors
    ///
    /// - `BAD_REQUEST` for an empty batch
    /// - `PAYLOAD_TOO_LARGE` when the batch exceeds `max_batch_size`
    pub async fn call_batch(
        &self,
        batch: BatchRequest,
        context: Context<Ctx>,
    ) -> RpcResult<BatchResponse> {
        let config = &self.config().batch;
        batch.validate(config)?;

        let started = Instant::now();
        debug!(batch_size = batch.len(), parallel = config.parallel, "Executing batch request");

        let results = if config.parallel {
            join_all(
                batch
                    .calls
                    .into_iter()
                    .map(|call| self.batch_entry(call, context.clone())),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(batch.calls.len());
            for call in batch.calls {
                results.push(self.batch_entry(call, context.clone()).await);
            }
            results
        };

        let response = BatchResponse { results };
        debug!(
            total = response.len(),
            success = response.success_count(),
            errors = response.error_count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Batch execution completed"
        );
        Ok(response)
    }

    /// Wire form of a batch response, with every error formatted.
    ///
    /// ```json
    /// [{"id": "1", "ok": true, "data": 5}, {"id": "2", "ok": false, "error": {...}}]
    /// ```
    pub fn batch_to_wire(&self, response: &BatchResponse) -> Value {
        response
            .results
            .iter()
            .map(|entry| match self.to_wire(&entry.result) {
                Value::Object(mut fields) => {
                    fields.insert("id".to_string(), json!(entry.id));
                    Value::Object(fields)
                }
                other => json!({"id": entry.id, "result": other}),
            })
            .collect()
    }

    async fn batch_entry(&self, call: BatchCall, context: Context<Ctx>) -> BatchResult {
        let BatchCall {
            id,
            path,
            procedure_type,
            input,
        } = call;
        trace!(request_id = %id, path = %path, "Batch entry");

        let result = if procedure_type == ProcedureType::Subscription {
            ExecutionResult::Failure(
                RpcError::bad_request("Subscriptions are not supported in batch requests")
                    .with_path(path),
            )
        } else {
            let request = CallRequest::new(procedure_type, ProcedurePath::from(path), context)
                .input(input);
            self.call(request).await.into_result()
        };
        BatchResult { id, result }
    }
}
