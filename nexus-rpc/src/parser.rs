//! Validator adapters
//!
//! A procedure validates its raw JSON input and its resolver output through
//! parsers. Two shapes are accepted and normalized into one [`ErasedParser`]:
//!
//! - an object implementing [`Parser`] (for example [`typed`] or [`validated`])
//! - a plain function from `Value` to a result, wrapped with [`from_fn`] or
//!   [`from_async_fn`]
//!
//! Every parser reports failure with a [`ValidationError`]; the procedure
//! decides whether that is a caller mistake (input) or a server fault (output).
//!
//! # Example
//!
//! ```rust,ignore
//! use nexus_rpc::parser::{self, typed};
//! use nexus_rpc::ValidationError;
//!
//! let name = typed::<String>();
//! let positive = parser::from_fn(|v: serde_json::Value| match v.as_i64() {
//!     Some(n) if n > 0 => Ok(n),
//!     _ => Err(ValidationError::new("expected a positive integer")),
//! });
//! ```

use crate::validation::{Validate, ValidationError};
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// A validator that turns raw JSON into a typed value.
pub trait Parser: Send + Sync + 'static {
    /// The parsed type handed to the resolver.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Parse and validate a raw value.
    fn parse(&self, input: Value)
    -> impl Future<Output = Result<Self::Output, ValidationError>> + Send;
}

type ParseFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value, ValidationError>> + Send + Sync;

/// A type-erased parser working on JSON values.
///
/// Cloning is cheap; all clones share the same parser.
#[derive(Clone)]
pub struct ErasedParser(Arc<ParseFn>);

impl ErasedParser {
    /// Erase a typed parser.
    pub fn new<P: Parser>(parser: P) -> Self {
        let parser = Arc::new(parser);
        Self(Arc::new(move |input: Value| {
            let parser = Arc::clone(&parser);
            Box::pin(async move {
                let parsed = parser.parse(input).await?;
                serde_json::to_value(parsed)
                    .map_err(|e| ValidationError::new(format!("parsed value is not JSON: {}", e)))
            })
        }))
    }

    /// Run the parser.
    pub fn parse(&self, input: Value) -> BoxFuture<'static, Result<Value, ValidationError>> {
        (self.0)(input)
    }
}

impl fmt::Debug for ErasedParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErasedParser")
    }
}

/// Run every parser against the same raw input and combine the results.
///
/// All parsers must succeed. Object results are shallow-merged with later keys
/// winning; any other result replaces what came before. With no parsers the
/// raw input passes through untouched.
pub async fn parse_all(parsers: &[ErasedParser], raw: Value) -> Result<Value, ValidationError> {
    let mut combined: Option<Value> = None;
    for (index, parser) in parsers.iter().enumerate() {
        trace!(parser = index, "Running parser");
        let parsed = parser.parse(raw.clone()).await?;
        combined = Some(match (combined, parsed) {
            (Some(Value::Object(mut acc)), Value::Object(next)) => {
                acc.extend(next);
                Value::Object(acc)
            }
            (_, next) => next,
        });
    }
    Ok(combined.unwrap_or(raw))
}

/// Parser that deserializes into `T` with serde.
pub struct Typed<T>(PhantomData<fn() -> T>);

/// Accept any value that deserializes into `T`.
pub fn typed<T>() -> Typed<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    Typed(PhantomData)
}

impl<T> Parser for Typed<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Output = T;

    async fn parse(&self, input: Value) -> Result<T, ValidationError> {
        serde_json::from_value(input).map_err(|e| ValidationError::from_serde(&e))
    }
}

/// Parser that deserializes into `T` and then runs its [`Validate`] rules.
pub struct Validated<T>(PhantomData<fn() -> T>);

/// Accept values that deserialize into `T` and pass `T::validate`.
pub fn validated<T>() -> Validated<T>
where
    T: Serialize + DeserializeOwned + Validate + Send + 'static,
{
    Validated(PhantomData)
}

impl<T> Parser for Validated<T>
where
    T: Serialize + DeserializeOwned + Validate + Send + 'static,
{
    type Output = T;

    async fn parse(&self, input: Value) -> Result<T, ValidationError> {
        let value: T = serde_json::from_value(input).map_err(|e| ValidationError::from_serde(&e))?;
        value.validate()?;
        Ok(value)
    }
}

/// Parser backed by a synchronous function.
pub struct FnParser<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

/// Wrap `Fn(Value) -> Result<T, ValidationError>` as a parser.
pub fn from_fn<F, T>(f: F) -> FnParser<F, T>
where
    F: Fn(Value) -> Result<T, ValidationError> + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    FnParser {
        f,
        _output: PhantomData,
    }
}

impl<F, T> Parser for FnParser<F, T>
where
    F: Fn(Value) -> Result<T, ValidationError> + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Output = T;

    async fn parse(&self, input: Value) -> Result<T, ValidationError> {
        (self.f)(input)
    }
}

/// Parser backed by an async function.
pub struct AsyncFnParser<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

/// Wrap `Fn(Value) -> impl Future<Output = Result<T, ValidationError>>` as a parser.
pub fn from_async_fn<F, Fut, T>(f: F) -> AsyncFnParser<F, T>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ValidationError>> + Send + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    AsyncFnParser {
        f,
        _output: PhantomData,
    }
}

impl<F, Fut, T> Parser for AsyncFnParser<F, T>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ValidationError>> + Send + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn parse(&self, input: Value) -> impl Future<Output = Result<T, ValidationError>> + Send {
        (self.f)(input)
    }
}
