//! Validation vocabulary shared by parsers
//!
//! A parser that rejects a value returns a [`ValidationError`]: a summary
//! message plus the individual [`FieldError`] issues. Types that check
//! themselves implement [`Validate`], usually with [`ValidationRules`]:
//!
//! ```rust,ignore
//! use nexus_rpc::{Validate, ValidationResult, ValidationRules};
//!
//! #[derive(serde::Deserialize)]
//! struct CreateUser {
//!     name: String,
//!     email: String,
//!     age: i64,
//!     address: Address,
//! }
//!
//! impl Validate for CreateUser {
//!     fn validate(&self) -> ValidationResult {
//!         ValidationRules::new()
//!             .required("name", &self.name)
//!             .max_length("name", &self.name, 64)
//!             .email("email", &self.email)
//!             .range("age", self.age, 0, 150)
//!             .nested("address", &self.address)
//!             .build()
//!     }
//! }
//! ```
//!
//! Issues of a nested value are reported under a dotted field path such as
//! `address.zip` or `items.2.name`.

use crate::{RpcError, RpcResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, trace};

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").ok());

/// Kind of a field issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    /// Missing or blank value
    Required,
    /// Fewer characters or items than allowed
    TooShort,
    /// More characters or items than allowed
    TooLong,
    /// Number outside its bounds
    OutOfRange,
    /// Text that does not have the expected format
    InvalidFormat,
    /// Value of the wrong JSON type, or that could not be decoded
    InvalidType,
    /// Application-defined check
    Custom,
}

impl IssueCode {
    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::TooShort => "too_short",
            Self::TooLong => "too_long",
            Self::OutOfRange => "out_of_range",
            Self::InvalidFormat => "invalid_format",
            Self::InvalidType => "invalid_type",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem with one field.
///
/// `field` is a dotted path relative to the validated value. `$` stands for
/// the value itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field
    pub field: String,
    /// Kind of issue
    pub code: IssueCode,
    /// Human-readable description
    pub message: String,
}

impl FieldError {
    /// Create an issue.
    pub fn new(field: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }

    /// The field is missing or blank.
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{} is required", field);
        Self::new(field, IssueCode::Required, message)
    }

    /// The field is shorter than `min`.
    pub fn too_short(field: impl Into<String>, min: usize) -> Self {
        let field = field.into();
        let message = format!("{} must be at least {} characters", field, min);
        Self::new(field, IssueCode::TooShort, message)
    }

    /// The field is longer than `max`.
    pub fn too_long(field: impl Into<String>, max: usize) -> Self {
        let field = field.into();
        let message = format!("{} must be at most {} characters", field, max);
        Self::new(field, IssueCode::TooLong, message)
    }

    /// The field is outside `min..=max`.
    pub fn out_of_range(
        field: impl Into<String>,
        min: impl fmt::Display,
        max: impl fmt::Display,
    ) -> Self {
        let field = field.into();
        let message = format!("{} must be between {} and {}", field, min, max);
        Self::new(field, IssueCode::OutOfRange, message)
    }

    /// The field is not `expected`, e.g. "an email address".
    pub fn invalid_format(field: impl Into<String>, expected: &str) -> Self {
        let field = field.into();
        let message = format!("{} must be {}", field, expected);
        Self::new(field, IssueCode::InvalidFormat, message)
    }

    /// The field has the wrong type.
    pub fn invalid_type(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, IssueCode::InvalidType, message)
    }

    /// An application-defined issue.
    pub fn custom(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, IssueCode::Custom, message)
    }

    /// The same issue reported under `prefix`.
    pub fn at(mut self, prefix: &str) -> Self {
        self.field = if self.field == "$" {
            prefix.to_string()
        } else {
            format!("{}.{}", prefix, self.field)
        };
        self
    }
}

/// Outcome of [`Validate::validate`].
pub type ValidationResult = Result<(), ValidationError>;

/// A value that checks its own invariants after deserialization.
///
/// Pair it with [`crate::parser::validated`] so a procedure rejects invalid
/// input before its resolver runs.
pub trait Validate {
    /// Check the value, reporting every issue found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for () {
    fn validate(&self) -> ValidationResult {
        Ok(())
    }
}

impl Validate for serde_json::Value {
    fn validate(&self) -> ValidationResult {
        Ok(())
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> ValidationResult {
        self.as_ref().map_or(Ok(()), Validate::validate)
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> ValidationResult {
        self.iter()
            .enumerate()
            .fold(ValidationRules::new(), |rules, (i, item)| {
                rules.nested(&i.to_string(), item)
            })
            .build()
    }
}

/// Collects issues from a series of checks.
///
/// Every check runs; [`build`](Self::build) reports all failures at once.
#[derive(Debug, Default)]
pub struct ValidationRules {
    issues: Vec<FieldError>,
}

impl ValidationRules {
    /// Start with no issues.
    pub fn new() -> Self {
        Self::default()
    }

    fn check(mut self, ok: bool, issue: impl FnOnce() -> FieldError) -> Self {
        if !ok {
            let issue = issue();
            trace!(field = %issue.field, code = %issue.code, "Validation check failed");
            self.issues.push(issue);
        }
        self
    }

    /// Record an issue unconditionally.
    pub fn issue(mut self, issue: FieldError) -> Self {
        self.issues.push(issue);
        self
    }

    /// `value` must contain something other than whitespace.
    pub fn required(self, field: &str, value: &str) -> Self {
        self.check(!value.trim().is_empty(), || FieldError::required(field))
    }

    /// `value` must have at least `min` characters.
    pub fn min_length(self, field: &str, value: &str, min: usize) -> Self {
        self.check(value.chars().count() >= min, || FieldError::too_short(field, min))
    }

    /// `value` must have at most `max` characters.
    pub fn max_length(self, field: &str, value: &str, max: usize) -> Self {
        self.check(value.chars().count() <= max, || FieldError::too_long(field, max))
    }

    /// `value` must lie in `min..=max`.
    pub fn range<N>(self, field: &str, value: N, min: N, max: N) -> Self
    where
        N: PartialOrd + fmt::Display,
    {
        let ok = value >= min && value <= max;
        self.check(ok, || FieldError::out_of_range(field, min, max))
    }

    /// `value` must match `pattern`. `expected` describes the format in the
    /// issue message, e.g. "a 5 digit zip code".
    pub fn matches(self, field: &str, value: &str, pattern: &Regex, expected: &str) -> Self {
        self.check(pattern.is_match(value), || {
            FieldError::invalid_format(field, expected)
        })
    }

    /// `value` must look like an email address.
    pub fn email(self, field: &str, value: &str) -> Self {
        let ok = EMAIL.as_ref().is_some_and(|re| re.is_match(value));
        self.check(ok, || FieldError::invalid_format(field, "an email address"))
    }

    /// `ok` must hold, otherwise `message` is reported for `field`.
    pub fn custom(self, field: &str, ok: bool, message: &str) -> Self {
        self.check(ok, || FieldError::custom(field, message))
    }

    /// Validate a nested value, reporting its issues under `field`.
    pub fn nested<V: Validate + ?Sized>(mut self, field: &str, value: &V) -> Self {
        if let Err(err) = value.validate() {
            self.issues
                .extend(err.issues.into_iter().map(|issue| issue.at(field)));
        }
        self
    }

    /// Finish: `Ok` when no check failed.
    pub fn build(self) -> ValidationResult {
        if self.issues.is_empty() {
            return Ok(());
        }
        debug!(issue_count = self.issues.len(), "Validation failed");
        Err(ValidationError::from_issues(self.issues))
    }
}

/// The failure a parser reports.
///
/// Its `issues` are surfaced in the `validationError` field of the wire
/// error shape.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ValidationError {
    /// Summary of what was wrong
    pub message: String,
    /// Field-level issues, possibly empty
    pub issues: Vec<FieldError>,
}

impl ValidationError {
    /// Create an error with no field issues.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            issues: Vec::new(),
        }
    }

    /// Create an error from field issues.
    pub fn from_issues(issues: Vec<FieldError>) -> Self {
        let message = match issues.as_slice() {
            [] => "Validation failed".to_string(),
            [single] => single.message.clone(),
            many => format!("Validation failed with {} issues", many.len()),
        };
        Self { message, issues }
    }

    /// Add a field issue.
    pub fn with_issue(mut self, issue: FieldError) -> Self {
        self.issues.push(issue);
        self
    }

    /// Issues reported for `field`.
    pub fn issues_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldError> {
        self.issues.iter().filter(move |issue| issue.field == field)
    }

    /// Build from a deserialization failure.
    ///
    /// Missing and unknown fields are attributed to the field serde names.
    pub fn from_serde(err: &serde_json::Error) -> Self {
        let text = err.to_string();
        let issue = match backticked(&text) {
            Some(field) if text.starts_with("missing field") => FieldError::required(field),
            Some(field) if text.starts_with("unknown field") => {
                FieldError::invalid_type(field, format!("{} is not an accepted field", field))
            }
            _ => FieldError::invalid_type("$", text.clone()),
        };
        Self::new(text).with_issue(issue)
    }
}

/// First `` `quoted` `` word in a serde message.
fn backticked(text: &str) -> Option<&str> {
    let start = text.find('`')? + 1;
    let len = text[start..].find('`')?;
    Some(&text[start..start + len])
}

impl From<ValidationError> for RpcError {
    /// Input-side conversion. Output validation failures are classified by the
    /// procedure itself.
    fn from(err: ValidationError) -> Self {
        RpcError::bad_request(format!("Input validation failed: {}", err.message)).with_cause(err)
    }
}

/// Byte sink that fails once more than `limit` bytes were written.
struct SizeBudget {
    written: usize,
    limit: usize,
}

impl io::Write for SizeBudget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written += buf.len();
        if self.written > self.limit {
            return Err(io::Error::other("size limit exceeded"));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reject input whose JSON encoding is longer than `max_size` bytes.
///
/// Serialization stops as soon as the limit is passed, so an oversized input
/// is never encoded in full.
///
/// # Errors
///
/// Returns a `PAYLOAD_TOO_LARGE` error if the input exceeds `max_size`.
pub fn validate_input_size(input: &serde_json::Value, max_size: usize) -> RpcResult<()> {
    let mut budget = SizeBudget {
        written: 0,
        limit: max_size,
    };
    if serde_json::to_writer(&mut budget, input).is_err() {
        debug!(max_size, "Input rejected by size limit");
        return Err(RpcError::payload_too_large(format!(
            "Input exceeds the maximum size of {} bytes",
            max_size
        )));
    }
    Ok(())
}
