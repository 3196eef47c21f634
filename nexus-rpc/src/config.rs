//! Runtime configuration for the [`Caller`](crate::Caller).
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::{BatchConfig, RpcConfig};
//!
//! let config = RpcConfig::new()
//!     .with_max_input_size(512 * 1024)
//!     .with_development_mode(false)
//!     .with_batch_config(BatchConfig::new().with_max_batch_size(50));
//! config.validate()?;
//! ```

use crate::batch::BatchConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default buffer of channels made with [`Context::event_channel`](crate::Context::event_channel).
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 32;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigValidationError {
    /// max_input_size must be greater than 0
    #[error("max_input_size must be greater than 0")]
    InvalidMaxInputSize,
    /// subscription_buffer must be greater than 0
    #[error("subscription_buffer must be greater than 0")]
    InvalidSubscriptionBuffer,
    /// batch.max_batch_size must be greater than 0
    #[error("batch.max_batch_size must be greater than 0")]
    InvalidMaxBatchSize,
}

/// Caller configuration.
///
/// Every field has a default, so a partial document deserializes.
///
/// * `max_input_size` - Maximum serialized input size in bytes. Larger inputs
///   fail with `PAYLOAD_TOO_LARGE` before any middleware runs. Default: 1MB.
/// * `development_mode` - Include stack traces in formatted errors.
///   Default: on in debug builds.
/// * `sanitize_server_errors` - Outside development mode, replace the message
///   of server-class errors with a generic one in formatted errors.
///   Default: true.
/// * `subscription_buffer` - Buffer of channels a subscription resolver makes
///   with [`Context::event_channel`](crate::Context::event_channel). Default: 32.
/// * `batch` - Limits for [`Caller::call_batch`](crate::Caller::call_batch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Maximum input JSON size in bytes (default: 1MB)
    pub max_input_size: usize,
    /// Development mode (default: debug builds)
    pub development_mode: bool,
    /// Hide server error messages in production (default: true)
    pub sanitize_server_errors: bool,
    /// Subscription channel buffer size (default: 32)
    pub subscription_buffer: usize,
    /// Batch request configuration
    pub batch: BatchConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_input_size: 1024 * 1024, // 1MB
            development_mode: cfg!(debug_assertions),
            sanitize_server_errors: true,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            batch: BatchConfig::default(),
        }
    }
}

impl RpcConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return an error if invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_input_size` is 0
    /// - `subscription_buffer` is 0
    /// - `batch` is invalid (e.g., max_batch_size is 0)
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_input_size == 0 {
            return Err(ConfigValidationError::InvalidMaxInputSize);
        }
        if self.subscription_buffer == 0 {
            return Err(ConfigValidationError::InvalidSubscriptionBuffer);
        }
        self.batch.validate()
    }

    /// Returns true if server-class messages should be hidden from clients.
    pub fn should_sanitize(&self) -> bool {
        self.sanitize_server_errors && !self.development_mode
    }

    /// Set the maximum input size in bytes.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = size;
        self
    }

    /// Enable or disable development mode.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_development_mode(mut self, enabled: bool) -> Self {
        self.development_mode = enabled;
        self
    }

    /// Enable or disable sanitizing of server error messages.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_sanitize_server_errors(mut self, enabled: bool) -> Self {
        self.sanitize_server_errors = enabled;
        self
    }

    /// Set the subscription buffer size.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_subscription_buffer(mut self, size: usize) -> Self {
        self.subscription_buffer = size;
        self
    }

    /// Set the batch configuration.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.batch = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RpcConfig::default();
        assert_eq!(config.max_input_size, 1024 * 1024);
        assert_eq!(config.subscription_buffer, 32);
        assert!(config.sanitize_server_errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert_eq!(
            RpcConfig::new().with_max_input_size(0).validate(),
            Err(ConfigValidationError::InvalidMaxInputSize)
        );
        assert_eq!(
            RpcConfig::new().with_subscription_buffer(0).validate(),
            Err(ConfigValidationError::InvalidSubscriptionBuffer)
        );
        assert_eq!(
            RpcConfig::new()
                .with_batch_config(BatchConfig::new().with_max_batch_size(0))
                .validate(),
            Err(ConfigValidationError::InvalidMaxBatchSize)
        );
        assert_eq!(
            BatchConfig::new().with_max_batch_size(0).validate(),
            Err(ConfigValidationError::InvalidMaxBatchSize)
        );
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: RpcConfig =
            serde_json::from_value(serde_json::json!({"max_input_size": 10})).unwrap();
        assert_eq!(config.max_input_size, 10);
        assert_eq!(config.subscription_buffer, 32);
    }

    #[test]
    fn test_sanitize_only_outside_development() {
        let config = RpcConfig::new().with_development_mode(true);
        assert!(!config.should_sanitize());
        assert!(config.with_development_mode(false).should_sanitize());
    }
}
