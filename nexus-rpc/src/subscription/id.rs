//! Subscription ID types and utilities

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error parsing a subscription ID.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The `sub_` prefix is missing
    #[error("subscription id must start with 'sub_'")]
    MissingPrefix,
    /// The part after the prefix is not a UUID
    #[error("invalid subscription uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),
}

/// Unique, time-ordered subscription identifier (UUID v7).
///
/// Printed as `sub_<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a new ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse the `sub_<uuid>` form.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let uuid = s.strip_prefix("sub_").ok_or(ParseError::MissingPrefix)?;
        Ok(Self(Uuid::parse_str(uuid)?))
    }

    /// Parse with or without the `sub_` prefix.
    pub fn parse_lenient(s: &str) -> Result<Self, ParseError> {
        let uuid = s.strip_prefix("sub_").unwrap_or(s);
        Ok(Self(Uuid::parse_str(uuid)?))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = SubscriptionId::new();
        let printed = id.to_string();
        assert!(printed.starts_with("sub_"));
        assert_eq!(SubscriptionId::parse(&printed).unwrap(), id);
        assert_eq!(SubscriptionId::parse_lenient(&id.as_uuid().to_string()).unwrap(), id);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            SubscriptionId::parse("0190a000-0000-7000-8000-000000000000"),
            Err(ParseError::MissingPrefix)
        ));
        assert!(matches!(
            SubscriptionId::parse("sub_nope"),
            Err(ParseError::InvalidUuid(_))
        ));
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let a = SubscriptionId::new();
        let b = SubscriptionId::new();
        assert!(a < b);
    }
}
