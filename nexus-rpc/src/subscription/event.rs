//! Subscription event types

use crate::RpcError;
use serde_json::Value;

/// One item delivered to a subscriber.
///
/// Use [`Caller::event_to_wire`](crate::Caller::event_to_wire) to send it, so
/// the error of an `Error` event goes through the error formatter.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// A value emitted by the producer. `seq` starts at 0 and increases by one.
    Data {
        /// Position of the value in the subscription
        seq: u64,
        /// The validated value
        data: Value,
    },
    /// The producer failed. No event follows.
    Error {
        /// What went wrong
        error: RpcError,
    },
    /// The producer finished. No event follows.
    Completed,
}

impl SubscriptionEvent {
    /// Returns true for `Error` and `Completed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Data { .. })
    }

    /// The payload of a data event.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Data { data, .. } => Some(data),
            _ => None,
        }
    }
}
