//! Router construction errors

use thiserror::Error;

/// A router could not be built.
///
/// Every variant is detected while the router is being assembled, never at
/// call time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The same key appears twice in one router definition.
    #[error("duplicate key '{key}' in router definition")]
    DuplicateKey {
        /// The repeated key
        key: String,
    },

    /// Two routers define the same full path.
    #[error("procedure path '{path}' is defined more than once")]
    PathCollision {
        /// The dotted path defined twice
        path: String,
    },

    /// A key is empty, too long, or uses characters outside `[A-Za-z0-9_-]`.
    #[error("invalid router key '{name}': keys must be 1-255 characters of [A-Za-z0-9_-]")]
    InvalidName {
        /// The rejected key
        name: String,
    },
}
