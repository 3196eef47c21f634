//! Router implementation
//!
//! A router is a named tree of procedures and nested routers, flattened into
//! a lookup table keyed by [`ProcedurePath`]:
//!
//! ```rust,ignore
//! let posts = Router::builder()
//!     .procedure("byId", post_by_id)
//!     .procedure("list", list_posts)
//!     .build()?;
//!
//! let app = Router::builder()
//!     .procedure("health", health)
//!     .nest("post", posts)
//!     .build()?;
//! // Paths: health, post.byId, post.list
//! ```
//!
//! Routers are immutable once built. [`merge_routers`] unions routers and
//! refuses to silently overwrite a path defined twice.

mod core;
mod error;
mod path;
mod schema;

pub use self::core::{Router, RouterBuilder, RouterEntry, merge_routers, router};
pub use error::RouterError;
pub use path::ProcedurePath;
pub use schema::{ProcedureSchema, RouterSchema};

#[cfg(test)]
mod tests;
