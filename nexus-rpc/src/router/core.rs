//! Router core
//!
//! A [`Router`] is a flat, immutable lookup table from [`ProcedurePath`] to
//! [`ProcedureDefinition`]. Nested definitions are flattened while the router
//! is built, so resolving a call is a single map lookup.

use super::error::RouterError;
use super::path::ProcedurePath;
use super::schema::{ProcedureSchema, RouterSchema};
use crate::procedure::ProcedureDefinition;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

type Table<Ctx> = BTreeMap<ProcedurePath, Arc<ProcedureDefinition<Ctx>>>;

/// One value in a router definition: a procedure or a nested router.
pub enum RouterEntry<Ctx> {
    /// A leaf procedure
    Procedure(ProcedureDefinition<Ctx>),
    /// A nested router whose paths are prefixed with the entry key
    Router(Router<Ctx>),
}

impl<Ctx> From<ProcedureDefinition<Ctx>> for RouterEntry<Ctx> {
    fn from(def: ProcedureDefinition<Ctx>) -> Self {
        Self::Procedure(def)
    }
}

impl<Ctx> From<Router<Ctx>> for RouterEntry<Ctx> {
    fn from(router: Router<Ctx>) -> Self {
        Self::Router(router)
    }
}

/// Build a router from `(key, entry)` pairs.
///
/// # Errors
///
/// Fails if a key is repeated or invalid.
///
/// # Example
/// ```rust,ignore
/// let app = router([
///     ("greet", greet.into()),
///     ("post", router([("byId", post_by_id.into())])?.into()),
/// ])?;
/// assert!(app.get(&"post.byId".into()).is_some());
/// ```
pub fn router<Ctx, I, K>(entries: I) -> Result<Router<Ctx>, RouterError>
where
    Ctx: Send + Sync + 'static,
    I: IntoIterator<Item = (K, RouterEntry<Ctx>)>,
    K: Into<String>,
{
    entries
        .into_iter()
        .fold(Router::builder(), |builder, (key, entry)| builder.entry(key, entry))
        .build()
}

/// Union several routers.
///
/// # Errors
///
/// Fails with [`RouterError::PathCollision`] if any path appears in more
/// than one input.
pub fn merge_routers<Ctx, I>(routers: I) -> Result<Router<Ctx>, RouterError>
where
    Ctx: Send + Sync + 'static,
    I: IntoIterator<Item = Router<Ctx>>,
{
    routers
        .into_iter()
        .fold(Router::builder(), RouterBuilder::merge)
        .build()
}

/// Flattened, immutable table of procedures.
///
/// Cloning is cheap and clones share the same table.
pub struct Router<Ctx> {
    procedures: Arc<Table<Ctx>>,
}

impl<Ctx: Send + Sync + 'static> Router<Ctx> {
    /// A router with no procedures.
    pub fn empty() -> Self {
        Self {
            procedures: Arc::new(BTreeMap::new()),
        }
    }

    /// Start building a router.
    pub fn builder() -> RouterBuilder<Ctx> {
        RouterBuilder::new()
    }

    /// Look up a procedure by full path.
    pub fn get(&self, path: &ProcedurePath) -> Option<&Arc<ProcedureDefinition<Ctx>>> {
        self.procedures.get(path)
    }

    /// Returns true if a procedure exists at `path`.
    pub fn contains(&self, path: &ProcedurePath) -> bool {
        self.procedures.contains_key(path)
    }

    /// List all procedure paths in sorted order.
    pub fn procedures(&self) -> Vec<String> {
        self.procedures.keys().map(ToString::to_string).collect()
    }

    /// Iterate over paths and definitions in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProcedurePath, &Arc<ProcedureDefinition<Ctx>>)> {
        self.procedures.iter()
    }

    /// Number of procedures.
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Returns true if the router has no procedures.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Union with another router, failing on any shared path.
    pub fn merge(&self, other: &Router<Ctx>) -> Result<Router<Ctx>, RouterError> {
        merge_routers([self.clone(), other.clone()])
    }

    /// Describe every procedure: path, kind and meta.
    pub fn schema(&self) -> RouterSchema {
        RouterSchema {
            procedures: self
                .procedures
                .iter()
                .map(|(path, def)| ProcedureSchema {
                    path: path.to_string(),
                    kind: def.kind(),
                    meta: (**def.meta()).clone(),
                    has_input: def.has_input_parser(),
                    has_output: def.has_output_parser(),
                    middleware: def.middleware_count(),
                })
                .collect(),
        }
    }
}

impl<Ctx> Clone for Router<Ctx> {
    fn clone(&self) -> Self {
        Self {
            procedures: Arc::clone(&self.procedures),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for Router<Ctx> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<Ctx> fmt::Debug for Router<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field(
                "procedures",
                &self.procedures.keys().map(ToString::to_string).collect::<Vec<_>>(),
            )
            .finish()
    }
}

enum Pending<Ctx> {
    Keyed(String, RouterEntry<Ctx>),
    Merged(Router<Ctx>),
}

/// Builder that collects entries and flattens them on [`build`](Self::build).
pub struct RouterBuilder<Ctx> {
    pending: Vec<Pending<Ctx>>,
}

impl<Ctx: Send + Sync + 'static> RouterBuilder<Ctx> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Add a procedure under `name`.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn procedure(self, name: impl Into<String>, def: ProcedureDefinition<Ctx>) -> Self {
        self.entry(name, RouterEntry::Procedure(def))
    }

    /// Nest a router under `name`; its paths gain `name` as first segment.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn nest(self, name: impl Into<String>, router: Router<Ctx>) -> Self {
        self.entry(name, RouterEntry::Router(router))
    }

    /// Add a keyed entry of either kind.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn entry(mut self, name: impl Into<String>, entry: RouterEntry<Ctx>) -> Self {
        self.pending.push(Pending::Keyed(name.into(), entry));
        self
    }

    /// Merge all paths of `router` at the top level.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn merge(mut self, router: Router<Ctx>) -> Self {
        self.pending.push(Pending::Merged(router));
        self
    }

    /// Flatten everything into a router.
    ///
    /// # Errors
    ///
    /// - [`RouterError::InvalidName`] for a key outside `[A-Za-z0-9_-]{1,255}`
    /// - [`RouterError::DuplicateKey`] for a key given twice
    /// - [`RouterError::PathCollision`] for a full path produced twice
    pub fn build(self) -> Result<Router<Ctx>, RouterError> {
        let mut table: Table<Ctx> = BTreeMap::new();
        let mut keys: HashSet<String> = HashSet::new();

        for pending in self.pending {
            match pending {
                Pending::Keyed(name, entry) => {
                    if !ProcedurePath::is_valid_segment(&name) {
                        warn!(name = %name, "Rejected invalid router key");
                        return Err(RouterError::InvalidName { name });
                    }
                    if !keys.insert(name.clone()) {
                        return Err(RouterError::DuplicateKey { key: name });
                    }
                    match entry {
                        RouterEntry::Procedure(def) => {
                            insert(&mut table, ProcedurePath::new([name]), Arc::new(def))?;
                        }
                        RouterEntry::Router(nested) => {
                            for (path, def) in nested.procedures.iter() {
                                insert(&mut table, path.prefixed(&name), Arc::clone(def))?;
                            }
                        }
                    }
                }
                Pending::Merged(other) => {
                    for (path, def) in other.procedures.iter() {
                        insert(&mut table, path.clone(), Arc::clone(def))?;
                    }
                }
            }
        }

        debug!(procedures = table.len(), "Router built");
        Ok(Router {
            procedures: Arc::new(table),
        })
    }
}

impl<Ctx: Send + Sync + 'static> Default for RouterBuilder<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

fn insert<Ctx: Send + Sync + 'static>(
    table: &mut Table<Ctx>,
    path: ProcedurePath,
    def: Arc<ProcedureDefinition<Ctx>>,
) -> Result<(), RouterError> {
    match table.entry(path) {
        Entry::Occupied(occupied) => {
            let path = occupied.key().to_string();
            warn!(path = %path, "Procedure path defined more than once");
            Err(RouterError::PathCollision { path })
        }
        Entry::Vacant(vacant) => {
            trace!(path = %vacant.key(), kind = %def.kind(), "Registered procedure");
            vacant.insert(def);
            Ok(())
        }
    }
}
